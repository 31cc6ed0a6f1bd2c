//! Vintagecast - background job engine for a media server feeding vintage devices
//!
//! This library crate exposes the engine's services for the binary and for
//! integration testing.

pub mod app;
pub mod cache;
pub mod config;
pub mod coordination;
pub mod crawler;
pub mod error;
pub mod generation;
pub mod images;
pub mod istream;
pub mod slideshow;
pub mod transcode;

pub use error::{Error, Result};
