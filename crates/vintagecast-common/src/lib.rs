//! Vintagecast-Common: Shared types and utilities.
//!
//! - **Typed IDs**: UUID wrappers for transcode, slideshow and generation sessions
//! - **Path Utilities**: Media classification by extension and system directory detection
//!
//! # Examples
//!
//! ```
//! use vintagecast_common::TranscodeSessionId;
//! use vintagecast_common::paths::{classify, MediaKind};
//! use std::path::Path;
//!
//! let id = TranscodeSessionId::new();
//! assert_eq!(id.to_string().len(), 36);
//!
//! assert_eq!(classify(Path::new("clip.MKV")), Some(MediaKind::Video));
//! ```

pub mod ids;
pub mod paths;

pub use ids::*;
