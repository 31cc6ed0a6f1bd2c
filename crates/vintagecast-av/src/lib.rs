//! # vintagecast-av
//!
//! Thin, synchronous wrappers around the ffmpeg and ffprobe command line tools.
//!
//! This crate provides:
//! - Tool discovery and startup checks ([`tools`])
//! - Duration and dimension probing through ffprobe JSON ([`probe`])
//! - ffmpeg invocation with `-progress` streaming ([`command`], [`progress`])
//! - Representative frame extraction for thumbnails ([`frame`])
//! - Pixel-budget scaling math ([`scale`])
//!
//! ## Features
//!
//! - `tracing` - Enable tracing support
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use vintagecast_av::{probe, scale::fit_within_pixels};
//!
//! let info = probe::probe(Path::new("ffprobe"), Path::new("/media/clip.mkv"))?;
//! let (w, h) = fit_within_pixels(info.width, info.height, 346 * 260);
//! println!("{}x{} -> {}x{}", info.width, info.height, w, h);
//! # Ok::<(), vintagecast_av::Error>(())
//! ```

mod error;
pub mod command;
pub mod frame;
pub mod probe;
pub mod progress;
pub mod scale;
pub mod tools;

// Re-exports
pub use command::FfmpegCommand;
pub use error::{Error, Result};
pub use frame::extract_frame;
pub use probe::MediaDimensions;
pub use progress::ProgressParser;
pub use tools::{check_tools, MediaTool, ToolStatus};
