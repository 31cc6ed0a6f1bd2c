//! Transcoder seam.
//!
//! The scheduler and the preview service only know the [`Transcoder`] trait;
//! [`FfmpegTranscoder`] is the production implementation. A pass writes to
//! the path it is given and reports elapsed-over-total progress in `[0, 1]`.
//! After a failed pass the output path holds nothing usable.

mod ffmpeg;
mod preview;

pub use ffmpeg::FfmpegTranscoder;
pub use preview::PreviewService;

use crate::config::{PreviewConfig, TranscodeConfig};
use crate::error::Result;
use std::path::Path;

/// Container extension of device and preview artifacts.
pub const DEVICE_EXTENSION: &str = "mov";

/// Container extension of two-pass intermediates.
pub const INTERMEDIATE_EXTENSION: &str = "mp4";

/// What the device can decode.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetProfile {
    pub max_pixels: u32,
    pub frame_rate: u32,
    /// Constant bitrate such as `"300k"`; `None` means fixed quantizer.
    pub video_bitrate: Option<String>,
    pub audio: bool,
    /// Quantize through RGB565 first.
    pub reduced_palette: bool,
}

impl TargetProfile {
    /// Full playback profile for the device player.
    pub fn device(config: &TranscodeConfig) -> Self {
        Self {
            max_pixels: config.max_pixels,
            frame_rate: config.frame_rate,
            video_bitrate: None,
            audio: true,
            reduced_palette: config.reduced_palette,
        }
    }

    /// Silent low-bitrate preview clips.
    pub fn preview(config: &PreviewConfig) -> Self {
        Self {
            max_pixels: config.max_pixels,
            frame_rate: config.frame_rate,
            video_bitrate: Some(config.video_bitrate.clone()),
            audio: false,
            reduced_palette: false,
        }
    }
}

/// Which encode a pass performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Source straight to the device format.
    Single,
    /// Hardware downscale of the source to an intermediate.
    Intermediate,
    /// Intermediate to the device format.
    Final,
}

/// One invocation of the transcoder.
#[derive(Debug, Clone, Copy)]
pub struct PassRequest<'a> {
    pub source: &'a Path,
    pub output: &'a Path,
    pub profile: &'a TargetProfile,
    pub kind: PassKind,
}

/// Produces an artifact from a source item.
pub trait Transcoder: Send + Sync {
    /// Run one pass, calling `progress` with fractions in `[0, 1]`.
    fn run_pass(&self, request: &PassRequest<'_>, progress: &mut dyn FnMut(f64)) -> Result<()>;
}
