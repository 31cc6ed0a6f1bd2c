use super::{load_image, save_jpeg};
use crate::config::SlideshowConfig;
use crate::error::Result;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::debug;
use vintagecast_av::scale::shrink_to_pixel_budget;

/// Converts stills into device-ready JPEGs within a pixel budget.
#[derive(Debug, Clone)]
pub struct StillConverter {
    ffmpeg: Option<PathBuf>,
    max_pixels: u32,
    quality: u8,
}

impl StillConverter {
    pub fn new(ffmpeg: Option<PathBuf>, config: &SlideshowConfig) -> Self {
        Self {
            ffmpeg,
            max_pixels: config.max_pixels,
            quality: config.jpeg_quality,
        }
    }

    pub fn convert(&self, source: &Path, target: &Path) -> Result<()> {
        let img = load_image(source, self.ffmpeg.as_deref())?;
        let (width, height) = shrink_to_pixel_budget(img.width(), img.height(), self.max_pixels);
        let img = if (width, height) != (img.width(), img.height()) {
            debug!(
                source = %source.display(),
                "Resizing {}x{} -> {}x{}",
                img.width(),
                img.height(),
                width,
                height
            );
            img.resize_exact(width, height, FilterType::Lanczos3)
        } else {
            img
        };
        save_jpeg(&img, target, self.quality)
    }
}
