//! Still image handling.
//!
//! Decoding (with an ffmpeg fallback for HEIC, AVIF and TIFF), JPEG output,
//! the slideshow [`StillConverter`] and the cache-backed [`Thumbnailer`].

mod convert;
mod thumbnail;

pub use convert::StillConverter;
pub use thumbnail::{ThumbnailGenerator, Thumbnailer};

use crate::cache::{persist_staging, staging_file};
use crate::error::Result;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use vintagecast_common::paths::{classify, MediaKind};

/// Upper bound for the ffmpeg decode fallback.
const DECODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Decode an image, going through ffmpeg for formats the `image` crate lacks.
pub fn load_image(path: &Path, ffmpeg: Option<&Path>) -> Result<DynamicImage> {
    match image::open(path) {
        Ok(img) => Ok(img),
        Err(e) => match (ffmpeg, classify(path)) {
            (Some(ffmpeg), Some(MediaKind::ConvertibleImage)) => decode_with_ffmpeg(ffmpeg, path),
            _ => Err(e.into()),
        },
    }
}

fn decode_with_ffmpeg(ffmpeg: &Path, path: &Path) -> Result<DynamicImage> {
    let frame = tempfile::Builder::new()
        .prefix(".decode-")
        .suffix(".png")
        .tempfile()?
        .into_temp_path();
    vintagecast_av::extract_frame(ffmpeg, path, &frame, 0.0, DECODE_TIMEOUT)?;
    Ok(image::open(&frame)?)
}

/// Shrink to at most `width` pixels wide, keeping the aspect ratio.
pub fn fit_width(img: DynamicImage, width: u32) -> DynamicImage {
    if img.width() > width {
        img.resize(width, u32::MAX, FilterType::Lanczos3)
    } else {
        img
    }
}

/// Encode `img` as a baseline JPEG at `target`, atomically.
pub fn save_jpeg(img: &DynamicImage, target: &Path, quality: u8) -> Result<()> {
    let staging = staging_file(target)?;
    let mut writer = BufWriter::new(std::fs::File::create(&staging)?);
    JpegEncoder::new_with_quality(&mut writer, quality).encode_image(&img.to_rgb8())?;
    writer.flush()?;
    drop(writer);
    persist_staging(staging, target)
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{Rgb, RgbImage};
    use std::path::Path;

    /// Write a small solid-colour PNG.
    pub fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 40, 40]))
            .save(path)
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_png;
    use super::*;

    #[test]
    fn fit_width_only_shrinks() {
        let wide = DynamicImage::new_rgb8(800, 400);
        let fitted = fit_width(wide, 200);
        assert_eq!((fitted.width(), fitted.height()), (200, 100));

        let narrow = DynamicImage::new_rgb8(120, 90);
        let kept = fit_width(narrow, 200);
        assert_eq!((kept.width(), kept.height()), (120, 90));
    }

    #[test]
    fn save_jpeg_writes_decodable_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.jpg");
        let img = DynamicImage::new_rgba8(16, 8);
        save_jpeg(&img, &target, 80).unwrap();

        let decoded = image::open(&target).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn load_image_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path, 10, 6);
        let img = load_image(&path, None).unwrap();
        assert_eq!(img.width(), 10);
    }

    #[test]
    fn load_image_without_ffmpeg_fails_on_undecodable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.heic");
        std::fs::write(&path, b"not really heic").unwrap();
        assert!(load_image(&path, None).is_err());
    }
}
