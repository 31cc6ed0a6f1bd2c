use super::{fit_width, load_image, save_jpeg};
use crate::cache::{CacheClass, CacheIndex};
use crate::config::ThumbnailConfig;
use crate::error::{Error, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vintagecast_common::paths::{classify, MediaKind};

/// Produces cached thumbnails. The crawler and generation worker depend on
/// this trait so tests can substitute a recorder.
pub trait ThumbnailGenerator: Send + Sync {
    /// Return the thumbnail of `source` in `class`, creating it on a miss.
    fn ensure_thumbnail(&self, source: &Path, class: CacheClass) -> Result<PathBuf>;
}

/// Cache-backed thumbnail producer for videos and stills.
pub struct Thumbnailer {
    cache: Arc<CacheIndex>,
    ffmpeg: Option<PathBuf>,
    width: u32,
    quality: u8,
    frame_offset: f64,
    frame_timeout: Duration,
}

impl Thumbnailer {
    pub fn new(cache: Arc<CacheIndex>, ffmpeg: Option<PathBuf>, config: &ThumbnailConfig) -> Self {
        Self {
            cache,
            ffmpeg,
            width: config.width,
            quality: config.jpeg_quality,
            frame_offset: config.frame_offset_secs,
            frame_timeout: Duration::from_secs(config.frame_timeout_secs),
        }
    }

    fn video_frame(&self, source: &Path) -> Result<DynamicImage> {
        let ffmpeg = self
            .ffmpeg
            .as_deref()
            .ok_or_else(|| Error::validation("ffmpeg is required for video thumbnails"))?;

        let frame = tempfile::Builder::new()
            .prefix(".frame-")
            .suffix(".jpg")
            .tempfile()?
            .into_temp_path();

        // Clips shorter than the offset yield no frame there.
        if let Err(e) =
            vintagecast_av::extract_frame(ffmpeg, source, &frame, self.frame_offset, self.frame_timeout)
        {
            debug!(
                source = %source.display(),
                "No frame at {}s, retrying at start: {}",
                self.frame_offset,
                e
            );
            vintagecast_av::extract_frame(ffmpeg, source, &frame, 0.0, self.frame_timeout)?;
        }

        Ok(image::open(&frame)?)
    }
}

impl ThumbnailGenerator for Thumbnailer {
    fn ensure_thumbnail(&self, source: &Path, class: CacheClass) -> Result<PathBuf> {
        let identity = source.to_string_lossy();
        if let Some(path) = self.cache.lookup(class, &identity) {
            return Ok(path);
        }

        let img = match classify(source) {
            Some(MediaKind::Video) => self.video_frame(source)?,
            Some(_) => load_image(source, self.ffmpeg.as_deref())?,
            None => {
                return Err(Error::validation(format!(
                    "not a media file: {}",
                    source.display()
                )))
            }
        };

        let thumb = fit_width(img, self.width);
        let target = self.cache.artifact_path(class, &identity, "jpg")?;
        save_jpeg(&thumb, &target, self.quality)?;
        self.cache.insert(class, &identity, &target);

        info!(source = %source.display(), class = %class, "Thumbnail created");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::test_support::write_png;

    fn thumbnailer(dir: &Path) -> (Thumbnailer, Arc<CacheIndex>) {
        let cache = Arc::new(CacheIndex::open(dir.join("cache")).unwrap());
        let thumbs = Thumbnailer::new(Arc::clone(&cache), None, &ThumbnailConfig::default());
        (thumbs, cache)
    }

    #[test]
    fn still_thumbnail_is_fitted_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (thumbs, cache) = thumbnailer(dir.path());
        let source = dir.path().join("photo.png");
        write_png(&source, 800, 400);

        let path = thumbs
            .ensure_thumbnail(&source, CacheClass::ImageryThumbs)
            .unwrap();
        let out = image::open(&path).unwrap();
        assert_eq!((out.width(), out.height()), (200, 100));
        assert_eq!(
            cache.lookup(CacheClass::ImageryThumbs, &source.to_string_lossy()),
            Some(path.clone())
        );

        // Second call is a cache hit; the source may be gone.
        std::fs::remove_file(&source).unwrap();
        assert_eq!(
            thumbs
                .ensure_thumbnail(&source, CacheClass::ImageryThumbs)
                .unwrap(),
            path
        );
    }

    #[test]
    fn classes_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let (thumbs, cache) = thumbnailer(dir.path());
        let source = dir.path().join("photo.png");
        write_png(&source, 50, 50);

        let a = thumbs.ensure_thumbnail(&source, CacheClass::Thumbnails).unwrap();
        let b = thumbs
            .ensure_thumbnail(&source, CacheClass::ImageryThumbs)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(CacheClass::Thumbnails), 1);
        assert_eq!(cache.len(CacheClass::ImageryThumbs), 1);
    }

    #[test]
    fn video_without_ffmpeg_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (thumbs, cache) = thumbnailer(dir.path());
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"video").unwrap();

        let err = thumbs
            .ensure_thumbnail(&source, CacheClass::Thumbnails)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(cache.len(CacheClass::Thumbnails), 0);
    }

    #[test]
    fn non_media_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (thumbs, _) = thumbnailer(dir.path());
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"hi").unwrap();
        assert!(thumbs
            .ensure_thumbnail(&source, CacheClass::Thumbnails)
            .is_err());
    }
}
