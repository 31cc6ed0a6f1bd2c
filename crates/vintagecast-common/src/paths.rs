//! Path utilities for classifying media by extension.
//!
//! The crawler, the session registry and the slideshow pre-transcoder all
//! decide what to do with a file from its extension alone.

use std::path::Path;

/// List of supported video file extensions.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm"];

/// List of still image extensions the `image` crate decodes directly.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "gif", "png", "bmp", "webp"];

/// Still formats that must be converted before any client can show them.
const CONVERTIBLE_IMAGE_EXTENSIONS: &[&str] = &["heic", "avif", "tiff"];

/// Directory name markers left behind by operating system trash handling.
const SYSTEM_DIR_MARKERS: &[&str] = &["$RECYCLE.BIN", ".Trash-"];

/// Broad media category of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// A video container.
    Video,
    /// A still image in a directly decodable format.
    Image,
    /// A still image that needs conversion (HEIC, AVIF, TIFF).
    ConvertibleImage,
}

impl MediaKind {
    /// Whether this kind is a still image of either flavour.
    pub fn is_still(&self) -> bool {
        matches!(self, Self::Image | Self::ConvertibleImage)
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Classify a path by its extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use vintagecast_common::paths::{classify, MediaKind};
///
/// assert_eq!(classify(Path::new("a.mov")), Some(MediaKind::Video));
/// assert_eq!(classify(Path::new("a.HEIC")), Some(MediaKind::ConvertibleImage));
/// assert_eq!(classify(Path::new("notes.txt")), None);
/// ```
pub fn classify(path: &Path) -> Option<MediaKind> {
    let ext = lowercase_extension(path)?;
    let ext = ext.as_str();
    if VIDEO_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Video)
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Image)
    } else if CONVERTIBLE_IMAGE_EXTENSIONS.contains(&ext) {
        Some(MediaKind::ConvertibleImage)
    } else {
        None
    }
}

/// Check if a path has a video file extension.
pub fn is_video_file(path: &Path) -> bool {
    classify(path) == Some(MediaKind::Video)
}

/// Check if a path is any kind of still image.
pub fn is_still_image(path: &Path) -> bool {
    classify(path).is_some_and(|kind| kind.is_still())
}

/// Check if a path is a GIF, which slideshows pass through unconverted.
pub fn is_animated_passthrough(path: &Path) -> bool {
    lowercase_extension(path).as_deref() == Some("gif")
}

/// Check whether a directory name belongs to OS trash handling.
///
/// ```
/// use vintagecast_common::paths::is_system_dir_name;
///
/// assert!(is_system_dir_name("$RECYCLE.BIN"));
/// assert!(is_system_dir_name(".Trash-1000"));
/// assert!(!is_system_dir_name("holidays"));
/// ```
pub fn is_system_dir_name(name: &str) -> bool {
    SYSTEM_DIR_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Get the list of video file extensions.
#[must_use]
pub fn video_extensions() -> &'static [&'static str] {
    VIDEO_EXTENSIONS
}

/// Get the list of directly decodable image extensions.
#[must_use]
pub fn image_extensions() -> &'static [&'static str] {
    IMAGE_EXTENSIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(classify(Path::new("/m/Clip.MP4")), Some(MediaKind::Video));
        assert_eq!(classify(Path::new("/m/photo.JpEg")), Some(MediaKind::Image));
    }

    #[test]
    fn test_classify_without_extension() {
        assert_eq!(classify(Path::new("/m/README")), None);
    }

    #[test]
    fn test_still_images() {
        assert!(is_still_image(Path::new("a.png")));
        assert!(is_still_image(Path::new("a.tiff")));
        assert!(!is_still_image(Path::new("a.webm")));
    }

    #[test]
    fn test_gif_passthrough() {
        assert!(is_animated_passthrough(Path::new("loop.GIF")));
        assert!(!is_animated_passthrough(Path::new("still.png")));
    }

    #[test]
    fn test_extension_lists() {
        assert!(video_extensions().contains(&"mkv"));
        assert!(image_extensions().contains(&"webp"));
    }
}
