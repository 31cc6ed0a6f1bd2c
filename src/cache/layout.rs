//! Content-addressed artifact naming.
//!
//! Artifacts live at `<cache_dir>/<class>/<h0h1>/<h2h3>/<hash>.<ext>`, where
//! `hash` is the first 16 bytes of the SHA-256 of the source identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Partition of the cache for one kind of derived artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClass {
    /// Device-format video transcodes.
    Istream,
    /// Low-bitrate silent preview clips.
    Previews,
    /// Directory listing thumbnails.
    Thumbnails,
    /// Thumbnails for the image browser and generation history.
    ImageryThumbs,
    /// Slideshow-ready JPEGs.
    Slideshow,
}

impl CacheClass {
    pub const ALL: [CacheClass; 5] = [
        CacheClass::Istream,
        CacheClass::Previews,
        CacheClass::Thumbnails,
        CacheClass::ImageryThumbs,
        CacheClass::Slideshow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Istream => "istream",
            Self::Previews => "previews",
            Self::Thumbnails => "thumbnails",
            Self::ImageryThumbs => "imagery_thumbs",
            Self::Slideshow => "slideshow",
        }
    }
}

impl fmt::Display for CacheClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable hash of a source identity: 32 lowercase hex chars.
pub fn identity_hash(identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Where the artifact of `identity` in `class` lives.
pub fn artifact_path(cache_dir: &Path, class: CacheClass, identity: &str, ext: &str) -> PathBuf {
    let hash = identity_hash(identity);
    cache_dir
        .join(class.as_str())
        .join(&hash[0..2])
        .join(&hash[2..4])
        .join(format!("{}.{}", hash, ext.trim_start_matches('.')))
}
