use super::{PassKind, PassRequest, TargetProfile, Transcoder, DEVICE_EXTENSION};
use crate::cache::{persist_staging, staging_file, CacheClass, CacheIndex};
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// On-demand preview clips.
///
/// Previews are produced synchronously for the caller that asks for them and
/// never go through the scheduler queues.
pub struct PreviewService {
    cache: Arc<CacheIndex>,
    transcoder: Arc<dyn Transcoder>,
    profile: TargetProfile,
}

impl PreviewService {
    pub fn new(cache: Arc<CacheIndex>, transcoder: Arc<dyn Transcoder>, profile: TargetProfile) -> Self {
        Self {
            cache,
            transcoder,
            profile,
        }
    }

    /// Return the preview of `source`, transcoding it first on a cache miss.
    pub fn ensure_preview(&self, source: &Path) -> Result<PathBuf> {
        let identity = source.to_string_lossy();
        if let Some(path) = self.cache.lookup(CacheClass::Previews, &identity) {
            return Ok(path);
        }

        let target = self
            .cache
            .artifact_path(CacheClass::Previews, &identity, DEVICE_EXTENSION)?;
        let staging = staging_file(&target)?;

        let request = PassRequest {
            source,
            output: &*staging,
            profile: &self.profile,
            kind: PassKind::Single,
        };
        if let Err(e) = self.transcoder.run_pass(&request, &mut |_| {}) {
            warn!(source = %source.display(), "Preview transcode failed: {}", e);
            return Err(e);
        }

        persist_staging(staging, &target)?;
        self.cache.insert(CacheClass::Previews, &identity, &target);
        info!(source = %source.display(), "Preview ready");
        Ok(target)
    }
}
