//! Atomic artifact writes.
//!
//! Producers write into a hidden sibling of the final path and rename it
//! into place only on success, so a lookup never sees a partial artifact.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// A hidden staging file next to `target`, deleted on drop unless persisted.
///
/// The staging name keeps `target`'s extension so tools that infer the
/// output format from it still work.
pub fn staging_file(target: &Path) -> Result<TempPath> {
    let dir = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)?;
    let suffix = target
        .extension()
        .map(|e| format!(".part.{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".part".to_string());
    let file = tempfile::Builder::new()
        .prefix(".staging-")
        .suffix(&suffix)
        .tempfile_in(&dir)?;
    Ok(file.into_temp_path())
}

/// Move a finished staging file onto its final path.
pub fn persist_staging(staging: TempPath, target: &Path) -> Result<()> {
    staging.persist(target).map_err(|e| e.error)?;
    Ok(())
}
