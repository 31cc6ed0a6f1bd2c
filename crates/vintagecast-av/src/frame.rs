//! Representative frame extraction.

use crate::command::FfmpegCommand;
use crate::{Error, Result};
use std::path::Path;
use std::time::Duration;

/// Extract a single frame at `offset_secs` from `input` into `output`.
///
/// The output format follows the output extension (JPEG or PNG). Fails if
/// ffmpeg exits cleanly without writing a frame, which happens when the
/// offset lies past the end of the clip.
pub fn extract_frame(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    offset_secs: f64,
    timeout: Duration,
) -> Result<()> {
    if !input.exists() {
        return Err(Error::file_not_found(input));
    }

    let _ = std::fs::remove_file(output);

    FfmpegCommand::new(ffmpeg)
        .args(["-ss".to_string(), format!("{offset_secs:.3}")])
        .arg("-i")
        .arg(input.to_string_lossy())
        .args(["-frames:v", "1", "-q:v", "2"])
        .arg(output.to_string_lossy())
        .timeout(timeout)
        .run()?;

    match std::fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(Error::tool_failed(
            "ffmpeg",
            format!("no frame written at {offset_secs}s"),
        )),
    }
}
