//! FFprobe-based duration and dimension probing.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Geometry and length of the first video stream of a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaDimensions {
    pub width: u32,
    pub height: u32,
    /// Container duration, falling back to the stream duration.
    pub duration_secs: Option<f64>,
}

/// Probe a file with the given ffprobe binary.
pub fn probe(ffprobe: &Path, path: &Path) -> Result<MediaDimensions> {
    if !path.exists() {
        return Err(Error::file_not_found(path));
    }

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_not_found("ffprobe")
            } else {
                Error::Io(e)
            }
        })?;

    if !output.status.success() {
        return Err(Error::tool_failed(
            "ffprobe",
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe's `-print_format json` output.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaDimensions> {
    let parsed: FfprobeOutput = serde_json::from_str(json)?;

    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::parse_error("ffprobe", "no video stream"))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(Error::parse_error("ffprobe", "video stream has no dimensions")),
    };

    let duration_secs = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(stream.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(MediaDimensions {
        width,
        height,
        duration_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_stream() {
        let json = r#"{
            "streams": [{"index": 0, "codec_type": "video", "width": 1280, "height": 720}],
            "format": {"filename": "a.mkv", "duration": "61.500000"}
        }"#;
        let dims = parse_ffprobe_json(json).unwrap();
        assert_eq!((dims.width, dims.height), (1280, 720));
        assert_eq!(dims.duration_secs, Some(61.5));
    }

    #[test]
    fn test_stream_duration_fallback() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 2, "height": 2, "duration": "3.0"}],
            "format": {}
        }"#;
        assert_eq!(parse_ffprobe_json(json).unwrap().duration_secs, Some(3.0));
    }

    #[test]
    fn test_still_images_have_no_duration() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 4032, "height": 3024}],
            "format": {"duration": "N/A"}
        }"#;
        assert_eq!(parse_ffprobe_json(json).unwrap().duration_secs, None);
    }

    #[test]
    fn test_no_video_stream() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(matches!(
            parse_ffprobe_json(json),
            Err(Error::ParseError { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = probe(Path::new("ffprobe"), Path::new("/definitely/not/here.mkv")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }
}
