//! Locating ffmpeg and ffprobe.
//!
//! Both tools are mandatory. Each resolves from an explicitly configured
//! executable when one exists, otherwise from `PATH`.

use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// The external executables the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaTool {
    Ffmpeg,
    Ffprobe,
}

impl MediaTool {
    /// Every tool that must resolve before workers start.
    pub const ALL: [MediaTool; 2] = [MediaTool::Ffmpeg, MediaTool::Ffprobe];

    /// Executable name looked up on `PATH`.
    pub fn binary(self) -> &'static str {
        match self {
            MediaTool::Ffmpeg => "ffmpeg",
            MediaTool::Ffprobe => "ffprobe",
        }
    }

    /// Resolve the executable, preferring `configured` when it is a file.
    ///
    /// A configured path that does not exist falls back to `PATH`.
    pub fn locate(self, configured: Option<&Path>) -> Result<PathBuf> {
        match configured {
            Some(path) if path.is_file() => Ok(path.to_path_buf()),
            _ => which::which(self.binary()).map_err(|_| Error::tool_not_found(self.binary())),
        }
    }

    /// Resolve the executable and ask it for its version banner.
    pub fn inspect(self, configured: Option<&Path>) -> ToolStatus {
        let path = self.locate(configured).ok();
        let version = path.as_deref().and_then(version_of);
        ToolStatus {
            tool: self,
            path,
            version,
        }
    }
}

impl fmt::Display for MediaTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Outcome of a startup check for one tool.
#[derive(Debug, Clone)]
pub struct ToolStatus {
    pub tool: MediaTool,
    /// Resolved executable, if any.
    pub path: Option<PathBuf>,
    /// Version reported by `-version`; `None` if the tool did not run.
    pub version: Option<String>,
}

impl ToolStatus {
    /// Whether the tool resolved and answered `-version`.
    pub fn is_usable(&self) -> bool {
        self.path.is_some() && self.version.is_some()
    }
}

/// Inspect every tool. `configured` maps a tool to its configured path.
pub fn check_tools<'a>(configured: impl Fn(MediaTool) -> Option<&'a Path>) -> Vec<ToolStatus> {
    MediaTool::ALL
        .iter()
        .map(|&tool| tool.inspect(configured(tool)))
        .collect()
}

fn version_of(executable: &Path) -> Option<String> {
    let output = Command::new(executable).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().next().and_then(parse_version_banner)
}

/// `ffmpeg version 6.1.1-3ubuntu5 Copyright ...` yields `6.1.1-3ubuntu5`.
fn parse_version_banner(line: &str) -> Option<String> {
    let mut words = line.split_whitespace();
    words.find(|word| *word == "version")?;
    words.next().map(str::to_string)
}
