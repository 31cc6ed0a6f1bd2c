//! Builder for running ffmpeg with progress reporting and an optional timeout.

use crate::progress::ProgressParser;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Number of trailing log lines kept for error messages.
const STDERR_TAIL_LINES: usize = 12;

/// A builder for an ffmpeg invocation.
///
/// Global flags (`-hide_banner -nostdin -y -progress pipe:2 -nostats`) are
/// always prepended; callers supply inputs, filters and the output path.
///
/// # Example
///
/// ```no_run
/// use vintagecast_av::FfmpegCommand;
///
/// FfmpegCommand::new("ffmpeg")
///     .args(["-i", "in.mkv", "-c:v", "mpeg4", "out.mov"])
///     .run_with_progress(Some(120.0), &mut |pct| println!("{:.0}%", pct * 100.0))?;
/// # Ok::<(), vintagecast_av::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl FfmpegCommand {
    /// Create a new command for the given ffmpeg binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Kill the process if it runs longer than `d`.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = Some(d);
        self
    }

    /// Caller-supplied arguments, without the global flags.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Run to completion, discarding progress.
    pub fn run(&self) -> Result<()> {
        self.run_with_progress(None, &mut |_| {})
    }

    /// Run to completion, reporting elapsed-over-total fractions to `on_progress`.
    ///
    /// `duration_secs` is the input length; without it only the final `1.0`
    /// is reported.
    pub fn run_with_progress(
        &self,
        duration_secs: Option<f64>,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<()> {
        let tool = self.tool_name();

        #[cfg(feature = "tracing")]
        tracing::debug!(tool = %tool, args = ?self.args, "Spawning ffmpeg");

        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-nostdin", "-y", "-progress", "pipe:2", "-nostats"])
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::tool_not_found(&tool)
                } else {
                    Error::tool_failed(&tool, format!("failed to spawn: {e}"))
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool_failed(&tool, "stderr not captured"))?;

        let (tx, rx) = mpsc::channel::<String>();
        let reader = std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut parser = ProgressParser::new(duration_secs);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        loop {
            match rx.recv_timeout(Duration::from_millis(250)) {
                Ok(line) => {
                    if let Some(pct) = parser.feed(&line) {
                        on_progress(pct);
                    } else if !ProgressParser::is_progress_line(&line) && !line.trim().is_empty() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            if let (Some(deadline), Some(limit)) = (deadline, self.timeout) {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = reader.join();
                    return Err(Error::Timeout {
                        tool,
                        secs: limit.as_secs(),
                    });
                }
            }
        }

        let _ = reader.join();
        let status = child.wait()?;

        if !status.success() {
            let message = tail.into_iter().collect::<Vec<_>>().join("\n");
            return Err(Error::tool_failed(
                tool,
                format!("exited with status {status}: {message}"),
            ));
        }

        Ok(())
    }
}
