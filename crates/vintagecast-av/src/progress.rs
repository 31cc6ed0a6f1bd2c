//! Parser for ffmpeg `-progress` key/value output.
//!
//! ffmpeg emits blocks of `key=value` lines terminated by `progress=continue`
//! or `progress=end`. Only the encoded timestamp is of interest here.

/// Incremental parser turning `-progress` lines into a completion fraction.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration_secs: Option<f64>,
    last_out_time_us: Option<i64>,
}

impl ProgressParser {
    /// Create a parser for an input of the given duration.
    ///
    /// Without a known duration no fractions are produced until `progress=end`.
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
            last_out_time_us: None,
        }
    }

    /// Feed one line of output.
    ///
    /// Returns the completion fraction in `[0, 1]` at the end of each block.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();

        // ffmpeg reports microseconds under both keys.
        if let Some(val) = line
            .strip_prefix("out_time_us=")
            .or_else(|| line.strip_prefix("out_time_ms="))
        {
            if let Ok(us) = val.trim().parse::<i64>() {
                self.last_out_time_us = Some(us);
            }
            return None;
        }

        let state = line.strip_prefix("progress=")?;
        if state == "end" {
            return Some(1.0);
        }

        let out_us = self.last_out_time_us?;
        let duration = self.duration_secs?;
        let elapsed = out_us.max(0) as f64 / 1_000_000.0;
        Some((elapsed / duration).clamp(0.0, 1.0))
    }

    /// Whether the line is part of the `-progress` protocol rather than a log line.
    pub fn is_progress_line(line: &str) -> bool {
        let line = line.trim();
        match line.split_once('=') {
            Some((key, _)) => !key.is_empty() && !key.contains(' '),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_emitted_per_block() {
        let mut parser = ProgressParser::new(Some(10.0));
        assert_eq!(parser.feed("frame=12"), None);
        assert_eq!(parser.feed("out_time_us=2500000"), None);
        let pct = parser.feed("progress=continue").unwrap();
        assert!((pct - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_end_is_complete() {
        let mut parser = ProgressParser::new(None);
        assert_eq!(parser.feed("progress=continue"), None);
        assert_eq!(parser.feed("progress=end"), Some(1.0));
    }

    #[test]
    fn test_clamps_overshoot_and_negative_times() {
        let mut parser = ProgressParser::new(Some(1.0));
        parser.feed("out_time_us=5000000");
        assert_eq!(parser.feed("progress=continue"), Some(1.0));
        parser.feed("out_time_us=-40");
        assert_eq!(parser.feed("progress=continue"), Some(0.0));
    }

    #[test]
    fn test_ignores_unparseable_time() {
        let mut parser = ProgressParser::new(Some(4.0));
        parser.feed("out_time_us=N/A");
        assert_eq!(parser.feed("progress=continue"), None);
    }

    #[test]
    fn test_progress_line_detection() {
        assert!(ProgressParser::is_progress_line("bitrate=N/A"));
        assert!(!ProgressParser::is_progress_line("Stream mapping:"));
        assert!(!ProgressParser::is_progress_line("[mp4 @ 0x1] some = thing"));
    }
}
