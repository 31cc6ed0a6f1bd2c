//! The iStream worker: the only consumer of the active session's queues.
//!
//! Each cycle fetches one task (priority queue first), runs it through the
//! [`Transcoder`] and records the outcome. While work is available the
//! scheduler holds a raise of the shared [`YieldSignal`]; it drops the raise
//! as soon as it finds nothing to do.

use super::registry::{SessionRegistry, TaskOutcome};
use super::session::TranscodeTask;
use crate::cache::{identity_hash, persist_staging, staging_file, CacheClass, CacheIndex};
use crate::config::TranscodeStrategy;
use crate::coordination::{sleep_unless_cancelled, YieldGuard, YieldSignal};
use crate::error::{Error, Result};
use crate::transcode::{PassKind, PassRequest, TargetProfile, Transcoder, INTERMEDIATE_EXTENSION};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vintagecast_common::TranscodeSessionId;

/// Per-task progress through a two-pass transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TwoPassStage {
    Intermediate,
    Final,
    Done,
}

/// Deletes its file when dropped.
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "Removed intermediate"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove intermediate {}: {}", self.0.display(), e),
        }
    }
}

/// Drives the active transcode session.
pub struct TranscodeScheduler {
    registry: Arc<SessionRegistry>,
    cache: Arc<CacheIndex>,
    transcoder: Arc<dyn Transcoder>,
    signal: Arc<YieldSignal>,
    strategy: TranscodeStrategy,
    profile: TargetProfile,
    scratch_dir: PathBuf,
    poll_interval: Duration,
}

impl TranscodeScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<SessionRegistry>,
        cache: Arc<CacheIndex>,
        transcoder: Arc<dyn Transcoder>,
        signal: Arc<YieldSignal>,
        strategy: TranscodeStrategy,
        profile: TargetProfile,
        scratch_dir: PathBuf,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            transcoder,
            signal,
            strategy,
            profile,
            scratch_dir,
            poll_interval,
        }
    }

    /// Process tasks until `shutdown` fires.
    pub fn run(&self, shutdown: CancellationToken) {
        info!(strategy = ?self.strategy, "Transcode scheduler started");

        let mut guard: Option<YieldGuard> = None;
        while !shutdown.is_cancelled() {
            if self.tick(&mut guard) {
                continue;
            }
            guard = None;
            if !sleep_unless_cancelled(&shutdown, self.poll_interval) {
                break;
            }
        }

        info!("Transcode scheduler stopped");
    }

    /// Fetch and process at most one task.
    ///
    /// Raises the yield signal into `guard` when there is work. Returns
    /// whether a task was processed.
    pub fn tick(&self, guard: &mut Option<YieldGuard>) -> bool {
        let Some((session, task)) = self.registry.fetch_next() else {
            return false;
        };

        if guard.is_none() {
            *guard = Some(self.signal.raise());
        }

        self.process(session, task);
        true
    }

    /// Process tasks until none is available, then lower the signal.
    ///
    /// Returns the number of tasks processed.
    pub fn run_until_idle(&self) -> usize {
        let mut guard = None;
        let mut processed = 0;
        while self.tick(&mut guard) {
            processed += 1;
        }
        processed
    }

    fn process(&self, session: TranscodeSessionId, task: TranscodeTask) {
        info!(session_id = %session, identity = %task.identity, "Transcoding");

        let result = staging_file(&task.output).and_then(|staging| {
            match self.strategy {
                TranscodeStrategy::SinglePass => self.single_pass(session, &task, &staging)?,
                TranscodeStrategy::TwoPass => self.two_pass(session, &task, &staging)?,
            }
            persist_staging(staging, &task.output)
        });

        match result {
            Ok(()) => {
                self.cache
                    .insert(CacheClass::Istream, &task.identity, &task.output);
                self.registry
                    .finish(session, &task.identity, TaskOutcome::Completed);
                info!(session_id = %session, identity = %task.identity, "Transcode completed");
            }
            Err(e) if e.is_cancelled() => {
                self.registry
                    .finish(session, &task.identity, TaskOutcome::Cancelled);
                info!(session_id = %session, identity = %task.identity, "Transcode cancelled between passes");
            }
            Err(e) => {
                self.registry
                    .finish(session, &task.identity, TaskOutcome::Failed);
                error!(session_id = %session, identity = %task.identity, "Transcode failed: {}", e);
            }
        }
    }

    fn run_pass(
        &self,
        session: TranscodeSessionId,
        task: &TranscodeTask,
        source: &Path,
        output: &Path,
        kind: PassKind,
        range: (f64, f64),
    ) -> Result<()> {
        let (start, end) = range;
        let request = PassRequest {
            source,
            output,
            profile: &self.profile,
            kind,
        };
        let mut report = |fraction: f64| {
            let percent = start + fraction.clamp(0.0, 1.0) * (end - start);
            self.registry
                .report_progress(session, &task.identity, percent);
        };
        self.transcoder.run_pass(&request, &mut report)
    }

    fn single_pass(&self, session: TranscodeSessionId, task: &TranscodeTask, output: &Path) -> Result<()> {
        let source = PathBuf::from(&task.identity);
        self.run_pass(session, task, &source, output, PassKind::Single, (0.0, 100.0))
    }

    fn two_pass(&self, session: TranscodeSessionId, task: &TranscodeTask, output: &Path) -> Result<()> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let source = PathBuf::from(&task.identity);
        let intermediate = ScratchFile(self.scratch_dir.join(format!(
            "intermediate-{}.{}",
            identity_hash(&task.identity),
            INTERMEDIATE_EXTENSION
        )));

        let mut stage = TwoPassStage::Intermediate;
        loop {
            stage = match stage {
                TwoPassStage::Intermediate => {
                    self.run_pass(
                        session,
                        task,
                        &source,
                        &intermediate.0,
                        PassKind::Intermediate,
                        (0.0, 50.0),
                    )?;
                    TwoPassStage::Final
                }
                TwoPassStage::Final => {
                    if self.registry.is_aborted(session) {
                        return Err(Error::Cancelled);
                    }
                    self.run_pass(
                        session,
                        task,
                        &intermediate.0,
                        output,
                        PassKind::Final,
                        (50.0, 100.0),
                    )?;
                    TwoPassStage::Done
                }
                TwoPassStage::Done => return Ok(()),
            };
        }
    }
}
