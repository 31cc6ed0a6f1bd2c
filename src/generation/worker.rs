//! The generation worker: claims queued sessions one at a time and drives
//! the [`GenerationService`] for them.
//!
//! While any generation session is queued or generating the worker holds a
//! raise of the shared yield signal, so the crawler stays paused across an
//! autogeneration loop rather than sneaking in between images.

use super::service::{EventSubscription, ExecutionEvent, GenerationService};
use super::sessions::{ClaimedJob, GenerationSessions};
use crate::cache::CacheClass;
use crate::coordination::{YieldGuard, YieldSignal};
use crate::error::{Error, Result};
use crate::images::ThumbnailGenerator;
use chrono::Utc;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct GenerationWorker {
    sessions: Arc<GenerationSessions>,
    service: Arc<dyn GenerationService>,
    thumbnails: Arc<dyn ThumbnailGenerator>,
    signal: Arc<YieldSignal>,
    output_dir: PathBuf,
    heartbeat: Duration,
    poll_interval: Duration,
}

impl GenerationWorker {
    pub fn new(
        sessions: Arc<GenerationSessions>,
        service: Arc<dyn GenerationService>,
        thumbnails: Arc<dyn ThumbnailGenerator>,
        signal: Arc<YieldSignal>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            sessions,
            service,
            thumbnails,
            signal,
            output_dir,
            heartbeat: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Quiet period after which the notification channel is pinged.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll for queued sessions until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(output_dir = %self.output_dir.display(), "Generation worker started");

        let mut guard: Option<YieldGuard> = None;
        loop {
            let processed = tokio::select! {
                _ = shutdown.cancelled() => break,
                processed = self.process_next(&mut guard) => processed,
            };
            if processed {
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Generation worker stopped");
    }

    /// Claim and run at most one queued session.
    ///
    /// Returns whether a session was processed. `guard` keeps the yield
    /// signal raised between calls and is released once nothing is pending.
    pub async fn process_next(&self, guard: &mut Option<YieldGuard>) -> bool {
        let Some(job) = self.sessions.claim_next_queued() else {
            if guard.take().is_some() {
                debug!("No generation pending, lowering yield signal");
            }
            return false;
        };

        if guard.is_none() {
            *guard = Some(self.signal.raise());
        }

        info!(session_id = %job.session, "Starting generation");
        match self.generate(&job).await {
            Ok(images) => self.sessions.complete(job.session, images),
            Err(e) => self.sessions.fail(job.session, e.to_string()),
        }

        if !self.sessions.has_pending() && guard.take().is_some() {
            debug!("All generation finished, lowering yield signal");
        }
        true
    }

    async fn generate(&self, job: &ClaimedJob) -> Result<Vec<PathBuf>> {
        let job_id = self.service.submit(&job.settings).await?;
        {
            let mut events = self.service.subscribe(&job_id).await?;
            self.await_completion(events.as_mut(), &job_id).await?;
        }

        // Everything is retrieved before anything is written, so a failed job
        // leaves no images behind.
        let outputs = self.service.fetch_outputs(&job_id).await?;
        let mut retrieved = Vec::with_capacity(outputs.len());
        for output in &outputs {
            retrieved.push(self.service.retrieve(output).await?);
        }

        let mut saved = Vec::with_capacity(retrieved.len());
        for bytes in &retrieved {
            match self.save_image(bytes).await {
                Ok(path) => saved.push(path),
                Err(e) => {
                    discard_images(&saved).await;
                    return Err(e);
                }
            }
        }

        for path in &saved {
            info!(session_id = %job.session, path = %path.display(), "Image saved");
            self.make_thumbnail(path).await;
        }
        Ok(saved)
    }

    async fn await_completion(&self, events: &mut dyn EventSubscription, job_id: &str) -> Result<()> {
        loop {
            match tokio::time::timeout(self.heartbeat, events.next_event()).await {
                Ok(Ok(Some(ExecutionEvent::Completed))) => {
                    debug!(job_id, "Execution complete");
                    return Ok(());
                }
                Ok(Ok(Some(ExecutionEvent::Progress { value, max }))) => {
                    debug!(job_id, value, max, "Sampling");
                }
                Ok(Ok(Some(ExecutionEvent::Executing { node }))) => {
                    debug!(job_id, node = %node, "Executing node");
                }
                Ok(Ok(Some(ExecutionEvent::Other))) => {}
                Ok(Ok(None)) => {
                    return Err(Error::generation(
                        "notification channel closed before completion",
                    ))
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(job_id, "No notification within heartbeat, pinging");
                    events.heartbeat().await?;
                }
            }
        }
    }

    async fn save_image(&self, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        loop {
            let name = format!(
                "generated_{}_{}.png",
                Utc::now().timestamp(),
                rand::thread_rng().gen_range(1000..=9999)
            );
            let path = self.output_dir.join(name);
            if tokio::fs::try_exists(&path).await? {
                continue;
            }
            tokio::fs::write(&path, bytes).await?;
            return Ok(path);
        }
    }

    async fn make_thumbnail(&self, path: &Path) {
        let thumbnails = Arc::clone(&self.thumbnails);
        let source = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            thumbnails.ensure_thumbnail(&source, CacheClass::ImageryThumbs)
        })
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(path = %path.display(), "Thumbnail failed: {}", e),
            Err(e) => warn!(path = %path.display(), "Thumbnail task panicked: {}", e),
        }
    }
}

async fn discard_images(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), "Failed to remove partial output: {}", e);
        }
    }
}
