//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds the full [`Services`] set over a
//! temporary media root with a [`FakeTranscoder`] in place of ffmpeg, and
//! [`FakeGeneration`], an in-process stand-in for the generation service.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::{Condvar, Mutex};
use tempfile::TempDir;

use vintagecast::app::Services;
use vintagecast::config::Config;
use vintagecast::generation::{
    EventSubscription, ExecutionEvent, GenerationService, GenerationSettings, OutputDescriptor,
};
use vintagecast::istream::{SessionKind, SessionSnapshot};
use vintagecast::transcode::{PassKind, PassRequest, Transcoder};
use vintagecast::{Error, Result};
use vintagecast_common::TranscodeSessionId;

pub const TEST_MODEL: &str = "test-checkpoint.safetensors";

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A latch that blocks threads until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }
}

/// One recorded transcoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPass {
    pub kind: PassKind,
    pub source: PathBuf,
    pub output: PathBuf,
}

/// Transcoder that writes a marker file instead of running ffmpeg.
///
/// Passes of a gated kind block until [`FakeTranscoder::release`] is called.
/// Sources whose path contains a failing marker return an error.
#[derive(Default)]
pub struct FakeTranscoder {
    passes: Mutex<Vec<RecordedPass>>,
    gated: Mutex<Vec<PassKind>>,
    gate: Gate,
    failing: Mutex<Vec<String>>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block every pass of `kind` until released.
    pub fn gate(&self, kind: PassKind) {
        self.gated.lock().push(kind);
    }

    pub fn release(&self) {
        self.gate.open();
    }

    pub fn fail_on(&self, marker: &str) {
        self.failing.lock().push(marker.to_string());
    }

    pub fn passes(&self) -> Vec<RecordedPass> {
        self.passes.lock().clone()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.lock().len()
    }

    /// Source file names of the passes run so far, in order.
    pub fn source_names(&self) -> Vec<String> {
        self.passes
            .lock()
            .iter()
            .filter(|p| p.kind != PassKind::Final)
            .filter_map(|p| p.source.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }
}

impl Transcoder for FakeTranscoder {
    fn run_pass(&self, request: &PassRequest<'_>, progress: &mut dyn FnMut(f64)) -> Result<()> {
        self.passes.lock().push(RecordedPass {
            kind: request.kind,
            source: request.source.to_path_buf(),
            output: request.output.to_path_buf(),
        });
        progress(0.5);

        if self.gated.lock().contains(&request.kind) {
            self.gate.wait();
        }

        let source = request.source.to_string_lossy();
        if self.failing.lock().iter().any(|m| source.contains(m.as_str())) {
            return Err(Error::internal(format!("encoder rejected {source}")));
        }

        std::fs::write(request.output, format!("{:?}", request.kind))?;
        progress(1.0);
        Ok(())
    }
}

/// Assert each playlist identity sits in at most one of the session's
/// completed, failed, queued, prioritized and in-flight collections, and
/// that nothing outside the playlist appears in any of them.
pub fn assert_item_states_disjoint(snapshot: &SessionSnapshot) {
    let groups: [(&str, Vec<&String>); 5] = [
        ("completed", snapshot.completed.iter().collect()),
        ("failed", snapshot.failed.iter().collect()),
        ("queued", snapshot.queued.iter().collect()),
        ("prioritized", snapshot.prioritized.iter().collect()),
        ("in flight", snapshot.current.iter().collect()),
    ];

    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (name, items) in &groups {
        for item in items {
            assert!(
                snapshot.playlist.contains(item),
                "{item} is {name} but not in the playlist"
            );
            if let Some(other) = seen.insert(item.as_str(), *name) {
                panic!("{item} is both {other} and {name}");
            }
        }
    }
}

/// Test harness wrapping a fully-constructed [`Services`] over a temporary
/// media root.
pub struct TestHarness {
    pub dir: TempDir,
    pub services: Services,
    pub transcoder: Arc<FakeTranscoder>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build with test defaults, then let `adjust` override them.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let media_root = dir.path().join("media");
        std::fs::create_dir_all(&media_root).expect("failed to create media root");
        let media_root = media_root.canonicalize().expect("failed to canonicalize");

        let mut config = Config::default();
        config.server.media_root = media_root;
        config.cache.flush_interval_secs = 1;
        config.transcode.poll_interval_ms = 10;
        config.crawler.enabled = false;
        config.crawler.start_delay_secs = 0;
        config.crawler.item_delay_ms = 0;
        config.generation.default_model = TEST_MODEL.to_string();
        config.generation.poll_interval_ms = 10;
        adjust(&mut config);

        let transcoder = Arc::new(FakeTranscoder::new());
        let services = Services::with_transcoder(config, None, transcoder.clone())
            .expect("failed to build services");

        Self {
            dir,
            services,
            transcoder,
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.services.config.server.media_root
    }

    /// Create a placeholder video and return its identity.
    pub fn add_video(&self, relative: &str) -> String {
        let path = self.media_root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create dirs");
        }
        std::fs::write(&path, b"not really a video").expect("failed to write video");
        path.to_string_lossy().into_owned()
    }

    pub fn add_png(&self, relative: &str, width: u32, height: u32) -> PathBuf {
        let path = self.media_root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create dirs");
        }
        RgbImage::from_pixel(width, height, Rgb([30, 90, 160]))
            .save(&path)
            .expect("failed to write png");
        path
    }

    /// Create and start a batch session over `names`.
    pub fn start_batch(&self, names: &[&str]) -> TranscodeSessionId {
        let playlist = names.iter().map(|n| self.add_video(n)).collect();
        let registry = &self.services.registry;
        let id = registry
            .create_session(SessionKind::BatchFolder, self.media_root(), playlist)
            .expect("failed to create session");
        registry.start(id).expect("failed to start session");
        id
    }

    /// Snapshot `id`, asserting its item states are consistent.
    pub fn checked_snapshot(&self, id: TranscodeSessionId) -> SessionSnapshot {
        let snapshot = self
            .services
            .registry
            .snapshot(id)
            .expect("session should exist");
        assert_item_states_disjoint(&snapshot);
        snapshot
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.services.cache.cache_dir().join("scratch")
    }
}

/// Encode a solid PNG in memory.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 200, 10])))
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("failed to encode png");
    bytes.into_inner()
}

/// Async latch for the fake generation service.
#[derive(Clone)]
pub struct AsyncGate {
    tx: Arc<tokio::sync::watch::Sender<bool>>,
}

impl AsyncGate {
    pub fn closed() -> Self {
        let (tx, _rx) = tokio::sync::watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Ways [`FakeGeneration`] can break a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationFailure {
    /// `submit` is rejected.
    Submit,
    /// The notification channel ends before the completion event.
    ChannelClosed,
    /// The notification channel reports an error before completion.
    ChannelError,
    /// The job completes without any outputs.
    NoOutputs,
    /// Retrieving the second output fails.
    SecondRetrieve,
}

/// In-process generation service producing `images_per_job` PNGs per job.
pub struct FakeGeneration {
    pub submitted: Mutex<Vec<GenerationSettings>>,
    pub heartbeats: Arc<Mutex<usize>>,
    images_per_job: usize,
    gate: Option<AsyncGate>,
    failure: Mutex<Option<GenerationFailure>>,
}

impl FakeGeneration {
    pub fn new(images_per_job: usize) -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            heartbeats: Arc::new(Mutex::new(0)),
            images_per_job,
            gate: None,
            failure: Mutex::new(None),
        }
    }

    /// Hold every job before its completion event until `gate` opens.
    pub fn gated(mut self, gate: AsyncGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Break every following job in the given way.
    pub fn fail_with(&self, failure: GenerationFailure) {
        *self.failure.lock() = Some(failure);
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().len()
    }

    fn failure(&self) -> Option<GenerationFailure> {
        *self.failure.lock()
    }
}

struct FakeSubscription {
    events: VecDeque<ExecutionEvent>,
    gate: Option<AsyncGate>,
    heartbeats: Arc<Mutex<usize>>,
    error_at_end: bool,
}

#[async_trait]
impl EventSubscription for FakeSubscription {
    async fn next_event(&mut self) -> Result<Option<ExecutionEvent>> {
        // Waiting before the pop keeps this safe to drop on a heartbeat timeout.
        if matches!(self.events.front(), Some(ExecutionEvent::Completed)) {
            if let Some(gate) = &self.gate {
                gate.wait().await;
            }
        }
        match self.events.pop_front() {
            None if self.error_at_end => Err(Error::generation("connection reset by peer")),
            event => Ok(event),
        }
    }

    async fn heartbeat(&mut self) -> Result<()> {
        *self.heartbeats.lock() += 1;
        Ok(())
    }
}

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn submit(&self, settings: &GenerationSettings) -> Result<String> {
        if self.failure() == Some(GenerationFailure::Submit) {
            return Err(Error::generation("prompt rejected"));
        }
        let mut submitted = self.submitted.lock();
        submitted.push(settings.clone());
        Ok(format!("job-{}", submitted.len()))
    }

    async fn subscribe(&self, _job_id: &str) -> Result<Box<dyn EventSubscription>> {
        let failure = self.failure();
        let mut events = VecDeque::from([
            ExecutionEvent::Executing {
                node: "3".to_string(),
            },
            ExecutionEvent::Progress { value: 1, max: 2 },
            ExecutionEvent::Progress { value: 2, max: 2 },
        ]);
        let broken = matches!(
            failure,
            Some(GenerationFailure::ChannelClosed | GenerationFailure::ChannelError)
        );
        if !broken {
            events.push_back(ExecutionEvent::Completed);
        }
        Ok(Box::new(FakeSubscription {
            events,
            gate: self.gate.clone(),
            heartbeats: Arc::clone(&self.heartbeats),
            error_at_end: failure == Some(GenerationFailure::ChannelError),
        }))
    }

    async fn fetch_outputs(&self, job_id: &str) -> Result<Vec<OutputDescriptor>> {
        if self.failure() == Some(GenerationFailure::NoOutputs) {
            return Ok(Vec::new());
        }
        Ok((0..self.images_per_job)
            .map(|i| OutputDescriptor {
                filename: format!("{job_id}_{i}.png"),
                subfolder: String::new(),
                kind: "output".to_string(),
            })
            .collect())
    }

    async fn retrieve(&self, output: &OutputDescriptor) -> Result<Vec<u8>> {
        if self.failure() == Some(GenerationFailure::SecondRetrieve)
            && output.filename.ends_with("_1.png")
        {
            return Err(Error::generation(format!("{} is gone", output.filename)));
        }
        Ok(png_bytes(64, 96))
    }
}
