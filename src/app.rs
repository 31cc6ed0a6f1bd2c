//! Service construction and worker lifecycle.
//!
//! Every shared registry is built once here and handed to the workers by
//! `Arc`. Missing external tools fail construction, so no worker ever
//! starts without them.

use crate::cache::CacheIndex;
use crate::config::Config;
use crate::coordination::{sleep_unless_cancelled, YieldSignal};
use crate::crawler::Crawler;
use crate::error::Result;
use crate::generation::{GenerationService, GenerationSessions, GenerationWorker};
use crate::images::{StillConverter, ThumbnailGenerator, Thumbnailer};
use crate::istream::{SessionRegistry, TranscodeScheduler};
use crate::slideshow::SlideshowService;
use crate::transcode::{FfmpegTranscoder, PreviewService, TargetProfile, Transcoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vintagecast_av::MediaTool;
use vintagecast_common::paths::is_video_file;

/// Subdirectory of the cache dir holding two-pass intermediates.
const SCRATCH_DIR: &str = "scratch";

/// The engine's shared services.
pub struct Services {
    pub config: Arc<Config>,
    pub cache: Arc<CacheIndex>,
    pub registry: Arc<SessionRegistry>,
    pub signal: Arc<YieldSignal>,
    pub transcoder: Arc<dyn Transcoder>,
    pub previews: Arc<PreviewService>,
    pub thumbnails: Arc<dyn ThumbnailGenerator>,
    pub slideshows: Arc<SlideshowService>,
    pub generation: Arc<GenerationSessions>,
}

impl Services {
    /// Locate ffmpeg and ffprobe, then build every service.
    pub fn new(config: Config) -> Result<Self> {
        let ffmpeg = MediaTool::Ffmpeg.locate(config.tools.path_for(MediaTool::Ffmpeg))?;
        let ffprobe = MediaTool::Ffprobe.locate(config.tools.path_for(MediaTool::Ffprobe))?;
        info!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "Media tools found");

        let transcoder = Arc::new(FfmpegTranscoder::new(
            ffmpeg.clone(),
            ffprobe,
            config.transcode.hw_accel,
        ));
        Self::with_transcoder(config, Some(ffmpeg), transcoder)
    }

    /// Build the services around an existing transcoder. Without `ffmpeg`,
    /// only stills the `image` crate decodes get thumbnails.
    pub fn with_transcoder(
        config: Config,
        ffmpeg: Option<PathBuf>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self> {
        let cache = Arc::new(CacheIndex::open(config.cache_dir())?);
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&cache)));
        let previews = Arc::new(PreviewService::new(
            Arc::clone(&cache),
            Arc::clone(&transcoder),
            TargetProfile::preview(&config.preview),
        ));
        let thumbnails: Arc<dyn ThumbnailGenerator> = Arc::new(Thumbnailer::new(
            Arc::clone(&cache),
            ffmpeg.clone(),
            &config.thumbnails,
        ));
        let generation = Arc::new(GenerationSessions::new(
            config.generation.default_model.as_str(),
        ));
        let slideshows = Arc::new(SlideshowService::new(
            Arc::clone(&cache),
            StillConverter::new(ffmpeg, &config.slideshow),
            Arc::clone(&generation),
            &config.slideshow,
        ));

        Ok(Self {
            config: Arc::new(config),
            cache,
            registry,
            signal: Arc::new(YieldSignal::new()),
            transcoder,
            previews,
            thumbnails,
            slideshows,
            generation,
        })
    }

    pub fn scheduler(&self) -> TranscodeScheduler {
        let transcode = &self.config.transcode;
        TranscodeScheduler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            Arc::clone(&self.transcoder),
            Arc::clone(&self.signal),
            transcode.strategy,
            TargetProfile::device(transcode),
            self.cache.cache_dir().join(SCRATCH_DIR),
            transcode.poll_interval(),
        )
    }

    pub fn crawler(&self) -> Crawler {
        Crawler::new(
            self.config.server.media_root.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.thumbnails),
            Arc::clone(&self.signal),
            self.config.crawler.clone(),
        )
    }

    pub fn generation_worker(&self, service: Arc<dyn GenerationService>) -> GenerationWorker {
        let config = &self.config.generation;
        GenerationWorker::new(
            Arc::clone(&self.generation),
            service,
            Arc::clone(&self.thumbnails),
            Arc::clone(&self.signal),
            self.config.generated_dir(),
        )
        .with_heartbeat(Duration::from_secs(config.heartbeat_secs))
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
    }

    /// Start the persistent workers. Must be called inside a tokio runtime
    /// when `generation` is given.
    pub fn spawn_workers(
        &self,
        shutdown: &CancellationToken,
        generation: Option<Arc<dyn GenerationService>>,
    ) -> Result<Workers> {
        let mut threads = Vec::new();

        let scheduler = self.scheduler();
        let token = shutdown.clone();
        threads.push(
            std::thread::Builder::new()
                .name("istream-scheduler".into())
                .spawn(move || scheduler.run(token))?,
        );

        if self.config.crawler.enabled {
            let crawler = self.crawler();
            let token = shutdown.clone();
            threads.push(
                std::thread::Builder::new()
                    .name("thumbnail-crawler".into())
                    .spawn(move || crawler.run(token))?,
            );
        }

        let cache = Arc::clone(&self.cache);
        let interval = Duration::from_secs(self.config.cache.flush_interval_secs.max(1));
        let token = shutdown.clone();
        threads.push(
            std::thread::Builder::new()
                .name("cache-flusher".into())
                .spawn(move || {
                    while sleep_unless_cancelled(&token, interval) {
                        if let Err(e) = cache.flush() {
                            warn!("Cache index save failed: {}", e);
                        }
                    }
                })?,
        );

        let mut tasks = Vec::new();
        if let Some(service) = generation {
            let worker = self.generation_worker(service);
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move { worker.run(token).await }));
        }

        info!(
            threads = threads.len(),
            tasks = tasks.len(),
            "Background workers started"
        );
        Ok(Workers {
            threads,
            tasks,
            cache: Arc::clone(&self.cache),
        })
    }
}

/// Handles to running workers.
pub struct Workers {
    threads: Vec<std::thread::JoinHandle<()>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    cache: Arc<CacheIndex>,
}

impl Workers {
    /// Wait for every worker to stop, then save the cache index.
    ///
    /// The shutdown token must already be cancelled.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Generation worker ended abnormally: {}", e);
            }
        }

        let threads = self.threads;
        let joined = tokio::task::spawn_blocking(move || {
            for handle in threads {
                let name = handle.thread().name().unwrap_or("worker").to_string();
                if handle.join().is_err() {
                    error!(thread = %name, "Worker thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            error!("Failed to join worker threads: {}", e);
        }

        match self.cache.flush() {
            Ok(true) => info!("Cache index saved"),
            Ok(false) => {}
            Err(e) => error!("Final cache index save failed: {}", e),
        }
    }
}

/// Videos directly inside `dir`, by name, as canonical identities.
pub fn folder_playlist(dir: &Path) -> Result<Vec<String>> {
    let mut videos = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_video_file(&path) {
            videos.push(path.canonicalize()?);
        }
    }
    videos.sort();
    Ok(videos
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect())
}
