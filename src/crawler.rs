//! Background thumbnail crawler.
//!
//! Walks the media tree in name order, creating whatever thumbnails are
//! missing, then sleeps for a long interval and starts over. Before each
//! item it blocks on the yield signal, so transcodes and generation always
//! win; once the signal drops it carries on with the same item.

use crate::cache::{CacheClass, CacheIndex};
use crate::config::CrawlerConfig;
use crate::coordination::{sleep_unless_cancelled, YieldSignal};
use crate::images::ThumbnailGenerator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vintagecast_common::paths::{classify, is_system_dir_name, MediaKind};
use walkdir::WalkDir;

/// Outcome of one pass over the media tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Media files looked at.
    pub visited: usize,
    /// Thumbnails written.
    pub created: usize,
    pub failed: usize,
    /// The pass stopped early because of shutdown.
    pub interrupted: bool,
}

pub struct Crawler {
    media_root: PathBuf,
    cache: Arc<CacheIndex>,
    thumbnails: Arc<dyn ThumbnailGenerator>,
    signal: Arc<YieldSignal>,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(
        media_root: PathBuf,
        cache: Arc<CacheIndex>,
        thumbnails: Arc<dyn ThumbnailGenerator>,
        signal: Arc<YieldSignal>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            media_root,
            cache,
            thumbnails,
            signal,
            config,
        }
    }

    /// Crawl repeatedly until `shutdown` fires.
    pub fn run(&self, shutdown: CancellationToken) {
        info!(root = %self.media_root.display(), "Thumbnail crawler started");

        if sleep_unless_cancelled(&shutdown, Duration::from_secs(self.config.start_delay_secs)) {
            loop {
                let stats = self.crawl_pass(&shutdown);
                if stats.interrupted {
                    break;
                }
                info!(
                    visited = stats.visited,
                    created = stats.created,
                    failed = stats.failed,
                    "Thumbnail pass finished, sleeping {}s",
                    self.config.pass_interval_secs
                );
                if !sleep_unless_cancelled(
                    &shutdown,
                    Duration::from_secs(self.config.pass_interval_secs),
                ) {
                    break;
                }
            }
        }

        info!("Thumbnail crawler stopped");
    }

    /// One full walk of the media tree.
    pub fn crawl_pass(&self, shutdown: &CancellationToken) -> CrawlStats {
        let mut stats = CrawlStats::default();
        let item_delay = Duration::from_millis(self.config.item_delay_ms);

        for entry in self.walk() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(kind) = classify(entry.path()) else {
                continue;
            };

            if !self.signal.wait_lowered(shutdown) {
                stats.interrupted = true;
                break;
            }

            stats.visited += 1;
            let (created, failed) = self.thumbnail_item(entry.path(), kind);
            stats.created += created;
            stats.failed += failed;

            if created + failed > 0 && !sleep_unless_cancelled(shutdown, item_delay) {
                stats.interrupted = true;
                break;
            }
        }

        stats
    }

    fn walk(&self) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
        let cache_dir = self.cache.cache_dir().to_path_buf();
        WalkDir::new(&self.media_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                entry.path() != cache_dir.as_path()
                    && !is_system_dir_name(&entry.file_name().to_string_lossy())
            })
    }

    /// Returns (created, failed) counts for `path`.
    fn thumbnail_item(&self, path: &Path, kind: MediaKind) -> (usize, usize) {
        let classes: &[CacheClass] = match kind {
            MediaKind::Video => &[CacheClass::Thumbnails],
            MediaKind::Image | MediaKind::ConvertibleImage => {
                &[CacheClass::Thumbnails, CacheClass::ImageryThumbs]
            }
        };

        let identity = path.to_string_lossy();
        let mut created = 0;
        let mut failed = 0;
        for &class in classes {
            if self.cache.lookup(class, &identity).is_some() {
                continue;
            }
            match self.thumbnails.ensure_thumbnail(path, class) {
                Ok(_) => created += 1,
                Err(e) => {
                    failed += 1;
                    warn!(path = %path.display(), class = %class, "Thumbnail failed: {}", e);
                }
            }
        }
        (created, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(PathBuf, CacheClass)>>,
    }

    impl ThumbnailGenerator for Recorder {
        fn ensure_thumbnail(&self, source: &Path, class: CacheClass) -> Result<PathBuf> {
            self.calls.lock().push((source.to_path_buf(), class));
            Ok(source.to_path_buf())
        }
    }

    fn crawler(root: &Path, cache: Arc<CacheIndex>, recorder: Arc<Recorder>) -> Crawler {
        let config = CrawlerConfig {
            item_delay_ms: 0,
            ..Default::default()
        };
        Crawler::new(
            root.to_path_buf(),
            cache,
            recorder,
            Arc::new(YieldSignal::new()),
            config,
        )
    }

    #[test]
    fn visits_media_in_name_order_and_skips_system_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::create_dir_all(root.join(".Trash-1000")).unwrap();
        std::fs::write(root.join("a.mp4"), b"v").unwrap();
        std::fs::write(root.join("b/c.jpg"), b"i").unwrap();
        std::fs::write(root.join(".Trash-1000/old.mp4"), b"v").unwrap();
        std::fs::write(root.join("readme.txt"), b"t").unwrap();

        let cache = Arc::new(CacheIndex::open(root.join("_cache")).unwrap());
        let recorder = Arc::new(Recorder::default());
        let stats = crawler(root, cache, Arc::clone(&recorder)).crawl_pass(&CancellationToken::new());

        assert_eq!(stats.visited, 2);
        assert_eq!(stats.created, 3);
        assert!(!stats.interrupted);
        let calls = recorder.calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                (root.join("a.mp4"), CacheClass::Thumbnails),
                (root.join("b/c.jpg"), CacheClass::Thumbnails),
                (root.join("b/c.jpg"), CacheClass::ImageryThumbs),
            ]
        );
    }

    #[test]
    fn cached_items_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let clip = root.join("a.mp4");
        std::fs::write(&clip, b"v").unwrap();

        let cache = Arc::new(CacheIndex::open(root.join("_cache")).unwrap());
        let thumb = root.join("thumb.jpg");
        std::fs::write(&thumb, b"j").unwrap();
        cache.insert(CacheClass::Thumbnails, &clip.to_string_lossy(), &thumb);

        let recorder = Arc::new(Recorder::default());
        let stats = crawler(root, cache, Arc::clone(&recorder)).crawl_pass(&CancellationToken::new());
        // thumb.jpg itself is a still and gets thumbnailed; the clip does not.
        assert_eq!(stats.visited, 2);
        assert!(recorder.calls.lock().iter().all(|(p, _)| p != &clip));
    }

    #[test]
    fn cache_dir_is_not_crawled() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cache = Arc::new(CacheIndex::open(root.join("_cache")).unwrap());
        std::fs::create_dir_all(root.join("_cache/thumbnails")).unwrap();
        std::fs::write(root.join("_cache/thumbnails/x.jpg"), b"j").unwrap();

        let recorder = Arc::new(Recorder::default());
        let stats = crawler(root, cache, Arc::clone(&recorder)).crawl_pass(&CancellationToken::new());
        assert_eq!(stats.visited, 0);
    }

    #[test]
    fn shutdown_while_blocked_interrupts_pass() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.mp4"), b"v").unwrap();

        let cache = Arc::new(CacheIndex::open(root.join("_cache")).unwrap());
        let recorder = Arc::new(Recorder::default());
        let crawler = crawler(root, cache, Arc::clone(&recorder));
        let _guard = crawler.signal.raise();

        let token = CancellationToken::new();
        token.cancel();
        let stats = crawler.crawl_pass(&token);
        assert!(stats.interrupted);
        assert!(recorder.calls.lock().is_empty());
    }
}
