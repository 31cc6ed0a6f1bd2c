//! Slideshow sessions and the batch pre-transcoder.
//!
//! A slideshow converts its stills ahead of the viewer in fixed-size
//! batches. Each session has a transcode cursor (everything before it has
//! been attempted) and a single-flight flag so at most one batch runs per
//! session. Batches run on short-lived threads and ignore the yield signal.

use crate::cache::{CacheClass, CacheIndex};
use crate::config::SlideshowConfig;
use crate::error::{Error, Result};
use crate::generation::GenerationSessions;
use crate::images::StillConverter;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use vintagecast_common::paths::{is_animated_passthrough, is_still_image, is_system_dir_name};
use vintagecast_common::{GenerationSessionId, SlideshowId};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideshowSource {
    /// Stills in a folder, optionally including subfolders.
    Directory { path: PathBuf, recursive: bool },
    /// The history of a generation session, refreshed on every view.
    GenerationFeed(GenerationSessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOrder {
    #[default]
    Sequential,
    Shuffled,
}

struct SlideshowState {
    source: SlideshowSource,
    order: PlaybackOrder,
    playlist: Vec<PathBuf>,
    cursor: usize,
    in_progress: bool,
}

impl SlideshowState {
    fn pretranscodes(&self) -> bool {
        matches!(self.source, SlideshowSource::Directory { .. })
    }
}

/// Point-in-time view of a slideshow.
#[derive(Debug, Clone, Serialize)]
pub struct SlideshowSnapshot {
    pub id: SlideshowId,
    pub source: SlideshowSource,
    pub order: PlaybackOrder,
    pub len: usize,
    pub cursor: usize,
    pub in_progress: bool,
}

/// What the viewer should display for a requested index.
#[derive(Debug)]
pub struct SlideshowView {
    /// Requested index clamped into the playlist.
    pub index: usize,
    pub len: usize,
    /// Source item at `index`, if the playlist is not empty.
    pub item: Option<PathBuf>,
    /// Batch started by this view, if any.
    pub batch: Option<JoinHandle<usize>>,
}

struct Batch {
    items: Vec<PathBuf>,
    end: usize,
}

pub struct SlideshowService {
    sessions: DashMap<SlideshowId, SlideshowState>,
    cache: Arc<CacheIndex>,
    converter: StillConverter,
    generation: Arc<GenerationSessions>,
    batch_size: usize,
    trigger_distance: usize,
}

impl SlideshowService {
    pub fn new(
        cache: Arc<CacheIndex>,
        converter: StillConverter,
        generation: Arc<GenerationSessions>,
        config: &SlideshowConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            cache,
            converter,
            generation,
            batch_size: config.batch_size.max(1),
            trigger_distance: config.trigger_distance,
        }
    }

    /// Create a slideshow and start converting its first batch.
    pub fn create_session(
        self: &Arc<Self>,
        source: SlideshowSource,
        order: PlaybackOrder,
    ) -> Result<SlideshowId> {
        let mut playlist = match &source {
            SlideshowSource::Directory { path, recursive } => {
                if !path.is_dir() {
                    return Err(Error::not_found("directory", path.display()));
                }
                let items = self.collect_stills(path, *recursive)?;
                if items.is_empty() {
                    return Err(Error::validation(format!(
                        "no images in {}",
                        path.display()
                    )));
                }
                items
            }
            SlideshowSource::GenerationFeed(session) => self
                .generation
                .history(*session)
                .ok_or_else(|| Error::not_found("generation session", session))?,
        };

        if order == PlaybackOrder::Shuffled {
            playlist.shuffle(&mut rand::thread_rng());
        }

        let id = SlideshowId::new();
        let len = playlist.len();
        self.sessions.insert(
            id,
            SlideshowState {
                source,
                order,
                playlist,
                cursor: 0,
                in_progress: false,
            },
        );
        info!(slideshow_id = %id, items = len, ?order, "Created slideshow");

        self.spawn_pretranscode(id);
        Ok(id)
    }

    /// Record that the viewer is at `index`, refreshing feed playlists and
    /// starting the next batch when the viewer nears the cursor.
    pub fn on_view(self: &Arc<Self>, id: SlideshowId, index: usize) -> Result<SlideshowView> {
        self.refresh_feed(id)?;

        let (index, len, item, trigger) = {
            let state = self
                .sessions
                .get(&id)
                .ok_or_else(|| Error::not_found("slideshow", id))?;
            let len = state.playlist.len();
            let index = index.min(len.saturating_sub(1));
            let trigger = state.pretranscodes()
                && !state.in_progress
                && state.cursor < len
                && index + self.trigger_distance >= state.cursor;
            (index, len, state.playlist.get(index).cloned(), trigger)
        };

        let batch = if trigger {
            self.spawn_pretranscode(id)
        } else {
            None
        };
        Ok(SlideshowView {
            index,
            len,
            item,
            batch,
        })
    }

    /// Claim the next batch and convert it on a new thread.
    ///
    /// Returns `None` when a batch is already running for this session or
    /// there is nothing left to convert.
    pub fn spawn_pretranscode(self: &Arc<Self>, id: SlideshowId) -> Option<JoinHandle<usize>> {
        let batch = self.claim_batch(id)?;
        let service = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("slideshow-{id}"))
            .spawn(move || service.run_batch(id, batch));
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(slideshow_id = %id, "Failed to start pre-transcode thread: {}", e);
                self.release(id, None);
                None
            }
        }
    }

    /// Convert the next batch on the calling thread. Returns the number of
    /// images converted; zero if another batch holds the session.
    pub fn pretranscode(&self, id: SlideshowId) -> usize {
        match self.claim_batch(id) {
            Some(batch) => self.run_batch(id, batch),
            None => 0,
        }
    }

    /// Path of a displayable image for `index`, converting it now if the
    /// pre-transcoder has not reached it.
    pub fn ensure_image(&self, id: SlideshowId, index: usize) -> Result<PathBuf> {
        let source = self
            .sessions
            .get(&id)
            .ok_or_else(|| Error::not_found("slideshow", id))?
            .playlist
            .get(index)
            .cloned()
            .ok_or_else(|| Error::not_found("slideshow item", index))?;

        if is_animated_passthrough(&source) {
            return Ok(source);
        }
        self.convert_item(&source)
    }

    pub fn snapshot(&self, id: SlideshowId) -> Option<SlideshowSnapshot> {
        self.sessions.get(&id).map(|state| SlideshowSnapshot {
            id,
            source: state.source.clone(),
            order: state.order,
            len: state.playlist.len(),
            cursor: state.cursor,
            in_progress: state.in_progress,
        })
    }

    pub fn remove(&self, id: SlideshowId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    fn refresh_feed(&self, id: SlideshowId) -> Result<()> {
        let feed = match self.sessions.get(&id) {
            Some(state) => match state.source {
                SlideshowSource::GenerationFeed(session) => Some(session),
                SlideshowSource::Directory { .. } => None,
            },
            None => return Err(Error::not_found("slideshow", id)),
        };

        let Some(history) = feed.and_then(|session| self.generation.history(session)) else {
            return Ok(());
        };
        if let Some(mut state) = self.sessions.get_mut(&id) {
            // History only grows; the existing order is kept and new images
            // are appended, shuffled among themselves when the show is.
            let known = state.playlist.len();
            if history.len() > known {
                let mut fresh = history[known..].to_vec();
                if state.order == PlaybackOrder::Shuffled {
                    fresh.shuffle(&mut rand::thread_rng());
                }
                state.playlist.extend(fresh);
            }
        }
        Ok(())
    }

    fn claim_batch(&self, id: SlideshowId) -> Option<Batch> {
        let mut state = self.sessions.get_mut(&id)?;
        if state.in_progress || !state.pretranscodes() || state.cursor >= state.playlist.len() {
            return None;
        }
        state.in_progress = true;
        let start = state.cursor;
        let end = (start + self.batch_size).min(state.playlist.len());
        Some(Batch {
            items: state.playlist[start..end].to_vec(),
            end,
        })
    }

    fn run_batch(&self, id: SlideshowId, batch: Batch) -> usize {
        debug!(slideshow_id = %id, items = batch.items.len(), "Pre-transcoding batch");
        let mut converted = 0;
        for source in &batch.items {
            if is_animated_passthrough(source) {
                continue;
            }
            if self
                .cache
                .lookup(CacheClass::Slideshow, &source.to_string_lossy())
                .is_some()
            {
                continue;
            }
            match self.convert_item(source) {
                Ok(_) => converted += 1,
                Err(e) => warn!(
                    slideshow_id = %id,
                    source = %source.display(),
                    "Slideshow conversion failed: {}",
                    e
                ),
            }
        }
        self.release(id, Some(batch.end));
        debug!(slideshow_id = %id, converted, "Batch finished");
        converted
    }

    fn release(&self, id: SlideshowId, cursor: Option<usize>) {
        if let Some(mut state) = self.sessions.get_mut(&id) {
            if let Some(cursor) = cursor {
                state.cursor = cursor;
            }
            state.in_progress = false;
        }
    }

    fn convert_item(&self, source: &Path) -> Result<PathBuf> {
        let identity = source.to_string_lossy();
        if let Some(path) = self.cache.lookup(CacheClass::Slideshow, &identity) {
            return Ok(path);
        }
        let target = self
            .cache
            .artifact_path(CacheClass::Slideshow, &identity, "jpg")?;
        self.converter.convert(source, &target)?;
        self.cache.insert(CacheClass::Slideshow, &identity, &target);
        Ok(target)
    }

    fn collect_stills(&self, dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        let cache_dir = self.cache.cache_dir().to_path_buf();
        let walker = WalkDir::new(dir)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && (entry.path() == cache_dir.as_path()
                            || is_system_dir_name(&entry.file_name().to_string_lossy())))
            });

        let mut items = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| Error::internal(format!("walking {}: {}", dir.display(), e)))?;
            if entry.file_type().is_file() && is_still_image(entry.path()) {
                items.push(entry.into_path());
            }
        }
        Ok(items)
    }
}
