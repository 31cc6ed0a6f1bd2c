//! The transcode session table.
//!
//! Exactly one session is active at a time. Every mutation, including the
//! scheduler's, happens under the single registry lock, and the lock is never
//! held across transcoder or filesystem work.

use super::session::{SessionKind, SessionSnapshot, TranscodeSession, TranscodeTask};
use crate::cache::{CacheClass, CacheIndex};
use crate::error::{Error, Result};
use crate::transcode::DEVICE_EXTENSION;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use vintagecast_common::TranscodeSessionId;

/// What [`SessionRegistry::reset_active`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// There was no active session.
    NoActiveSession,
    /// Nothing was in flight; the session is idle now.
    Immediate,
    /// A task is still running and will finish on its own.
    Deferred,
}

/// How a fetched task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Failed,
    /// Abandoned between passes; the item reverts to not visited.
    Cancelled,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<TranscodeSessionId, TranscodeSession>,
    active: Option<TranscodeSessionId>,
}

/// Owner of every [`TranscodeSession`].
pub struct SessionRegistry {
    cache: Arc<CacheIndex>,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(cache: Arc<CacheIndex>) -> Self {
        Self {
            cache,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Create a session for `playlist` and make it the active one.
    ///
    /// Items already in the cache are recorded as completed; the rest are
    /// queued in playlist order. The previous active session is aborted, and
    /// sessions aborted by earlier calls are dropped once idle.
    pub fn create_session(
        &self,
        kind: SessionKind,
        scope: impl Into<PathBuf>,
        playlist: Vec<String>,
    ) -> Result<TranscodeSessionId> {
        let mut tasks = Vec::new();
        let mut completed = HashSet::new();
        let mut seen = HashSet::new();

        for identity in &playlist {
            if !seen.insert(identity.as_str()) {
                continue;
            }
            if self.cache.lookup(CacheClass::Istream, identity).is_some() {
                completed.insert(identity.clone());
                continue;
            }
            let output = self
                .cache
                .artifact_path(CacheClass::Istream, identity, DEVICE_EXTENSION)?;
            tasks.push(TranscodeTask {
                identity: identity.clone(),
                output,
            });
        }

        let queued = tasks.len();
        let cached = completed.len();
        let session = TranscodeSession::new(kind, scope.into(), playlist, tasks, completed);
        let id = session.id;

        let mut state = self.state.lock();

        let before = state.sessions.len();
        let active = state.active;
        state
            .sessions
            .retain(|sid, s| Some(*sid) == active || !s.aborted || s.in_flight());
        let collected = before - state.sessions.len();
        if collected > 0 {
            debug!(count = collected, "Collected aborted transcode sessions");
        }

        if let Some(previous) = active.and_then(|a| state.sessions.get_mut(&a)) {
            previous.abort();
            info!(session_id = %previous.id, "Aborted previous transcode session");
        }

        state.sessions.insert(id, session);
        state.active = Some(id);

        info!(
            session_id = %id,
            kind = ?kind,
            queued,
            cached,
            "Created transcode session"
        );
        Ok(id)
    }

    /// Allow the scheduler to consume the session.
    pub fn start(&self, id: TranscodeSessionId) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("transcode session", id))?;
        session.started = true;
        Ok(())
    }

    /// Move `identity` to the priority queue and rotate the main queue so it
    /// continues from the item after it, wrapping around.
    ///
    /// Returns `false` (and changes nothing) when the item is not in the main
    /// queue. A successful move also starts the session.
    pub fn prioritize(&self, id: TranscodeSessionId, identity: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("transcode session", id))?;

        let Some(pos) = session
            .main_queue
            .iter()
            .position(|t| t.identity == identity)
        else {
            return Ok(false);
        };

        if let Some(task) = session.main_queue.remove(pos) {
            session.priority_queue.push_back(task);
        }

        if let Some(anchor) = session.playlist.iter().position(|p| p == identity) {
            let len = session.playlist.len();
            let rank: HashMap<&str, usize> = session
                .playlist
                .iter()
                .enumerate()
                .map(|(i, p)| (p.as_str(), (i + len - anchor - 1) % len))
                .collect();
            session
                .main_queue
                .make_contiguous()
                .sort_by_key(|t| rank.get(t.identity.as_str()).copied().unwrap_or(usize::MAX));
        }

        session.started = true;
        debug!(session_id = %id, identity, "Prioritized item");
        Ok(true)
    }

    /// Abort the active session.
    ///
    /// Both queues are emptied at once. A task already running is left to
    /// finish and is recorded normally.
    pub fn reset_active(&self) -> ResetOutcome {
        let mut state = self.state.lock();
        let Some(active) = state.active else {
            return ResetOutcome::NoActiveSession;
        };
        let Some(session) = state.sessions.get_mut(&active) else {
            return ResetOutcome::NoActiveSession;
        };

        session.abort();
        if session.in_flight() {
            info!(session_id = %active, "Reset requested; waiting for in-flight task");
            ResetOutcome::Deferred
        } else {
            info!(session_id = %active, "Reset transcode session");
            ResetOutcome::Immediate
        }
    }

    pub fn active_id(&self) -> Option<TranscodeSessionId> {
        self.state.lock().active
    }

    pub fn snapshot(&self, id: TranscodeSessionId) -> Option<SessionSnapshot> {
        let state = self.state.lock();
        let active = state.active;
        state
            .sessions
            .get(&id)
            .map(|s| s.snapshot(active == Some(id)))
    }

    pub fn active_snapshot(&self) -> Option<SessionSnapshot> {
        let id = self.active_id()?;
        self.snapshot(id)
    }

    /// Number of sessions still held, active or not.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Whether the session was aborted. Unknown sessions count as aborted.
    pub fn is_aborted(&self, id: TranscodeSessionId) -> bool {
        self.state
            .lock()
            .sessions
            .get(&id)
            .map_or(true, |s| s.aborted)
    }

    /// Pop the next task of the active session, priority queue first.
    pub(crate) fn fetch_next(&self) -> Option<(TranscodeSessionId, TranscodeTask)> {
        let mut state = self.state.lock();
        let active = state.active?;
        let session = state.sessions.get_mut(&active)?;

        if session.aborted || !session.started || session.in_flight() {
            return None;
        }

        let task = session
            .priority_queue
            .pop_front()
            .or_else(|| session.main_queue.pop_front())?;

        session.progress.insert(task.identity.clone(), 0.0);
        session.current = Some(task.clone());
        Some((active, task))
    }

    pub(crate) fn report_progress(&self, id: TranscodeSessionId, identity: &str, percent: f64) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(&id) {
            if session.current.as_ref().is_some_and(|t| t.identity == identity) {
                session
                    .progress
                    .insert(identity.to_string(), percent.clamp(0.0, 100.0));
            }
        }
    }

    pub(crate) fn finish(&self, id: TranscodeSessionId, identity: &str, outcome: TaskOutcome) {
        let mut state = self.state.lock();
        let Some(session) = state.sessions.get_mut(&id) else {
            return;
        };

        match outcome {
            TaskOutcome::Completed => {
                session.completed.insert(identity.to_string());
            }
            TaskOutcome::Failed => {
                session.failed.insert(identity.to_string());
            }
            TaskOutcome::Cancelled => {}
        }

        if session.current.as_ref().is_some_and(|t| t.identity == identity) {
            session.current = None;
        }
        session.progress.remove(identity);
    }
}
