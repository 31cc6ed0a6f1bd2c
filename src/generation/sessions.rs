//! Generation session table.
//!
//! All sessions live behind one lock. The worker claims a queued session by
//! flipping it to `generating` under that lock, so two claimers can never
//! pick the same session.

use super::settings::{GenerationSettings, SettingsUpdate};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use vintagecast_common::GenerationSessionId;

/// Lifecycle state of a generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Idle,
    Queued,
    Generating,
    Failed,
}

impl GenerationStatus {
    /// Queued or generating.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Generating)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSession {
    pub id: GenerationSessionId,
    pub status: GenerationStatus,
    pub settings: GenerationSettings,
    /// Saved images, oldest first.
    pub history: Vec<PathBuf>,
    pub current_index: usize,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A session handed to the worker by [`GenerationSessions::claim_next_queued`].
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub session: GenerationSessionId,
    pub settings: GenerationSettings,
}

pub struct GenerationSessions {
    sessions: Mutex<Vec<GenerationSession>>,
    default_model: String,
}

impl GenerationSessions {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            default_model: default_model.into(),
        }
    }

    /// Create an idle session with default settings.
    pub fn create(&self) -> GenerationSessionId {
        let session = GenerationSession {
            id: GenerationSessionId::new(),
            status: GenerationStatus::Idle,
            settings: GenerationSettings::with_model(self.default_model.as_str()),
            history: Vec::new(),
            current_index: 0,
            last_error: None,
            created_at: Utc::now(),
        };
        let id = session.id;
        self.sessions.lock().push(session);
        info!(session_id = %id, "Created generation session");
        id
    }

    pub fn get(&self, id: GenerationSessionId) -> Option<GenerationSession> {
        self.sessions.lock().iter().find(|s| s.id == id).cloned()
    }

    pub fn status(&self, id: GenerationSessionId) -> Option<GenerationStatus> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.status)
    }

    pub fn history(&self, id: GenerationSessionId) -> Option<Vec<PathBuf>> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.history.clone())
    }

    /// Validate and apply a settings change.
    ///
    /// A running generation keeps the settings it was claimed with; the
    /// change applies from the next submission.
    pub fn update_settings(&self, id: GenerationSessionId, update: SettingsUpdate) -> Result<()> {
        self.with_session(id, |session| session.settings.apply(update))
    }

    /// Queue the session for generation.
    ///
    /// Returns `false` if it was already queued.
    pub fn enqueue(&self, id: GenerationSessionId) -> Result<bool> {
        self.with_session(id, |session| match session.status {
            GenerationStatus::Queued => Ok(false),
            GenerationStatus::Generating => Err(Error::conflict(format!(
                "generation session {} is already generating",
                session.id
            ))),
            GenerationStatus::Idle | GenerationStatus::Failed => {
                session.settings.validate()?;
                session.status = GenerationStatus::Queued;
                session.last_error = None;
                info!(session_id = %session.id, "Generation queued");
                Ok(true)
            }
        })
    }

    pub fn set_autogeneration(&self, id: GenerationSessionId, enabled: bool) -> Result<()> {
        self.with_session(id, |session| {
            session.settings.autogeneration = enabled;
            debug!(session_id = %session.id, enabled, "Autogeneration toggled");
            Ok(())
        })
    }

    /// Stop autogeneration. A queued session goes back to idle; a running
    /// one finishes its current image and then stays idle.
    pub fn stop(&self, id: GenerationSessionId) -> Result<()> {
        self.with_session(id, |session| {
            session.settings.autogeneration = false;
            if session.status == GenerationStatus::Queued {
                session.status = GenerationStatus::Idle;
            }
            info!(session_id = %session.id, "Generation stopped");
            Ok(())
        })
    }

    /// Move the history cursor and return the image there.
    pub fn navigate(&self, id: GenerationSessionId, index: usize) -> Result<PathBuf> {
        self.with_session(id, |session| {
            let path = session
                .history
                .get(index)
                .cloned()
                .ok_or_else(|| Error::not_found("generated image", index))?;
            session.current_index = index;
            Ok(path)
        })
    }

    /// Atomically flip the oldest queued session to `generating`.
    pub fn claim_next_queued(&self) -> Option<ClaimedJob> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.status == GenerationStatus::Queued)?;
        session.status = GenerationStatus::Generating;
        Some(ClaimedJob {
            session: session.id,
            settings: session.settings.clone(),
        })
    }

    /// Record a finished generation.
    ///
    /// An empty `images` list counts as a failure.
    pub fn complete(&self, id: GenerationSessionId, images: Vec<PathBuf>) {
        if images.is_empty() {
            self.fail(id, "workflow produced no images");
            return;
        }

        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.iter_mut().find(|s| s.id == id) else {
            warn!(session_id = %id, "Finished generation for unknown session");
            return;
        };
        session.history.extend(images);
        session.current_index = session.history.len() - 1;
        session.status = if session.settings.autogeneration {
            GenerationStatus::Queued
        } else {
            GenerationStatus::Idle
        };
        info!(
            session_id = %id,
            status = ?session.status,
            history = session.history.len(),
            "Generation finished"
        );
    }

    /// Mark the session failed. History is left untouched.
    pub fn fail(&self, id: GenerationSessionId, reason: impl Into<String>) {
        let reason = reason.into();
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.iter_mut().find(|s| s.id == id) {
            warn!(session_id = %id, "Generation failed: {}", reason);
            session.status = GenerationStatus::Failed;
            session.last_error = Some(reason);
        }
    }

    /// Whether any session is queued or generating.
    pub fn has_pending(&self) -> bool {
        self.sessions.lock().iter().any(|s| s.status.is_pending())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_session<T>(
        &self,
        id: GenerationSessionId,
        f: impl FnOnce(&mut GenerationSession) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::not_found("generation session", id))?;
        f(session)
    }
}
