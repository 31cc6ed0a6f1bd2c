use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use vintagecast_common::TranscodeSessionId;

/// Where a session's playlist came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Every video in a folder.
    BatchFolder,
    /// One file opened directly.
    SingleFile,
    /// A download from an external site.
    ExternalImport,
}

/// One unit of scheduler work. Immutable once queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeTask {
    /// Identity of the source item (its canonical path string).
    pub identity: String,
    /// Final artifact location.
    pub output: PathBuf,
}

/// Where a playlist item stands within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Completed,
    Failed,
    Queued,
    Prioritized,
    InFlight,
    NotVisited,
}

#[derive(Debug)]
pub(crate) struct TranscodeSession {
    pub(crate) id: TranscodeSessionId,
    pub(crate) kind: SessionKind,
    pub(crate) scope: PathBuf,
    pub(crate) playlist: Vec<String>,
    pub(crate) main_queue: VecDeque<TranscodeTask>,
    pub(crate) priority_queue: VecDeque<TranscodeTask>,
    pub(crate) completed: HashSet<String>,
    pub(crate) failed: HashSet<String>,
    pub(crate) current: Option<TranscodeTask>,
    pub(crate) progress: HashMap<String, f64>,
    pub(crate) aborted: bool,
    pub(crate) started: bool,
    pub(crate) created_at: DateTime<Utc>,
}

impl TranscodeSession {
    pub(crate) fn new(
        kind: SessionKind,
        scope: PathBuf,
        playlist: Vec<String>,
        tasks: Vec<TranscodeTask>,
        completed: HashSet<String>,
    ) -> Self {
        Self {
            id: TranscodeSessionId::new(),
            kind,
            scope,
            playlist,
            main_queue: tasks.into(),
            priority_queue: VecDeque::new(),
            completed,
            failed: HashSet::new(),
            current: None,
            progress: HashMap::new(),
            aborted: false,
            started: false,
            created_at: Utc::now(),
        }
    }

    /// Drop all queued work and refuse further fetches.
    pub(crate) fn abort(&mut self) {
        self.aborted = true;
        self.main_queue.clear();
        self.priority_queue.clear();
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn snapshot(&self, is_active: bool) -> SessionSnapshot {
        let in_order = |set: &HashSet<String>| -> Vec<String> {
            self.playlist
                .iter()
                .filter(|id| set.contains(*id))
                .cloned()
                .collect()
        };

        SessionSnapshot {
            id: self.id,
            kind: self.kind,
            scope: self.scope.clone(),
            playlist: self.playlist.clone(),
            completed: in_order(&self.completed),
            failed: in_order(&self.failed),
            queued: self.main_queue.iter().map(|t| t.identity.clone()).collect(),
            prioritized: self
                .priority_queue
                .iter()
                .map(|t| t.identity.clone())
                .collect(),
            current: self.current.as_ref().map(|t| t.identity.clone()),
            progress: self
                .progress
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            aborted: self.aborted,
            started: self.started,
            is_active,
            created_at: self.created_at,
        }
    }
}

/// Point-in-time copy of a session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: TranscodeSessionId,
    pub kind: SessionKind,
    pub scope: PathBuf,
    pub playlist: Vec<String>,
    /// Completed identities in playlist order.
    pub completed: Vec<String>,
    /// Failed identities in playlist order.
    pub failed: Vec<String>,
    /// Main queue, front first.
    pub queued: Vec<String>,
    /// Priority queue, front first.
    pub prioritized: Vec<String>,
    pub current: Option<String>,
    /// Percent complete of in-flight items.
    pub progress: BTreeMap<String, f64>,
    pub aborted: bool,
    pub started: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn item_state(&self, identity: &str) -> ItemState {
        if self.current.as_deref() == Some(identity) {
            ItemState::InFlight
        } else if self.completed.iter().any(|i| i == identity) {
            ItemState::Completed
        } else if self.failed.iter().any(|i| i == identity) {
            ItemState::Failed
        } else if self.prioritized.iter().any(|i| i == identity) {
            ItemState::Prioritized
        } else if self.queued.iter().any(|i| i == identity) {
            ItemState::Queued
        } else {
            ItemState::NotVisited
        }
    }

    /// Both queues empty and nothing in flight.
    pub fn is_terminal(&self) -> bool {
        self.queued.is_empty() && self.prioritized.is_empty() && self.current.is_none()
    }

    pub fn progress_of(&self, identity: &str) -> Option<f64> {
        self.progress.get(identity).copied()
    }
}
