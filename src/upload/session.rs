//! Upload session registry.
//!
//! Issues upload ids and tracks where each in-flight upload is in its
//! lifecycle:
//!
//! ```text
//! open_session()        begin_completion()       succeed()
//!  ──────────▶ Receiving ───────────────▶ Completing ─────────▶ (retired)
//!                                              │
//!                                              │ fail(stage)
//!                                              ▼
//!                                       Failed { stage }
//! ```
//!
//! `Completing` doubles as a single-flight guard: a second completion request
//! for the same upload is rejected instead of racing the first one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{IngestError, StoreError};

// =============================================================================
// Identifiers and States
// =============================================================================

/// Opaque upload session token.
///
/// Always the canonical hyphenated form of a UUID, which also makes it safe to
/// use as a directory name in scratch storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().hyphenated().to_string())
    }

    /// Parse a client-supplied upload id.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        Uuid::parse_str(raw.trim())
            .map(|uuid| SessionId(uuid.hyphenated().to_string()))
            .map_err(|_| StoreError::InvalidSessionId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stage an upload was in when something happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Receiving,
    Completing,
    Validating,
    Assembling,
    Tiling,
    Registering,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Receiving => "receiving",
            Stage::Completing => "completing",
            Stage::Validating => "validating",
            Stage::Assembling => "assembling",
            Stage::Tiling => "tiling",
            Stage::Registering => "registering",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting chunks
    Receiving,
    /// A completion request owns the session
    Completing,
    /// Pipeline failed; the session can only be swept
    Failed { stage: Stage },
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Receiving => f.write_str("receiving chunks"),
            SessionState::Completing => f.write_str("already completing"),
            SessionState::Failed { stage } => write!(f, "failed while {}", stage),
        }
    }
}

/// Snapshot of a session.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
}

struct SessionEntry {
    created_at: DateTime<Utc>,
    opened: Instant,
    state: SessionState,
}

// =============================================================================
// Session Registry
// =============================================================================

/// In-memory registry of upload sessions.
///
/// The map is guarded by a synchronous mutex: every critical section is a
/// handful of map operations and never awaits, and it lets [`CompletionGuard`]
/// settle the session from `Drop`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new session in the `Receiving` state.
    pub fn open_session(&self) -> UploadSession {
        let mut sessions = self.lock();

        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            error!(upload_id = %id, "upload id collision");
            debug_assert!(false, "upload id collision: {}", id);
            id = SessionId::generate();
        }

        let entry = SessionEntry {
            created_at: Utc::now(),
            opened: Instant::now(),
            state: SessionState::Receiving,
        };
        let session = UploadSession {
            id: id.clone(),
            created_at: entry.created_at,
            state: entry.state,
        };
        sessions.insert(id, entry);
        session
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<UploadSession> {
        self.lock().get(id).map(|entry| UploadSession {
            id: id.clone(),
            created_at: entry.created_at,
            state: entry.state,
        })
    }

    /// Fail unless the session exists and is still accepting chunks.
    pub fn ensure_receiving(&self, id: &SessionId) -> Result<(), IngestError> {
        match self.lock().get(id) {
            None => Err(unknown(id)),
            Some(entry) if entry.state == SessionState::Receiving => Ok(()),
            Some(entry) => Err(conflict(id, entry.state)),
        }
    }

    /// Move the session from `Receiving` to `Completing`.
    ///
    /// The returned guard must be settled with [`CompletionGuard::succeed`] or
    /// [`CompletionGuard::fail`]; dropping it unsettled marks the session failed.
    pub fn begin_completion(
        self: &Arc<Self>,
        id: &SessionId,
    ) -> Result<CompletionGuard, IngestError> {
        let mut sessions = self.lock();
        let entry = sessions.get_mut(id).ok_or_else(|| unknown(id))?;

        if entry.state != SessionState::Receiving {
            return Err(conflict(id, entry.state));
        }
        entry.state = SessionState::Completing;
        debug!(upload_id = %id, "completion started");

        Ok(CompletionGuard {
            registry: Arc::clone(self),
            id: id.clone(),
            settled: false,
        })
    }

    /// Remove every session older than `ttl` that is not mid-completion.
    ///
    /// Returns the ids that were removed so their scratch data can be reclaimed.
    pub fn sweep_expired(&self, ttl: Duration) -> Vec<SessionId> {
        let now = Instant::now();
        let mut sessions = self.lock();

        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, entry)| {
                entry.state != SessionState::Completing
                    && now.saturating_duration_since(entry.opened) >= ttl
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
        }
        expired
    }

    /// Whether the registry currently tracks `id`.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn settle(&self, id: &SessionId, outcome: Result<(), Stage>) {
        let mut sessions = self.lock();
        match outcome {
            Ok(()) => {
                sessions.remove(id);
            }
            Err(stage) => {
                if let Some(entry) = sessions.get_mut(id) {
                    entry.state = SessionState::Failed { stage };
                }
            }
        }
    }
}

fn unknown(id: &SessionId) -> IngestError {
    IngestError::UnknownSession {
        upload_id: id.to_string(),
    }
}

fn conflict(id: &SessionId, state: SessionState) -> IngestError {
    IngestError::SessionConflict {
        upload_id: id.to_string(),
        state: state.to_string(),
    }
}

// =============================================================================
// Completion Guard
// =============================================================================

/// Exclusive ownership of a session while its completion pipeline runs.
pub struct CompletionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
    settled: bool,
}

impl CompletionGuard {
    /// Pipeline finished: retire the session.
    pub fn succeed(mut self) {
        self.settled = true;
        self.registry.settle(&self.id, Ok(()));
    }

    /// Pipeline failed at `stage`: the session becomes absorbing `Failed`.
    pub fn fail(mut self, stage: Stage) {
        self.settled = true;
        self.registry.settle(&self.id, Err(stage));
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.settled {
            warn!(upload_id = %self.id, "completion abandoned without a result");
            self.registry.settle(&self.id, Err(Stage::Completing));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
