//! Generation sessions
//!
//! A session is the exclusive claim on the GPU for one request: the backend
//! being used, its process, the resident model and the lifecycle state. The
//! [`ResourceArbiter`] is the only writer; everything else reads snapshots.

pub mod arbiter;

pub use arbiter::{ArbiterSettings, ResourceArbiter, SessionGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use crate::backend::ImageArtifact;
use crate::types::{BackendKind, ProcessState, SessionState};

/// Transitions kept for [`ResourceArbiter::transitions`].
pub const TRANSITION_HISTORY: usize = 64;

/// The current (non-idle) session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub backend: BackendKind,
    pub state: SessionState,
    pub model: Option<String>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// `None` when idle
    pub session: Option<Session>,
    pub processes: BTreeMap<BackendKind, ProcessState>,
}

impl SessionSnapshot {
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(SessionState::Idle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionTransition {
    pub backend: BackendKind,
    pub from: SessionState,
    pub to: SessionState,
    pub model: Option<String>,
    pub at: Instant,
}

/// One unit of work for the arbiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRequest {
    Image { model_key: String, prompt: String },
    Completion { persona: Option<String>, message: String },
}

impl GenerationRequest {
    pub fn backend(&self) -> BackendKind {
        match self {
            GenerationRequest::Image { .. } => BackendKind::Image,
            GenerationRequest::Completion { .. } => BackendKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutput {
    Image(ImageArtifact),
    Text(String),
}

/// Mutable session bookkeeping behind the arbiter's lock.
#[derive(Debug)]
pub(crate) struct SessionBoard {
    current: Option<Session>,
    processes: BTreeMap<BackendKind, ProcessState>,
    history: VecDeque<SessionTransition>,
}

impl Default for SessionBoard {
    fn default() -> Self {
        Self {
            current: None,
            processes: BackendKind::ALL
                .into_iter()
                .map(|kind| (kind, ProcessState::NotStarted))
                .collect(),
            history: VecDeque::with_capacity(TRANSITION_HISTORY),
        }
    }
}

impl SessionBoard {
    pub(crate) fn transition(&mut self, backend: BackendKind, to: SessionState, model: Option<&str>) {
        let from = self
            .current
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(SessionState::Idle);

        match to {
            SessionState::Idle => self.current = None,
            _ => {
                let session = self.current.get_or_insert_with(|| Session {
                    backend,
                    state: to,
                    model: None,
                    pid: None,
                    started_at: Utc::now(),
                });
                session.state = to;
                if let Some(model) = model {
                    session.model = Some(model.to_string());
                }
            }
        }

        tracing::info!(%backend, %from, %to, model, "Session state changed");

        if self.history.len() == TRANSITION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(SessionTransition {
            backend,
            from,
            to,
            model: model.map(str::to_string),
            at: Instant::now(),
        });
    }

    pub(crate) fn set_process(&mut self, backend: BackendKind, state: ProcessState) {
        let previous = self.processes.insert(backend, state);
        tracing::debug!(%backend, from = ?previous, to = %state, "Process state changed");
    }

    pub(crate) fn set_pid(&mut self, pid: Option<u32>) {
        if let Some(session) = self.current.as_mut() {
            session.pid = pid;
        }
    }

    pub(crate) fn active_backend(&self) -> Option<BackendKind> {
        self.current.as_ref().map(|session| session.backend)
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.current.clone(),
            processes: self.processes.clone(),
        }
    }

    pub(crate) fn history(&self) -> Vec<SessionTransition> {
        self.history.iter().cloned().collect()
    }
}
