//! Core types shared by the backend client, the process supervisor and the
//! resource arbiter.

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};

/// The two locally hosted generation services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Image-synthesis server (txt2img API).
    Image,
    /// Text-generation server (OpenAI-style completions API).
    Text,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Image, BackendKind::Text];
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Image => write!(f, "image"),
            BackendKind::Text => write!(f, "text"),
        }
    }
}

/// Lifecycle state of the process-wide generation session.
///
/// `Idle -> Loading -> Active -> TearingDown -> Idle`. A failed start or
/// load goes `Loading -> TearingDown -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Active,
    TearingDown,
}

impl SessionState {
    /// Whether a session in this state holds (or is acquiring) GPU residency.
    pub fn is_busy(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Loading => write!(f, "loading"),
            SessionState::Active => write!(f, "active"),
            SessionState::TearingDown => write!(f, "tearing_down"),
        }
    }
}

/// State of a managed backend server process.
///
/// `NotStarted -> Starting -> Ready -> Stopping -> NotStarted`; a start
/// that never becomes ready goes `Starting -> Stopping -> NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    NotStarted,
    Starting,
    Ready,
    Stopping,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::NotStarted => write!(f, "not_started"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Ready => write!(f, "ready"),
            ProcessState::Stopping => write!(f, "stopping"),
        }
    }
}
