//! Process supervisor
//!
//! Starts a backend's server, waits for it to answer, and stops it again.
//! Stopping prefers the spawned child PID; when the launch command is only a
//! wrapper script, a [`ProcessSignature`] locates the real server instead.

pub mod readiness;
pub mod supervisor;

pub use readiness::{await_ready, ReadinessPolicy};
pub use supervisor::{find_matching, matches_signature, LocalProcessSupervisor};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::process::Child;

use crate::backend::BackendDescriptor;
use crate::config::ProcessSignature;
use crate::types::{BackendKind, LaunchError, TeardownError};

/// A launched backend server.
#[derive(Debug)]
pub struct ProcessHandle {
    pub backend: BackendKind,
    /// PID of the spawned launcher; not necessarily the server itself
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    /// Owned child, reaped on stop
    pub child: Option<Child>,
}

impl ProcessHandle {
    pub fn spawned(backend: BackendKind, child: Child) -> Self {
        Self {
            backend,
            pid: child.id(),
            started_at: Utc::now(),
            child: Some(child),
        }
    }

    /// Handle for a server that forgebot did not spawn, e.g. when stopping
    /// leftovers by signature.
    pub fn detached(backend: BackendKind, pid: Option<u32>) -> Self {
        Self {
            backend,
            pid,
            started_at: Utc::now(),
            child: None,
        }
    }
}

/// What a stop actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutcome {
    /// Exited within the grace period
    pub terminated: Vec<u32>,
    /// Needed a forceful kill
    pub killed: Vec<u32>,
}

impl StopOutcome {
    /// Nothing was running.
    pub fn is_noop(&self) -> bool {
        self.terminated.is_empty() && self.killed.is_empty()
    }
}

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch the server without waiting for it to become ready.
    async fn start_process(&self, descriptor: &BackendDescriptor)
        -> Result<ProcessHandle, LaunchError>;

    /// Terminate gracefully, then kill after `grace`. A missing process is
    /// not an error.
    async fn stop_process(
        &self,
        handle: ProcessHandle,
        signature: Option<&ProcessSignature>,
        grace: Duration,
    ) -> Result<StopOutcome, TeardownError>;
}
