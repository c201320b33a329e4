//! Backend client
//!
//! Stateless request/response wrapper around the two remote HTTP APIs. All
//! transport failures are converted into typed errors here; nothing from
//! `reqwest` crosses into the arbiter.

pub mod http;
pub mod reclaim;
pub mod sanitize;

pub use http::HttpBackendClient;
pub use reclaim::{CommandReclaimer, MemoryReclaimer, NoopReclaimer, VramUsage};
pub use sanitize::strip_code_fences;

use async_trait::async_trait;
use std::time::Duration;

use crate::config::LaunchConfig;
use crate::models::{ModelProfile, Persona};
use crate::types::{BackendKind, GenError, LoadError, UnloadError};

/// Static description of one backend service.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    /// Base URL without a trailing slash
    pub base_url: String,
    pub ready_path: String,
    pub load_path: String,
    pub unload_path: String,
    pub generate_path: String,
    /// `None` for an externally managed server
    pub launch: Option<LaunchConfig>,
    pub probe_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub default_model: Option<String>,
}

impl BackendDescriptor {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Whether forgebot starts and stops this server itself.
    pub fn is_managed(&self) -> bool {
        self.launch.is_some()
    }
}

/// Decoded image returned by the image backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub bytes: Vec<u8>,
    /// Checkpoint that produced the image
    pub model: String,
}

#[async_trait]
pub trait BackendClient: Send + Sync {
    /// GET the readiness endpoint. True only on HTTP 200; never fails.
    async fn check_ready(&self, descriptor: &BackendDescriptor) -> bool;

    async fn load_model(&self, descriptor: &BackendDescriptor, model: &str)
        -> Result<(), LoadError>;

    /// Unload the resident model. On success the memory-release hook and the
    /// settle delay have both completed before this returns.
    async fn unload_model(&self, descriptor: &BackendDescriptor) -> Result<(), UnloadError>;

    async fn generate(
        &self,
        descriptor: &BackendDescriptor,
        prompt: &str,
        profile: &ModelProfile,
    ) -> Result<ImageArtifact, GenError>;

    /// Returns sanitized completion text, never empty.
    async fn complete(
        &self,
        descriptor: &BackendDescriptor,
        prompt: &str,
        persona: &Persona,
    ) -> Result<String, GenError>;
}
