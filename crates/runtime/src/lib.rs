//! forgebot runtime
//!
//! The generation-session lifecycle controller behind the forgebot chat bot.
//! It keeps at most one heavyweight model resident on the GPU by running
//! every request as start, ready, load, generate, unload, stop against one of
//! two locally hosted servers (image synthesis and text generation).

pub mod backend;
pub mod config;
pub mod models;
pub mod process;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use backend::{BackendClient, BackendDescriptor, HttpBackendClient, ImageArtifact};
pub use config::{Config, ConfigError, QueuePolicy};
pub use models::{ModelProfile, Persona, ProfileCatalog};
pub use process::{LocalProcessSupervisor, ProcessHandle, ProcessSupervisor, ReadinessPolicy};
pub use session::{
    GenerationOutput, GenerationRequest, ResourceArbiter, SessionSnapshot, SessionTransition,
};
pub use types::*;
