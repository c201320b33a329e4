//! Error taxonomy for the generation-session lifecycle.
//!
//! Every remote failure is converted into one of these types at the backend
//! client boundary, so nothing transport-specific reaches the arbiter.

use std::time::Duration;
use thiserror::Error;

use super::BackendKind;

/// Why a remote call to a backend was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),
}

/// The backend server process could not be spawned.
#[derive(Error, Debug, Clone)]
pub enum LaunchError {
    #[error("failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("working directory does not exist: {path}")]
    MissingWorkingDir { path: String },

    #[error("{backend} backend has no launch configuration")]
    NotManaged { backend: BackendKind },
}

/// The backend refused (or never answered) a model load.
#[derive(Error, Debug, Clone)]
#[error("failed to load model '{model}': {failure}")]
pub struct LoadError {
    pub model: String,
    pub failure: RemoteFailure,
}

/// The backend refused (or never answered) a model unload.
#[derive(Error, Debug, Clone)]
#[error("failed to unload model: {failure}")]
pub struct UnloadError {
    pub failure: RemoteFailure,
}

/// A generation or completion call failed.
#[derive(Error, Debug, Clone)]
pub enum GenError {
    #[error("generation endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("backend returned empty content")]
    Empty,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Unload or stop failed after the generation step. Logged, never returned
/// in place of the generation result.
#[derive(Error, Debug, Clone)]
pub enum TeardownError {
    #[error("{backend} unload failed: {source}")]
    Unload {
        backend: BackendKind,
        #[source]
        source: UnloadError,
    },

    #[error("failed to stop {backend} process {pid}: {reason}")]
    Stop {
        backend: BackendKind,
        pid: u32,
        reason: String,
    },
}

/// Request-level error returned by the resource arbiter.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("unknown image style '{key}' (available: {})", available.join(", "))]
    UnknownProfile { key: String, available: Vec<String> },

    #[error("unknown persona '{0}'")]
    UnknownPersona(String),

    #[error("a {active} session is already in progress")]
    Busy { active: BackendKind },

    #[error("{backend} backend could not be launched: {source}")]
    Launch {
        backend: BackendKind,
        #[source]
        source: LaunchError,
    },

    #[error("{backend} backend not ready after {attempts} readiness checks")]
    ReadinessTimeout { backend: BackendKind, attempts: u32 },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{backend} generation failed: {source}")]
    Generation {
        backend: BackendKind,
        #[source]
        source: GenError,
    },
}

impl GenerationError {
    /// Chat-facing text for this failure. Never contains debug output.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::UnknownProfile { available, .. } => {
                format!("Invalid model type. Choose between {}.", quoted_choices(available))
            }
            GenerationError::UnknownPersona(name) => {
                format!("The persona '{}' isn't configured.", name)
            }
            GenerationError::Busy { .. } => {
                "I'm busy with another request right now. Try again in a moment.".to_string()
            }
            GenerationError::Launch { .. } | GenerationError::ReadinessTimeout { .. } => {
                "Failed to start the server.".to_string()
            }
            GenerationError::Load(_) => {
                "Failed to load model. Please check the model file.".to_string()
            }
            GenerationError::Generation {
                backend: BackendKind::Text,
                source: GenError::Empty,
            } => "I couldn't generate a response. Try asking something else.".to_string(),
            GenerationError::Generation {
                backend: BackendKind::Text,
                ..
            } => "I'm having trouble thinking right now. Try again later.".to_string(),
            GenerationError::Generation {
                backend: BackendKind::Image,
                source,
            } => format!("Failed to generate image: {}", source),
        }
    }
}

/// `["a", "b", "c"]` -> `'a', 'b', or 'c'`
fn quoted_choices(choices: &[String]) -> String {
    let quoted: Vec<String> = choices.iter().map(|c| format!("'{}'", c)).collect();
    match quoted.len() {
        0 => "nothing (no styles are configured)".to_string(),
        1 => quoted[0].clone(),
        2 => format!("{} or {}", quoted[0], quoted[1]),
        n => format!("{}, or {}", quoted[..n - 1].join(", "), quoted[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_profile_lists_choices() {
        let err = GenerationError::UnknownProfile {
            key: "anime".to_string(),
            available: vec!["art".into(), "flux".into(), "realistic".into()],
        };
        assert_eq!(
            err.user_message(),
            "Invalid model type. Choose between 'art', 'flux', or 'realistic'."
        );
        assert!(err.to_string().contains("anime"));
    }

    #[test]
    fn text_failures_are_apologies() {
        let empty = GenerationError::Generation {
            backend: BackendKind::Text,
            source: GenError::Empty,
        };
        assert!(empty.user_message().starts_with("I couldn't generate"));

        let transport = GenerationError::Generation {
            backend: BackendKind::Text,
            source: GenError::Transport("connection reset".into()),
        };
        let msg = transport.user_message();
        assert!(msg.starts_with("I'm having trouble thinking"));
        assert!(!msg.contains("connection reset"));
    }

    #[test]
    fn startup_failures_share_one_message() {
        let timeout = GenerationError::ReadinessTimeout {
            backend: BackendKind::Image,
            attempts: 10,
        };
        let launch = GenerationError::Launch {
            backend: BackendKind::Image,
            source: LaunchError::Spawn {
                program: "run.bat".into(),
                reason: "not found".into(),
            },
        };
        assert_eq!(timeout.user_message(), launch.user_message());
    }

    #[test]
    fn two_choices_use_or() {
        assert_eq!(quoted_choices(&["a".into(), "b".into()]), "'a' or 'b'");
    }
}
