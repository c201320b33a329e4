//! Configuration management for the forgebot runtime
//!
//! Settings come from an optional TOML file, then `FORGEBOT_*` environment
//! overrides, then validation. Defaults reproduce a single-GPU workstation
//! running an SD WebUI Forge server on port 7861 and a text-generation-webui
//! server on port 5000.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendDescriptor;
use crate::models::{ModelProfile, Persona, MESSAGE_PLACEHOLDER};
use crate::types::BackendKind;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Environment variable error: {message}")]
    EnvError { message: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persona used for mentions that do not name one
    pub default_persona: String,
    pub logging: LoggingConfig,
    pub arbiter: ArbiterConfig,
    pub readiness: ReadinessConfig,
    /// Image-synthesis backend
    #[serde(deserialize_with = "image_section")]
    pub image: BackendConfig,
    /// Text-generation backend
    #[serde(deserialize_with = "text_section")]
    pub text: BackendConfig,
    /// Image styles, keyed by the name users type after `/create`
    pub image_profiles: BTreeMap<String, ModelProfile>,
    pub personas: BTreeMap<String, Persona>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// What happens to a request that arrives while a session is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Wait in arrival order for the current session to finish
    Fifo,
    /// Fail immediately with a busy error
    Reject,
}

impl std::str::FromStr for QueuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fifo" => Ok(QueuePolicy::Fifo),
            "reject" => Ok(QueuePolicy::Reject),
            other => Err(format!("unknown queue policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    pub queue_policy: QueuePolicy,
    /// How long a stopped server gets to exit before it is killed
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// Fixed wait after a successful unload, before the session goes idle
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Optional command run after every successful unload to release GPU memory
    pub release_command: Option<Vec<String>>,
    /// Log VRAM usage around unloads via `nvidia-smi`
    pub vram_query: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

/// One remote generation service.
///
/// A `[image]` or `[text]` section only needs the keys it changes; the rest
/// come from [`BackendConfig::default_image`] or [`BackendConfig::default_text`].
/// `launch` is the exception: leaving it out of a section means the server
/// is started and stopped outside forgebot.
#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub ready_path: String,
    pub load_path: String,
    pub unload_path: String,
    pub generate_path: String,
    pub launch: Option<LaunchConfig>,
    /// Timeout for a single readiness probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Timeout for generation calls; `None` waits indefinitely (image only)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    /// Model loaded for text completions
    pub default_model: Option<String>,
}

/// Keys present in a backend section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BackendSection {
    base_url: Option<String>,
    ready_path: Option<String>,
    load_path: Option<String>,
    unload_path: Option<String>,
    generate_path: Option<String>,
    launch: Option<LaunchConfig>,
    #[serde(with = "humantime_serde")]
    probe_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    request_timeout: Option<Duration>,
    default_model: Option<String>,
}

impl BackendSection {
    fn over(self, base: BackendConfig) -> BackendConfig {
        BackendConfig {
            base_url: self.base_url.unwrap_or(base.base_url),
            ready_path: self.ready_path.unwrap_or(base.ready_path),
            load_path: self.load_path.unwrap_or(base.load_path),
            unload_path: self.unload_path.unwrap_or(base.unload_path),
            generate_path: self.generate_path.unwrap_or(base.generate_path),
            launch: self.launch,
            probe_timeout: self.probe_timeout.unwrap_or(base.probe_timeout),
            request_timeout: self.request_timeout.or(base.request_timeout),
            default_model: self.default_model.or(base.default_model),
        }
    }
}

fn image_section<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BackendConfig, D::Error> {
    BackendSection::deserialize(deserializer).map(|s| s.over(BackendConfig::default_image()))
}

fn text_section<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BackendConfig, D::Error> {
    BackendSection::deserialize(deserializer).map(|s| s.over(BackendConfig::default_text()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Locates the real server when `program` is only a launcher script
    #[serde(default)]
    pub signature: Option<ProcessSignature>,
}

/// Process image name plus a marker substring of its command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSignature {
    pub process_name: String,
    pub arg_marker: String,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            queue_policy: QueuePolicy::Fifo,
            grace_period: Duration::from_secs(5),
            settle_delay: Duration::from_secs(5),
            release_command: None,
            vram_query: false,
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(3),
        }
    }
}

impl BackendConfig {
    /// SD WebUI Forge API, launched from its own directory.
    pub fn default_image() -> Self {
        Self {
            base_url: "http://127.0.0.1:7861/sdapi/v1".to_string(),
            ready_path: "/options".to_string(),
            load_path: "/options".to_string(),
            unload_path: "/unload-checkpoint".to_string(),
            generate_path: "/txt2img".to_string(),
            launch: Some(LaunchConfig {
                program: "./webui.sh".to_string(),
                args: vec!["--api".to_string(), "--port".to_string(), "7861".to_string()],
                working_dir: dirs::home_dir().map(|home| home.join("forge")),
                signature: Some(ProcessSignature {
                    process_name: "python".to_string(),
                    arg_marker: "launch.py".to_string(),
                }),
            }),
            probe_timeout: default_probe_timeout(),
            request_timeout: None,
            default_model: None,
        }
    }

    /// text-generation-webui OpenAI-compatible API, managed externally.
    pub fn default_text() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            ready_path: "/v1/models".to_string(),
            load_path: "/v1/internal/model/load".to_string(),
            unload_path: "/v1/internal/model/unload".to_string(),
            generate_path: "/v1/completions".to_string(),
            launch: None,
            probe_timeout: default_probe_timeout(),
            request_timeout: Some(Duration::from_secs(120)),
            default_model: Some("llama2.11b.fimbulvetr-v2.gguf_v2.q4_k_m.gguf".to_string()),
        }
    }
}

/// The three styles of the deployed bot.
pub fn default_image_profiles() -> BTreeMap<String, ModelProfile> {
    let profile = |model: &str, steps, cfg_scale, width, height, sampler: &str, scheduler: &str| {
        ModelProfile {
            model: model.to_string(),
            steps,
            cfg_scale,
            width,
            height,
            sampler: sampler.to_string(),
            scheduler: scheduler.to_string(),
        }
    };

    BTreeMap::from([
        (
            "art".to_string(),
            profile("albedobaseXL_v20.safetensors", 30, 4.0, 832, 1216, "dpm_sde", "karras"),
        ),
        (
            "realistic".to_string(),
            profile("realityvisionSDXL_v20.safetensors", 30, 4.0, 1216, 832, "dpmpp_2m", "karras"),
        ),
        (
            "flux".to_string(),
            profile("flux1-dev-bnb-nf4.safetensors", 20, 1.0, 1152, 896, "Euler", "simple"),
        ),
    ])
}

pub fn default_personas() -> BTreeMap<String, Persona> {
    let prompt = "You are a sarcastic, blunt chat regular who answers in one or two short \
                  sentences and never writes code.\nUser: {cleaned_message}\nAssistant:";

    BTreeMap::from([(
        "jerk".to_string(),
        Persona {
            prompt: prompt.to_string(),
            max_new_tokens: 200,
            temperature: 0.7,
            top_p: 0.9,
            repetition_penalty: 1.15,
            use_history: false,
        },
    )])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_persona: "jerk".to_string(),
            logging: LoggingConfig::default(),
            arbiter: ArbiterConfig::default(),
            readiness: ReadinessConfig::default(),
            image: BackendConfig::default_image(),
            text: BackendConfig::default_text(),
            image_profiles: default_image_profiles(),
            personas: default_personas(),
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IoError {
            message: format!("{}: {}", path.as_ref().display(), e),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// File (if any), then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::discover() {
                Some(found) => {
                    tracing::debug!(path = %found.display(), "Using discovered config file");
                    Self::from_file(found)?
                }
                None => Self::default(),
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// `./forgebot.toml`, then `<config dir>/forgebot/config.toml`.
    pub fn discover() -> Option<PathBuf> {
        let local = PathBuf::from("forgebot.toml");
        if local.is_file() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|dir| dir.join("forgebot").join("config.toml"))
            .filter(|path| path.is_file())
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = env::var("FORGEBOT_LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }

        if let Ok(url) = env::var("FORGEBOT_IMAGE_URL") {
            self.image.base_url = url;
        }

        if let Ok(url) = env::var("FORGEBOT_TEXT_URL") {
            self.text.base_url = url;
        }

        if let Ok(policy) = env::var("FORGEBOT_QUEUE_POLICY") {
            self.arbiter.queue_policy =
                policy
                    .parse()
                    .map_err(|reason| ConfigError::InvalidValue {
                        key: "FORGEBOT_QUEUE_POLICY".to_string(),
                        reason,
                    })?;
        }

        if let Ok(secs) = env::var("FORGEBOT_SETTLE_DELAY_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| ConfigError::EnvError {
                message: format!("FORGEBOT_SETTLE_DELAY_SECS must be whole seconds, got '{}'", secs),
            })?;
            self.arbiter.settle_delay = Duration::from_secs(secs);
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("Must be one of: {}", valid_levels.join(", ")),
            });
        }

        if self.readiness.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "readiness.max_attempts".to_string(),
                reason: "At least one readiness check is required".to_string(),
            });
        }

        for kind in BackendKind::ALL {
            self.backend(kind).validate(kind)?;
        }

        match self.text.request_timeout {
            Some(timeout) if !timeout.is_zero() => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "text.request_timeout".to_string(),
                    reason: "Text completions need a non-zero timeout".to_string(),
                })
            }
        }

        if self.text.default_model.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "text.default_model".to_string(),
            });
        }

        if self.image_profiles.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "image_profiles".to_string(),
            });
        }

        for (name, profile) in &self.image_profiles {
            if profile.steps == 0 || profile.width == 0 || profile.height == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("image_profiles.{}", name),
                    reason: "steps, width and height must be > 0".to_string(),
                });
            }
            if profile.model.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: format!("image_profiles.{}.model", name),
                });
            }
        }

        if !self.personas.contains_key(&self.default_persona) {
            return Err(ConfigError::InvalidValue {
                key: "default_persona".to_string(),
                reason: format!("Persona '{}' not found in personas", self.default_persona),
            });
        }

        for (name, persona) in &self.personas {
            if !persona.prompt.contains(MESSAGE_PLACEHOLDER) {
                return Err(ConfigError::InvalidValue {
                    key: format!("personas.{}.prompt", name),
                    reason: format!("Template must contain {}", MESSAGE_PLACEHOLDER),
                });
            }
        }

        Ok(())
    }

    pub fn backend(&self, kind: BackendKind) -> &BackendConfig {
        match kind {
            BackendKind::Image => &self.image,
            BackendKind::Text => &self.text,
        }
    }

    /// Static descriptor for one backend kind.
    pub fn descriptor(&self, kind: BackendKind) -> BackendDescriptor {
        let backend = self.backend(kind);
        BackendDescriptor {
            kind,
            base_url: backend.base_url.trim_end_matches('/').to_string(),
            ready_path: backend.ready_path.clone(),
            load_path: backend.load_path.clone(),
            unload_path: backend.unload_path.clone(),
            generate_path: backend.generate_path.clone(),
            launch: backend.launch.clone(),
            probe_timeout: backend.probe_timeout,
            request_timeout: backend.request_timeout,
            default_model: backend.default_model.clone(),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

impl BackendConfig {
    fn validate(&self, kind: BackendKind) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: format!("{}.base_url", kind),
            });
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: format!("{}.base_url", kind),
                reason: "Must start with http:// or https://".to_string(),
            });
        }

        if let Some(launch) = &self.launch {
            if launch.program.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: format!("{}.launch.program", kind),
                });
            }
        }

        Ok(())
    }
}
