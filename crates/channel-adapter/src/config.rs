use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How chat messages are mapped to generation requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Messages from this sender are ignored.
    pub bot_user_id: String,
    /// Leading characters that mark a command, e.g. `/`.
    pub command_prefix: String,
    /// Command name that generates an image.
    pub image_command: String,
    /// Tokens that count as mentioning the bot. Removed before the message
    /// reaches the persona prompt.
    pub mention_tokens: Vec<String>,
    /// Persona for mention replies. `None` uses the runtime default.
    pub persona: Option<String>,
    /// Append interaction records (JSON lines) to this file.
    pub interaction_log: Option<PathBuf>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bot_user_id: "forgebot".to_string(),
            command_prefix: "/".to_string(),
            image_command: "create".to_string(),
            mention_tokens: vec!["@forgebot".to_string()],
            persona: None,
            interaction_log: None,
        }
    }
}

/// Configuration for the console adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub channel_id: String,
    pub user_id: String,
    pub user_name: String,
    /// Same prefix the dispatcher expects
    pub command_prefix: String,
    /// Directory image attachments are written to
    pub output_dir: PathBuf,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            channel_id: "console".to_string(),
            user_id: "local-user".to_string(),
            user_name: std::env::var("USER").unwrap_or_else(|_| "you".to_string()),
            command_prefix: "/".to_string(),
            output_dir: PathBuf::from("generated"),
        }
    }
}
