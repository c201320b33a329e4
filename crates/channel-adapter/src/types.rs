use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPlatform {
    /// Line-based stdin/stdout chat, for local use and testing
    Console,
}

impl std::fmt::Display for ChatPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatPlatform::Console => write!(f, "console"),
        }
    }
}

/// A message received from a chat platform, normalized across platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub platform: ChatPlatform,
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub command: Option<SlashCommand>,
    pub timestamp: DateTime<Utc>,
}

/// A parsed slash command, e.g. `/create art a red fox`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    pub name: String,
    /// Everything after the command name, trimmed
    pub argument: String,
}

impl SlashCommand {
    /// Parse `line` if it starts with `prefix` followed by a command name.
    pub fn parse(line: &str, prefix: &str) -> Option<Self> {
        let rest = line.trim_start().strip_prefix(prefix)?;
        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest.trim_end(), ""),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_lowercase(),
            argument: argument.to_string(),
        })
    }
}

/// A file sent along with a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// A response to send back to a chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub content: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    /// Recipient to address, if the platform supports it
    pub user_id: Option<String>,
}

impl OutboundMessage {
    pub fn text(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
            attachment: None,
            user_id: None,
        }
    }
}

/// Receipt confirming a message was delivered to a chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDeliveryReceipt {
    pub platform: ChatPlatform,
    pub channel_id: String,
    pub delivered_at: DateTime<Utc>,
    pub success: bool,
    /// Where an attachment ended up, for platforms that store files locally
    pub attachment_path: Option<String>,
    pub error: Option<String>,
}

/// Health status of a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterHealth {
    pub connected: bool,
    pub platform: ChatPlatform,
    pub messages_received: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

/// A structured interaction log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionLog {
    pub ts: DateTime<Utc>,
    pub platform: ChatPlatform,
    pub user: String,
    pub channel: String,
    pub action: InteractionAction,
    /// Image style or persona that served the request
    pub target: String,
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

/// Types of interaction actions logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    ImageCommand,
    Mention,
    Usage,
}
