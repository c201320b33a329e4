//! Interaction logger.
//!
//! Writes one JSON line per chat interaction, to tracing and optionally to
//! a file.

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::types::{ChatPlatform, InteractionAction, InteractionLog};

/// Structured interaction logger that writes JSON lines to a file or tracing.
pub struct BasicInteractionLogger {
    log_path: Option<PathBuf>,
    count: RwLock<u64>,
}

impl BasicInteractionLogger {
    /// Create a logger that writes to the given file path.
    /// If `None`, logs to tracing output only.
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Self {
            log_path,
            count: RwLock::new(0),
        }
    }

    /// Log an interaction.
    pub async fn log(&self, entry: &InteractionLog) {
        let json = serde_json::to_string(entry).unwrap_or_else(|e| {
            format!(
                r#"{{"error":"serialization failed: {}","ts":"{}"}}"#,
                e,
                Utc::now().to_rfc3339()
            )
        });

        tracing::info!(target: "chat_interaction", "{}", json);

        if let Some(ref path) = self.log_path {
            if let Err(e) = append_log_line(path, &json).await {
                tracing::warn!(path = %path.display(), "Failed to write interaction log: {}", e);
            }
        }

        *self.count.write().await += 1;
    }

    #[allow(clippy::too_many_arguments)]
    pub fn entry(
        platform: ChatPlatform,
        user: &str,
        channel: &str,
        action: InteractionAction,
        target: &str,
        success: bool,
        duration_ms: Option<u64>,
        error: Option<String>,
    ) -> InteractionLog {
        InteractionLog {
            ts: Utc::now(),
            platform,
            user: user.to_string(),
            channel: channel.to_string(),
            action,
            target: target.to_string(),
            success,
            duration_ms,
            error,
        }
    }

    /// Get the total number of interactions logged.
    pub async fn interaction_count(&self) -> u64 {
        *self.count.read().await
    }
}

async fn append_log_line(path: &std::path::Path, line: &str) -> Result<(), std::io::Error> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}
