//! Model profiles and personas
//!
//! - [`ModelProfile`]: engine parameters for one image style
//! - [`Persona`]: prompt template and sampling parameters for text replies
//! - [`ProfileCatalog`]: read-only registry built once from configuration

pub mod catalog;

pub use catalog::ProfileCatalog;

use serde::{Deserialize, Serialize};

/// Placeholder substituted with the cleaned chat message in persona templates.
pub const MESSAGE_PLACEHOLDER: &str = "{cleaned_message}";

/// Engine parameters for one supported image style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Checkpoint file name as known to the image backend
    pub model: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    pub sampler: String,
    pub scheduler: String,
}

/// Prompt template and sampling parameters for mention-triggered replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Template containing `{cleaned_message}`
    pub prompt: String,
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f64,
    #[serde(default)]
    pub use_history: bool,
}

impl Persona {
    /// Render the prompt for a chat message. Newlines become spaces and the
    /// message is trimmed before substitution. `{{` and `}}` in the template
    /// are literal braces; braces inside the message are left alone.
    pub fn render(&self, message: &str) -> String {
        let cleaned = message.replace(['\r', '\n'], " ");
        self.prompt
            .split(MESSAGE_PLACEHOLDER)
            .map(|part| part.replace("{{", "{").replace("}}", "}"))
            .collect::<Vec<_>>()
            .join(cleaned.trim())
    }
}
