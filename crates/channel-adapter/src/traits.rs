use async_trait::async_trait;

use crate::error::ChannelAdapterError;
use crate::types::{
    AdapterHealth, Attachment, ChatDeliveryReceipt, ChatPlatform, InboundMessage, OutboundMessage,
};

/// Core trait for chat platform adapters.
///
/// Implementors handle bidirectional communication with a specific chat
/// platform: receive messages, hand them to an [`InboundHandler`], and
/// deliver whatever it answers.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Start receiving messages from the platform.
    async fn start(&self) -> Result<(), ChannelAdapterError>;

    /// Stop the adapter gracefully.
    async fn stop(&self) -> Result<(), ChannelAdapterError>;

    /// Send a response back to the platform.
    async fn send_response(
        &self,
        response: OutboundMessage,
    ) -> Result<ChatDeliveryReceipt, ChannelAdapterError>;

    /// Which platform this adapter handles.
    fn platform(&self) -> ChatPlatform;

    /// Check adapter connectivity and health.
    async fn check_health(&self) -> Result<AdapterHealth, ChannelAdapterError>;
}

/// Callback for inbound messages from any adapter.
///
/// Returns the reply to deliver, or `None` when the message needs no answer.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_message(
        &self,
        message: InboundMessage,
    ) -> Result<Option<OutboundMessage>, ChannelAdapterError>;
}

/// A failed generation, with the text to show in chat kept apart from the
/// diagnostic detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub user_message: String,
    pub detail: String,
}

/// Bridge from the dispatcher to whatever runs the generation backends.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn request_image(
        &self,
        style: &str,
        prompt: &str,
    ) -> Result<Attachment, GenerationFailure>;

    async fn request_completion(
        &self,
        persona: Option<&str>,
        message: &str,
    ) -> Result<String, GenerationFailure>;

    /// Style names accepted by `request_image`, sorted.
    fn image_styles(&self) -> Vec<String>;
}
