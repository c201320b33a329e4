//! Command dispatcher.
//!
//! Turns chat messages into generation requests: `/create <style> <prompt>`
//! produces an image attachment, a message mentioning the bot produces a
//! persona reply. Everything else is ignored. Failures come back as chat
//! text, never as handler errors.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::DispatcherConfig;
use crate::error::ChannelAdapterError;
use crate::logging::BasicInteractionLogger;
use crate::traits::{GenerationBackend, GenerationFailure, InboundHandler};
use crate::types::{InboundMessage, InteractionAction, OutboundMessage};

pub struct CommandDispatcher {
    backend: Arc<dyn GenerationBackend>,
    logger: Arc<BasicInteractionLogger>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        logger: Arc<BasicInteractionLogger>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            backend,
            logger,
            config,
        }
    }

    fn mentions_bot(&self, content: &str) -> bool {
        self.config
            .mention_tokens
            .iter()
            .any(|token| content.contains(token.as_str()))
    }

    fn strip_mentions(&self, content: &str) -> String {
        let mut cleaned = content.to_string();
        for token in &self.config.mention_tokens {
            cleaned = cleaned.replace(token.as_str(), " ");
        }
        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn usage(&self) -> String {
        format!(
            "Usage: {}{} <style> <prompt>. Styles: {}.",
            self.config.command_prefix,
            self.config.image_command,
            self.backend.image_styles().join(", ")
        )
    }

    async fn record(
        &self,
        message: &InboundMessage,
        action: InteractionAction,
        target: &str,
        started: Instant,
        failure: Option<&GenerationFailure>,
    ) {
        let entry = BasicInteractionLogger::entry(
            message.platform,
            &message.sender_id,
            &message.channel_id,
            action,
            target,
            failure.is_none(),
            Some(started.elapsed().as_millis() as u64),
            failure.map(|f| f.detail.clone()),
        );
        self.logger.log(&entry).await;
    }

    async fn handle_image(&self, message: &InboundMessage, argument: &str) -> OutboundMessage {
        let started = Instant::now();
        let (style, prompt) = match argument.split_once(char::is_whitespace) {
            Some((style, prompt)) if !prompt.trim().is_empty() => (style, prompt.trim()),
            _ => {
                self.record(message, InteractionAction::Usage, argument, started, None)
                    .await;
                return OutboundMessage::text(&message.channel_id, self.usage());
            }
        };

        tracing::info!(
            user = %message.sender_id,
            channel = %message.channel_id,
            style,
            "Image requested"
        );

        let result = self.backend.request_image(style, prompt).await;
        self.record(
            message,
            InteractionAction::ImageCommand,
            style,
            started,
            result.as_ref().err(),
        )
        .await;

        match result {
            Ok(attachment) => OutboundMessage {
                channel_id: message.channel_id.clone(),
                content: String::new(),
                attachment: Some(attachment),
                user_id: Some(message.sender_id.clone()),
            },
            Err(failure) => {
                tracing::warn!(style, error = %failure.detail, "Image request failed");
                OutboundMessage::text(&message.channel_id, failure.user_message)
            }
        }
    }

    async fn handle_mention(&self, message: &InboundMessage) -> OutboundMessage {
        let started = Instant::now();
        let text = self.strip_mentions(&message.content);
        let persona = self.config.persona.as_deref();

        let result = self.backend.request_completion(persona, &text).await;
        self.record(
            message,
            InteractionAction::Mention,
            persona.unwrap_or("default"),
            started,
            result.as_ref().err(),
        )
        .await;

        match result {
            Ok(reply) => OutboundMessage::text(&message.channel_id, reply),
            Err(failure) => {
                tracing::warn!(error = %failure.detail, "Completion request failed");
                OutboundMessage::text(&message.channel_id, failure.user_message)
            }
        }
    }
}

#[async_trait]
impl InboundHandler for CommandDispatcher {
    async fn handle_message(
        &self,
        message: InboundMessage,
    ) -> Result<Option<OutboundMessage>, ChannelAdapterError> {
        if message.sender_id == self.config.bot_user_id {
            return Ok(None);
        }

        tracing::debug!(id = %message.id, sender = %message.sender_name, "Received message");

        if let Some(command) = &message.command {
            if command.name == self.config.image_command {
                return Ok(Some(self.handle_image(&message, &command.argument).await));
            }
            tracing::debug!(command = %command.name, "Ignoring unknown command");
            return Ok(None);
        }

        if self.mentions_bot(&message.content) {
            return Ok(Some(self.handle_mention(&message).await));
        }

        Ok(None)
    }
}
