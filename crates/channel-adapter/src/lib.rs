//! Chat channel adapters for forgebot.
//!
//! Chat messages come in through a [`ChannelAdapter`], the
//! [`CommandDispatcher`] turns `/create` commands and bot mentions into
//! generation requests against a [`GenerationBackend`], and the reply goes
//! back out through the same adapter.
//!
//! The console adapter is the only built-in platform. Other platforms plug
//! in by implementing [`ChannelAdapter`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub mod adapters;

pub use adapters::ConsoleAdapter;
pub use config::{ConsoleConfig, DispatcherConfig};
pub use dispatcher::CommandDispatcher;
pub use error::ChannelAdapterError;
pub use logging::BasicInteractionLogger;
pub use traits::{ChannelAdapter, GenerationBackend, GenerationFailure, InboundHandler};
pub use types::{
    AdapterHealth, Attachment, ChatDeliveryReceipt, ChatPlatform, InboundMessage,
    InteractionAction, InteractionLog, OutboundMessage, SlashCommand,
};
