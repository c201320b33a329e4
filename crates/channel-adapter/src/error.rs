use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelAdapterError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message send failed: {0}")]
    SendFailed(String),

    #[error("adapter not running")]
    NotRunning,

    #[error("adapter already running")]
    AlreadyRunning,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
