//! Console channel adapter.
//!
//! Reads one chat message per input line, hands it to the inbound handler
//! and prints the reply. Image attachments are written to the configured
//! output directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex, RwLock};

use crate::config::ConsoleConfig;
use crate::error::ChannelAdapterError;
use crate::traits::{ChannelAdapter, InboundHandler};
use crate::types::{
    AdapterHealth, ChatDeliveryReceipt, ChatPlatform, InboundMessage, OutboundMessage,
    SlashCommand,
};

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes replies to the console output.
struct ConsoleSink {
    config: ConsoleConfig,
    output: Mutex<Output>,
}

impl ConsoleSink {
    async fn deliver(
        &self,
        response: &OutboundMessage,
    ) -> Result<ChatDeliveryReceipt, ChannelAdapterError> {
        let mut attachment_path = None;
        let mut text = String::new();

        if let Some(attachment) = &response.attachment {
            let path = self.save_attachment(&attachment.data).await?;
            text.push_str(&format!("Image saved to {}\n", path.display()));
            attachment_path = Some(path.display().to_string());
        }
        if !response.content.is_empty() {
            text.push_str(&response.content);
            text.push('\n');
        }

        let mut output = self.output.lock().await;
        output
            .write_all(text.as_bytes())
            .await
            .map_err(|e| ChannelAdapterError::SendFailed(e.to_string()))?;
        output
            .flush()
            .await
            .map_err(|e| ChannelAdapterError::SendFailed(e.to_string()))?;

        Ok(ChatDeliveryReceipt {
            platform: ChatPlatform::Console,
            channel_id: response.channel_id.clone(),
            delivered_at: Utc::now(),
            success: true,
            attachment_path,
            error: None,
        })
    }

    async fn save_attachment(&self, data: &[u8]) -> Result<PathBuf, ChannelAdapterError> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let name = format!(
            "generated_image-{}.png",
            Utc::now().format("%Y%m%d-%H%M%S%.3f")
        );
        let path = self.config.output_dir.join(name);
        tokio::fs::write(&path, data).await?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "Saved image attachment");
        Ok(path)
    }
}

/// Line-based chat on stdin/stdout, or on any reader/writer pair.
pub struct ConsoleAdapter {
    config: ConsoleConfig,
    handler: Arc<dyn InboundHandler>,
    sink: Arc<ConsoleSink>,
    input: Mutex<Option<Input>>,
    shutdown_tx: RwLock<Option<watch::Sender<()>>>,
    closed: Arc<watch::Sender<bool>>,
    started_at: RwLock<Option<std::time::Instant>>,
    messages_received: Arc<AtomicU64>,
    last_message_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl ConsoleAdapter {
    pub fn new<R, W>(
        config: ConsoleConfig,
        handler: Arc<dyn InboundHandler>,
        input: R,
        output: W,
    ) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let sink = Arc::new(ConsoleSink {
            config: config.clone(),
            output: Mutex::new(Box::new(output)),
        });
        Self {
            config,
            handler,
            sink,
            input: Mutex::new(Some(Box::new(input))),
            shutdown_tx: RwLock::new(None),
            closed: Arc::new(watch::Sender::new(false)),
            started_at: RwLock::new(None),
            messages_received: Arc::new(AtomicU64::new(0)),
            last_message_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Adapter bound to the process's stdin and stdout.
    pub fn stdio(config: ConsoleConfig, handler: Arc<dyn InboundHandler>) -> Self {
        Self::new(
            config,
            handler,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }

    /// Wait until the input is exhausted or the adapter is stopped, and the
    /// message being handled at that point has been answered.
    pub async fn wait_closed(&self) -> Result<(), ChannelAdapterError> {
        if self.input.lock().await.is_some() {
            return Err(ChannelAdapterError::NotRunning);
        }
        let mut closed = self.closed.subscribe();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for ConsoleAdapter {
    async fn start(&self) -> Result<(), ChannelAdapterError> {
        if self.shutdown_tx.read().await.is_some() {
            return Err(ChannelAdapterError::AlreadyRunning);
        }
        let input = self.input.lock().await.take().ok_or_else(|| {
            ChannelAdapterError::Connection("console input already consumed".to_string())
        })?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        *self.shutdown_tx.write().await = Some(shutdown_tx);
        *self.started_at.write().await = Some(std::time::Instant::now());

        let config = self.config.clone();
        let handler = self.handler.clone();
        let sink = self.sink.clone();
        let received = self.messages_received.clone();
        let last_message = self.last_message_at.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let mut lines = input.lines();
            loop {
                let line = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    line = lines.next_line() => line,
                };
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Console input error: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let now = Utc::now();
                received.fetch_add(1, Ordering::Relaxed);
                *last_message.write().await = Some(now);

                let message = InboundMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    platform: ChatPlatform::Console,
                    channel_id: config.channel_id.clone(),
                    sender_id: config.user_id.clone(),
                    sender_name: config.user_name.clone(),
                    command: SlashCommand::parse(&line, &config.command_prefix),
                    content: line,
                    timestamp: now,
                };

                match handler.handle_message(message).await {
                    Ok(Some(reply)) => {
                        if let Err(e) = sink.deliver(&reply).await {
                            tracing::warn!("Failed to deliver console reply: {}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Inbound handler error: {}", e),
                }
            }
            closed.send_replace(true);
            tracing::info!("Console input closed");
        });

        tracing::info!(channel = %self.config.channel_id, "Console adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelAdapterError> {
        let tx = self.shutdown_tx.write().await.take();
        match tx {
            Some(tx) => {
                let _ = tx.send(());
                *self.started_at.write().await = None;
                tracing::info!("Console adapter stopped");
                Ok(())
            }
            None => Err(ChannelAdapterError::NotRunning),
        }
    }

    async fn send_response(
        &self,
        response: OutboundMessage,
    ) -> Result<ChatDeliveryReceipt, ChannelAdapterError> {
        self.sink.deliver(&response).await
    }

    fn platform(&self) -> ChatPlatform {
        ChatPlatform::Console
    }

    async fn check_health(&self) -> Result<AdapterHealth, ChannelAdapterError> {
        let connected = self.shutdown_tx.read().await.is_some();
        let uptime = self
            .started_at
            .read()
            .await
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0);

        Ok(AdapterHealth {
            connected,
            platform: ChatPlatform::Console,
            messages_received: self.messages_received.load(Ordering::Relaxed),
            last_message_at: *self.last_message_at.read().await,
            uptime_secs: uptime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attachment;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl AsyncWrite for SharedBuf {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Echoes text, answers `/create` with a tiny attachment, ignores `quiet`.
    struct EchoHandler {
        seen: Mutex<Vec<InboundMessage>>,
    }

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn handle_message(
            &self,
            message: InboundMessage,
        ) -> Result<Option<OutboundMessage>, ChannelAdapterError> {
            self.seen.lock().await.push(message.clone());
            if message.content == "quiet" {
                return Ok(None);
            }
            if message.command.is_some() {
                return Ok(Some(OutboundMessage {
                    channel_id: message.channel_id,
                    content: String::new(),
                    attachment: Some(Attachment {
                        file_name: "generated_image.png".to_string(),
                        content_type: "image/png".to_string(),
                        data: vec![0x89, b'P', b'N', b'G'],
                    }),
                    user_id: None,
                }));
            }
            Ok(Some(OutboundMessage::text(
                message.channel_id,
                format!("echo: {}", message.content),
            )))
        }
    }

    fn config(dir: &std::path::Path) -> ConsoleConfig {
        ConsoleConfig {
            user_name: "tester".to_string(),
            output_dir: dir.join("out"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn lines_are_dispatched_until_eof() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(EchoHandler {
            seen: Mutex::new(Vec::new()),
        });
        let input = tokio_test::io::Builder::new()
            .read(b"hello there\n\nquiet\n")
            .read(b"/create art a fox\n")
            .build();
        let output = SharedBuf::default();

        let adapter = ConsoleAdapter::new(
            config(dir.path()),
            handler.clone(),
            BufReader::new(input),
            output.clone(),
        );
        adapter.start().await.unwrap();
        adapter.wait_closed().await.unwrap();

        let seen = handler.seen.lock().await;
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].sender_name, "tester");
        assert!(seen[0].command.is_none());
        assert_eq!(seen[2].command.as_ref().unwrap().name, "create");

        let printed = output.contents();
        assert!(printed.starts_with("echo: hello there\n"));
        assert!(printed.contains("Image saved to "));

        let saved: Vec<_> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].starts_with("generated_image-"));
        assert!(saved[0].ends_with(".png"));

        let health = adapter.check_health().await.unwrap();
        assert_eq!(health.messages_received, 3);
        assert!(health.last_message_at.is_some());
    }

    #[tokio::test]
    async fn start_twice_and_stop_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(EchoHandler {
            seen: Mutex::new(Vec::new()),
        });
        let (reader, _writer) = tokio::io::duplex(64);
        let adapter = ConsoleAdapter::new(
            config(dir.path()),
            handler,
            BufReader::new(reader),
            SharedBuf::default(),
        );

        assert!(matches!(
            adapter.stop().await,
            Err(ChannelAdapterError::NotRunning)
        ));
        adapter.start().await.unwrap();
        assert!(adapter.check_health().await.unwrap().connected);
        assert!(matches!(
            adapter.start().await,
            Err(ChannelAdapterError::AlreadyRunning)
        ));

        adapter.stop().await.unwrap();
        adapter.wait_closed().await.unwrap();
        assert!(!adapter.check_health().await.unwrap().connected);
    }

    #[tokio::test]
    async fn send_response_writes_text() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(EchoHandler {
            seen: Mutex::new(Vec::new()),
        });
        let output = SharedBuf::default();
        let adapter = ConsoleAdapter::new(
            config(dir.path()),
            handler,
            BufReader::new(tokio::io::empty()),
            output.clone(),
        );

        let receipt = adapter
            .send_response(OutboundMessage::text("console", "Failed to start the server."))
            .await
            .unwrap();
        assert!(receipt.success);
        assert!(receipt.attachment_path.is_none());
        assert_eq!(output.contents(), "Failed to start the server.\n");
    }
}
