use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::ArgMatches;
use forgebot_channel_adapter::{
    Attachment, BasicInteractionLogger, ChannelAdapter, CommandDispatcher, ConsoleAdapter,
    ConsoleConfig, DispatcherConfig, GenerationBackend, GenerationFailure,
};
use forgebot_runtime::{GenerationError, ResourceArbiter};

/// Serves chat requests from the resource arbiter.
pub struct ArbiterBackend {
    arbiter: Arc<ResourceArbiter>,
}

impl ArbiterBackend {
    pub fn new(arbiter: Arc<ResourceArbiter>) -> Self {
        Self { arbiter }
    }
}

fn failure(err: GenerationError) -> GenerationFailure {
    GenerationFailure {
        user_message: err.user_message(),
        detail: err.to_string(),
    }
}

#[async_trait]
impl GenerationBackend for ArbiterBackend {
    async fn request_image(
        &self,
        style: &str,
        prompt: &str,
    ) -> Result<Attachment, GenerationFailure> {
        let artifact = self
            .arbiter
            .request_image(style, prompt)
            .await
            .map_err(failure)?;
        Ok(Attachment {
            file_name: "generated_image.png".to_string(),
            content_type: "image/png".to_string(),
            data: artifact.bytes,
        })
    }

    async fn request_completion(
        &self,
        persona: Option<&str>,
        message: &str,
    ) -> Result<String, GenerationFailure> {
        self.arbiter
            .request_completion(persona, message)
            .await
            .map_err(failure)
    }

    fn image_styles(&self) -> Vec<String> {
        self.arbiter.catalog().image_keys()
    }
}

pub async fn run(matches: &ArgMatches) {
    let config = super::load_config(matches);
    super::init_tracing(&config.logging);

    let output_dir = matches
        .get_one::<String>("output-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("generated"));
    let persona = matches.get_one::<String>("persona").cloned();
    let interaction_log = matches.get_one::<String>("interaction-log").map(PathBuf::from);

    if let Some(name) = &persona {
        if !config.personas.contains_key(name) {
            eprintln!("✗ Unknown persona '{}'", name);
            std::process::exit(1);
        }
    }

    let arbiter = Arc::new(ResourceArbiter::from_config(&config));
    let styles = arbiter.catalog().image_keys();

    let dispatcher_config = DispatcherConfig {
        persona,
        interaction_log: interaction_log.clone(),
        ..Default::default()
    };
    let console_config = ConsoleConfig {
        command_prefix: dispatcher_config.command_prefix.clone(),
        output_dir: output_dir.clone(),
        ..Default::default()
    };

    let logger = Arc::new(BasicInteractionLogger::new(interaction_log));
    let backend = Arc::new(ArbiterBackend::new(arbiter.clone()));
    let usage = format!(
        "{}{} <style> <prompt>",
        dispatcher_config.command_prefix, dispatcher_config.image_command
    );
    let mention = dispatcher_config
        .mention_tokens
        .first()
        .cloned()
        .unwrap_or_default();
    let dispatcher = Arc::new(CommandDispatcher::new(backend, logger, dispatcher_config));
    let adapter = ConsoleAdapter::stdio(console_config, dispatcher);

    if let Err(e) = adapter.start().await {
        eprintln!("✗ Failed to start console adapter: {}", e);
        std::process::exit(1);
    }

    println!("✓ forgebot v{} ready", env!("CARGO_PKG_VERSION"));
    println!("  • {}   styles: {}", usage, styles.join(", "));
    println!("  • {} <message>", mention);
    println!("  • images are saved to {}", output_dir.display());
    println!("  • Ctrl-D or Ctrl-C to quit\n");

    tokio::select! {
        _ = adapter.wait_closed() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\n✓ Shutting down, finishing the active request first...");
            if let Err(e) = adapter.stop().await {
                tracing::warn!("Console adapter stop failed: {}", e);
            }
            let _ = adapter.wait_closed().await;
        }
    }
    arbiter.wait_idle().await;

    let snapshot = arbiter.snapshot();
    tracing::info!(state = %snapshot.state(), "forgebot stopped");
}
