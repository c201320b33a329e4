pub mod ask;
pub mod config;
pub mod create;
pub mod doctor;
pub mod status;
pub mod stop;
pub mod up;

use std::future::Future;
use std::path::Path;

use clap::ArgMatches;
use forgebot_runtime::config::{LogFormat, LoggingConfig};
use forgebot_runtime::{Config, ResourceArbiter};
use tracing_subscriber::EnvFilter;

/// Load, override and validate the config, or exit with a message.
pub fn load_config(matches: &ArgMatches) -> Config {
    let path = matches.get_one::<String>("config").map(Path::new);
    match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    }
}

/// Structured logs go to stderr so replies on stdout stay readable.
/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    if let Err(e) = result {
        eprintln!("⚠️  Logging already initialised: {}", e);
    }
}

/// Joins a multi-value positional argument back into one string.
pub fn joined(matches: &ArgMatches, id: &str) -> String {
    matches
        .get_many::<String>(id)
        .map(|values| values.map(String::as_str).collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Run `request` unless `interrupt` fires first. On interrupt the request
/// is dropped and this waits for its teardown before returning `None`, so
/// a backend started for the request is stopped before the process exits.
pub async fn unless_interrupted<T>(
    arbiter: &ResourceArbiter,
    request: impl Future<Output = T>,
    interrupt: impl Future<Output = ()>,
) -> Option<T> {
    tokio::select! {
        output = request => Some(output),
        _ = interrupt => {
            eprintln!("\n✗ Interrupted, stopping backend...");
            arbiter.wait_idle().await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_request_passes_through() {
        let arbiter = ResourceArbiter::from_config(&Config::default());
        let output =
            unless_interrupted(&arbiter, async { 7 }, std::future::pending::<()>()).await;
        assert_eq!(output, Some(7));
    }

    #[tokio::test]
    async fn interrupt_drops_request_and_waits_for_idle() {
        let arbiter = ResourceArbiter::from_config(&Config::default());
        let output = unless_interrupted(
            &arbiter,
            std::future::pending::<u32>(),
            std::future::ready(()),
        )
        .await;
        assert_eq!(output, None);
        assert_eq!(
            arbiter.snapshot().state(),
            forgebot_runtime::types::SessionState::Idle
        );
    }
}
