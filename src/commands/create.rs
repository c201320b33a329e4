use std::path::PathBuf;

use clap::ArgMatches;
use forgebot_runtime::ResourceArbiter;

pub async fn run(matches: &ArgMatches) {
    let config = super::load_config(matches);
    super::init_tracing(&config.logging);

    let style = matches
        .get_one::<String>("style")
        .expect("style argument is required");
    let prompt = super::joined(matches, "prompt");
    let out = matches
        .get_one::<String>("out")
        .map(PathBuf::from)
        .unwrap_or_else(default_output_path);

    let arbiter = ResourceArbiter::from_config(&config);
    println!("⏳ Generating '{}' image...", style);

    let request = arbiter.request_image(style, &prompt);
    let Some(result) = super::unless_interrupted(&arbiter, request, super::ctrl_c()).await
    else {
        std::process::exit(130);
    };

    match result {
        Ok(artifact) => {
            if let Err(e) = tokio::fs::write(&out, &artifact.bytes).await {
                eprintln!("✗ Failed to write {}: {}", out.display(), e);
                std::process::exit(1);
            }
            println!(
                "✓ Saved {} ({} bytes, model {})",
                out.display(),
                artifact.bytes.len(),
                artifact.model
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Image request failed");
            eprintln!("✗ {}", e.user_message());
            std::process::exit(1);
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "generated_image-{}.png",
        chrono::Utc::now().format("%Y%m%d-%H%M%S")
    ))
}
