#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn cli() -> Command {
    Command::new("forgebot")
        .version(VERSION)
        .about("forgebot - one GPU, two generation servers, one chat bot")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Config file (default: ./forgebot.toml, then the user config dir)")
                .global(true),
        )
        .subcommand(
            Command::new("up")
                .about("Chat with the bot on this terminal")
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Where generated images are saved")
                        .default_value("generated"),
                )
                .arg(
                    Arg::new("persona")
                        .short('p')
                        .long("persona")
                        .value_name("NAME")
                        .help("Persona for replies to mentions"),
                )
                .arg(
                    Arg::new("interaction-log")
                        .long("interaction-log")
                        .value_name("FILE")
                        .help("Append one JSON line per interaction to this file"),
                ),
        )
        .subcommand(
            Command::new("create")
                .about("Generate one image and exit")
                .arg(
                    Arg::new("style")
                        .short('s')
                        .long("style")
                        .value_name("STYLE")
                        .help("Image style (see `forgebot config`)")
                        .required(true),
                )
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("FILE")
                        .help("Output path (default: generated_image-<timestamp>.png)"),
                )
                .arg(
                    Arg::new("prompt")
                        .value_name("PROMPT")
                        .num_args(1..)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("ask")
                .about("Ask the text model one question and exit")
                .arg(
                    Arg::new("persona")
                        .short('p')
                        .long("persona")
                        .value_name("NAME")
                        .help("Persona to answer as"),
                )
                .arg(
                    Arg::new("message")
                        .value_name("MESSAGE")
                        .num_args(1..)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show backend readiness and running backend processes")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print machine-readable output")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("stop").about("Stop every running backend server process"))
        .subcommand(Command::new("doctor").about("Check configuration and local prerequisites"))
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("up", sub_matches)) => commands::up::run(sub_matches).await,
        Some(("create", sub_matches)) => commands::create::run(sub_matches).await,
        Some(("ask", sub_matches)) => commands::ask::run(sub_matches).await,
        Some(("status", sub_matches)) => commands::status::run(sub_matches).await,
        Some(("stop", sub_matches)) => commands::stop::run(sub_matches).await,
        Some(("doctor", sub_matches)) => commands::doctor::run(sub_matches).await,
        Some(("config", sub_matches)) => commands::config::run(sub_matches).await,
        _ => {
            println!("forgebot v{}", VERSION);
            println!("Use --help for available commands");
        }
    }
}
