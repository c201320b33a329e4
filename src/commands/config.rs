use clap::ArgMatches;

pub async fn run(matches: &ArgMatches) {
    let config = super::load_config(matches);
    match config.to_toml_string() {
        Ok(toml) => print!("{}", toml),
        Err(e) => {
            eprintln!("✗ Failed to render configuration: {}", e);
            std::process::exit(1);
        }
    }
}
