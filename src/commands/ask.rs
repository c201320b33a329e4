use clap::ArgMatches;
use forgebot_runtime::ResourceArbiter;

pub async fn run(matches: &ArgMatches) {
    let config = super::load_config(matches);
    super::init_tracing(&config.logging);

    let persona = matches.get_one::<String>("persona").map(String::as_str);
    let message = super::joined(matches, "message");

    let arbiter = ResourceArbiter::from_config(&config);
    let request = arbiter.request_completion(persona, &message);
    let Some(result) = super::unless_interrupted(&arbiter, request, super::ctrl_c()).await
    else {
        std::process::exit(130);
    };

    match result {
        Ok(reply) => println!("{}", reply),
        Err(e) => {
            tracing::error!(error = %e, "Completion request failed");
            eprintln!("✗ {}", e.user_message());
            std::process::exit(1);
        }
    }
}
