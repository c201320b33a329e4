use clap::ArgMatches;
use forgebot_runtime::{BackendKind, LocalProcessSupervisor, ProcessHandle, ProcessSupervisor};

pub async fn run(matches: &ArgMatches) {
    let config = super::load_config(matches);
    super::init_tracing(&config.logging);

    let supervisor = LocalProcessSupervisor::new();
    let grace = config.arbiter.grace_period;
    let mut failed = false;

    for kind in BackendKind::ALL {
        let Some(launch) = &config.backend(kind).launch else {
            println!("○ {}: externally managed, left alone", kind);
            continue;
        };
        let Some(signature) = &launch.signature else {
            println!("○ {}: no process signature configured, nothing to match", kind);
            continue;
        };

        let handle = ProcessHandle::detached(kind, None);
        match supervisor.stop_process(handle, Some(signature), grace).await {
            Ok(outcome) if outcome.is_noop() => println!("✓ {}: not running", kind),
            Ok(outcome) => println!(
                "✓ {}: stopped {} process(es), {} killed after {:?}",
                kind,
                outcome.terminated.len() + outcome.killed.len(),
                outcome.killed.len(),
                grace
            ),
            Err(e) => {
                eprintln!("✗ {}: {}", kind, e);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
