use clap::ArgMatches;
use forgebot_runtime::config::ProcessSignature;
use forgebot_runtime::process::find_matching;
use forgebot_runtime::{BackendClient, BackendKind, Config, HttpBackendClient};
use serde_json::json;
use sysinfo::{Pid, System};

struct BackendStatus {
    kind: BackendKind,
    url: String,
    managed: bool,
    ready: bool,
    processes: Vec<(u32, u64)>,
}

pub async fn run(matches: &ArgMatches) {
    let config = super::load_config(matches);
    let statuses = collect(&config).await;

    if matches.get_flag("json") {
        let value: Vec<_> = statuses
            .iter()
            .map(|s| {
                json!({
                    "backend": s.kind,
                    "url": s.url,
                    "managed": s.managed,
                    "ready": s.ready,
                    "processes": s.processes
                        .iter()
                        .map(|(pid, bytes)| json!({ "pid": pid, "memory_bytes": bytes }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", json!({ "backends": value }));
        return;
    }

    println!("📊 forgebot backend status\n");
    for status in &statuses {
        let mode = if status.managed { "managed" } else { "external" };
        print!("{:<6} {} ({})  ", status.kind, status.url, mode);
        if status.ready {
            println!("✓ Ready");
        } else {
            println!("✗ Not responding");
        }

        for (pid, bytes) in &status.processes {
            println!(
                "  • pid {:<8} {:.1} MB",
                pid,
                *bytes as f64 / (1024.0 * 1024.0)
            );
        }
    }

    if statuses.iter().any(|s| s.ready && s.managed) {
        println!("\n⚠️  A managed backend is running outside a request (stop it with: forgebot stop)");
    }
    println!();
}

/// Matching pids with their resident memory in bytes.
fn running_processes(signature: &ProcessSignature) -> Vec<(u32, u64)> {
    let mut system = System::new();
    system.refresh_processes();
    find_matching(signature)
        .into_iter()
        .map(|pid| {
            let memory = system
                .process(Pid::from_u32(pid))
                .map(|process| process.memory())
                .unwrap_or(0);
            (pid, memory)
        })
        .collect()
}

async fn collect(config: &Config) -> Vec<BackendStatus> {
    let client = HttpBackendClient::without_reclaimer(config.arbiter.settle_delay);

    let mut statuses = Vec::new();
    for kind in BackendKind::ALL {
        let descriptor = config.descriptor(kind);
        let ready = client.check_ready(&descriptor).await;
        let signature = descriptor
            .launch
            .as_ref()
            .and_then(|launch| launch.signature.clone());
        let processes = match signature {
            Some(signature) => {
                match tokio::task::spawn_blocking(move || running_processes(&signature)).await {
                    Ok(processes) => processes,
                    Err(e) => {
                        tracing::warn!(backend = %kind, error = %e, "Process scan failed");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        statuses.push(BackendStatus {
            kind,
            url: descriptor.base_url.clone(),
            managed: descriptor.is_managed(),
            ready,
            processes,
        });
    }
    statuses
}
