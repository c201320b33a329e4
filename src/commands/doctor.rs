use std::path::{Path, PathBuf};
use std::process::Command;

use clap::ArgMatches;
use forgebot_runtime::config::LaunchConfig;
use forgebot_runtime::{BackendClient, BackendKind, Config, HttpBackendClient};

pub async fn run(matches: &ArgMatches) {
    println!("🔍 Checking forgebot setup...\n");

    let mut all_ok = true;

    print!("• Checking configuration... ");
    let path = matches.get_one::<String>("config").map(Path::new);
    let config = match Config::load(path) {
        Ok(config) => {
            match path.map(Path::to_path_buf).or_else(Config::discover) {
                Some(file) => println!("✓ {} is valid", file.display()),
                None => println!("✓ Built-in defaults are valid (no config file found)"),
            }
            config
        }
        Err(e) => {
            println!("✗ {}", e);
            println!("\n⚠️  Fix the configuration before running forgebot");
            std::process::exit(1);
        }
    };

    println!(
        "• Image styles: {}",
        config.image_profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    println!(
        "• Personas: {} (default: {})",
        config.personas.keys().cloned().collect::<Vec<_>>().join(", "),
        config.default_persona
    );

    let client = HttpBackendClient::without_reclaimer(config.arbiter.settle_delay);
    for kind in BackendKind::ALL {
        let backend = config.backend(kind);
        match &backend.launch {
            Some(launch) => {
                print!("• Checking {} launcher... ", kind);
                match check_launch(launch) {
                    Ok(program) => println!("✓ {}", program.display()),
                    Err(problem) => {
                        println!("✗ {}", problem);
                        all_ok = false;
                    }
                }
                if launch.signature.is_none() {
                    println!("  ○ No process signature, only the spawned PID will be stopped");
                }
            }
            None => println!("• {} backend is externally managed", kind),
        }

        print!("• Checking {} backend at {}... ", kind, backend.base_url);
        if client.check_ready(&config.descriptor(kind)).await {
            if backend.launch.is_some() {
                println!("⚠️  Already running (it will be stopped after the next request)");
            } else {
                println!("✓ Reachable");
            }
        } else if backend.launch.is_some() {
            println!("○ Not running (started on demand)");
        } else {
            println!("✗ Not reachable and not managed by forgebot");
            all_ok = false;
        }
    }

    if config.arbiter.vram_query {
        print!("• Checking nvidia-smi... ");
        if check_nvidia_smi() {
            println!("✓ Available");
        } else {
            println!("○ Not found (VRAM usage will not be logged)");
        }
    }

    if let Some(program) = config
        .arbiter
        .release_command
        .as_ref()
        .and_then(|argv| argv.first())
    {
        print!("• Checking release command... ");
        match find_executable(program, None) {
            Some(path) => println!("✓ {}", path.display()),
            None => {
                println!("✗ {} not found", program);
                all_ok = false;
            }
        }
    }

    println!();
    if all_ok {
        println!("✅ All checks passed! You're ready to run: forgebot up");
    } else {
        println!("⚠️  Some checks failed. Fix the issues above before running forgebot up");
        std::process::exit(1);
    }
}

fn check_launch(launch: &LaunchConfig) -> Result<PathBuf, String> {
    if let Some(dir) = &launch.working_dir {
        if !dir.is_dir() {
            return Err(format!("working directory {} does not exist", dir.display()));
        }
    }
    find_executable(&launch.program, launch.working_dir.as_deref())
        .ok_or_else(|| format!("{} not found", launch.program))
}

/// Resolve `program` the way the supervisor will: paths relative to the
/// working directory, bare names through `PATH`.
fn find_executable(program: &str, working_dir: Option<&Path>) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        let resolved = match working_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };
        return resolved.is_file().then_some(resolved);
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}

fn check_nvidia_smi() -> bool {
    Command::new("nvidia-smi")
        .arg("-L")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_programs_resolve_against_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("webui.sh"), "#!/bin/sh\n").unwrap();

        assert_eq!(
            find_executable("./webui.sh", Some(dir.path())),
            Some(dir.path().join("./webui.sh"))
        );
        assert!(find_executable("./missing.sh", Some(dir.path())).is_none());
    }

    #[test]
    fn missing_working_dir_is_reported() {
        let launch = LaunchConfig {
            program: "./webui.sh".to_string(),
            args: Vec::new(),
            working_dir: Some(PathBuf::from("/definitely/not/here")),
            signature: None,
        };
        assert!(check_launch(&launch).unwrap_err().contains("does not exist"));
    }
}
