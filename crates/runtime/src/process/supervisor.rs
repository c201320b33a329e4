use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessStatus, Signal, System};
use tokio::process::Command;

use super::{ProcessHandle, ProcessSupervisor, StopOutcome};
use crate::backend::BackendDescriptor;
use crate::config::ProcessSignature;
use crate::types::{LaunchError, TeardownError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawns servers as local child processes and stops them via OS signals.
#[derive(Debug, Default, Clone)]
pub struct LocalProcessSupervisor;

impl LocalProcessSupervisor {
    pub fn new() -> Self {
        Self
    }
}

/// Case-insensitive prefix match on the process name (`python` matches
/// `python3` and `python.exe`) AND some argument containing the marker.
pub fn matches_signature(name: &str, cmd: &[String], signature: &ProcessSignature) -> bool {
    name.to_lowercase()
        .starts_with(&signature.process_name.to_lowercase())
        && cmd.iter().any(|arg| arg.contains(&signature.arg_marker))
}

/// PIDs of every running process matching `signature`, excluding ourselves.
pub fn find_matching(signature: &ProcessSignature) -> Vec<u32> {
    let own_pid = std::process::id();
    let mut system = System::new();
    system.refresh_processes();

    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(_, process)| matches_signature(process.name(), process.cmd(), signature))
        .map(|(pid, _)| pid.as_u32())
        .filter(|pid| *pid != own_pid)
        .collect();
    pids.sort_unstable();
    pids
}

fn is_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return false;
    }
    system
        .process(pid)
        .map(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

/// SIGTERM where supported, otherwise an immediate kill.
fn request_exit(pid: u32) {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_process(sys_pid);

    if let Some(process) = system.process(sys_pid) {
        if process.kill_with(Signal::Term).is_none() {
            process.kill();
        }
    }
}

fn force_kill(pid: u32) -> bool {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_process(sys_pid);

    match system.process(sys_pid) {
        Some(process) => process.kill(),
        None => true,
    }
}

/// Force-kills each pid; returns (killed, still alive).
fn kill_all(pids: Vec<u32>) -> (Vec<u32>, Vec<u32>) {
    let mut killed = Vec::new();
    let mut stuck = Vec::new();
    for pid in pids {
        if force_kill(pid) {
            killed.push(pid);
        } else if is_alive(pid) {
            stuck.push(pid);
        }
    }
    (killed, stuck)
}

/// Process table queries block while sysinfo walks `/proc`, so they run on
/// the blocking pool. `None` if the blocking task panicked.
async fn off_runtime<T, F>(query: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(query).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(error = %e, "Process table query failed");
            None
        }
    }
}

/// A relative program path such as `./webui.sh` is taken relative to the
/// working directory, not to wherever forgebot was started.
fn resolve_program(program: &str, working_dir: Option<&PathBuf>) -> PathBuf {
    let path = PathBuf::from(program);
    match working_dir {
        Some(dir) if path.is_relative() && path.components().count() > 1 => dir.join(path),
        _ => path,
    }
}

#[async_trait]
impl ProcessSupervisor for LocalProcessSupervisor {
    async fn start_process(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<ProcessHandle, LaunchError> {
        let launch = descriptor.launch.as_ref().ok_or(LaunchError::NotManaged {
            backend: descriptor.kind,
        })?;

        if let Some(dir) = &launch.working_dir {
            if !dir.is_dir() {
                return Err(LaunchError::MissingWorkingDir {
                    path: dir.display().to_string(),
                });
            }
        }

        let program = resolve_program(&launch.program, launch.working_dir.as_ref());
        let mut command = Command::new(&program);
        command
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| LaunchError::Spawn {
            program: launch.program.clone(),
            reason: e.to_string(),
        })?;

        let handle = ProcessHandle::spawned(descriptor.kind, child);
        tracing::info!(
            backend = %descriptor.kind,
            pid = ?handle.pid,
            program = %program.display(),
            "Backend process started"
        );
        Ok(handle)
    }

    async fn stop_process(
        &self,
        mut handle: ProcessHandle,
        signature: Option<&ProcessSignature>,
        grace: Duration,
    ) -> Result<StopOutcome, TeardownError> {
        let backend = handle.backend;
        let signature = signature.cloned();
        let tracked = handle.pid;
        let targets: Vec<u32> = off_runtime(move || match signature {
            Some(signature) => find_matching(&signature),
            None => tracked.filter(|pid| is_alive(*pid)).into_iter().collect(),
        })
        .await
        .unwrap_or_default();

        let mut outcome = StopOutcome::default();
        if targets.is_empty() {
            tracing::debug!(%backend, "No matching backend process running");
        }

        for pid in &targets {
            tracing::info!(%backend, pid, "Terminating backend process");
        }
        let signalled = targets.clone();
        off_runtime(move || signalled.into_iter().for_each(request_exit)).await;

        let deadline = Instant::now() + grace;
        let mut remaining = targets;
        loop {
            let polled = remaining.clone();
            let (alive, exited): (Vec<u32>, Vec<u32>) =
                off_runtime(move || polled.into_iter().partition(|pid| is_alive(*pid)))
                    .await
                    .unwrap_or_else(|| (remaining, Vec::new()));
            outcome.terminated.extend(exited);
            remaining = alive;

            if remaining.is_empty() || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        for pid in &remaining {
            tracing::warn!(%backend, pid, ?grace, "Grace period expired, killing backend process");
        }
        let unkilled = remaining.clone();
        let (killed, stuck) = off_runtime(move || kill_all(remaining))
            .await
            .unwrap_or((Vec::new(), unkilled));
        outcome.killed.extend(killed);
        let failure = stuck.into_iter().last().map(|pid| TeardownError::Stop {
            backend,
            pid,
            reason: "kill signal was not delivered".to_string(),
        });

        if let Some(mut child) = handle.child.take() {
            // The launcher may outlive the server it started when a signature was used.
            if child.try_wait().ok().flatten().is_none() {
                let _ = child.start_kill();
            }
            if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
                tracing::warn!(backend = %handle.backend, pid = ?handle.pid, "Launcher process did not exit");
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LaunchConfig};
    use crate::types::BackendKind;

    fn signature() -> ProcessSignature {
        ProcessSignature {
            process_name: "python".to_string(),
            arg_marker: "launch.py".to_string(),
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn signature_needs_name_and_marker() {
        let sig = signature();
        assert!(matches_signature("python.exe", &args(&["python.exe", "launch.py", "--api"]), &sig));
        assert!(matches_signature("Python3", &args(&["/usr/bin/python3", "/opt/forge/launch.py"]), &sig));
        assert!(!matches_signature("python3", &args(&["server.py"]), &sig));
        assert!(!matches_signature("bash", &args(&["bash", "launch.py"]), &sig));
    }

    #[test]
    fn relative_program_resolves_against_working_dir() {
        let dir = PathBuf::from("/opt/forge");
        assert_eq!(
            resolve_program("./webui.sh", Some(&dir)),
            PathBuf::from("/opt/forge/./webui.sh")
        );
        assert_eq!(resolve_program("python3", Some(&dir)), PathBuf::from("python3"));
        assert_eq!(resolve_program("./webui.sh", None), PathBuf::from("./webui.sh"));
    }

    fn descriptor_with(launch: Option<LaunchConfig>) -> BackendDescriptor {
        let mut descriptor = Config::default().descriptor(BackendKind::Image);
        descriptor.launch = launch;
        descriptor
    }

    #[tokio::test]
    async fn unmanaged_backend_cannot_start() {
        let err = LocalProcessSupervisor::new()
            .start_process(&descriptor_with(None))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::NotManaged { .. }));
    }

    #[tokio::test]
    async fn missing_working_dir_is_reported() {
        let descriptor = descriptor_with(Some(LaunchConfig {
            program: "sleep".to_string(),
            args: vec![],
            working_dir: Some(PathBuf::from("/definitely/not/a/dir")),
            signature: None,
        }));
        let err = LocalProcessSupervisor::new()
            .start_process(&descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::MissingWorkingDir { .. }));
    }

    #[tokio::test]
    async fn unknown_program_fails_to_spawn() {
        let descriptor = descriptor_with(Some(LaunchConfig {
            program: "forgebot-no-such-binary".to_string(),
            args: vec![],
            working_dir: None,
            signature: None,
        }));
        let err = LocalProcessSupervisor::new()
            .start_process(&descriptor)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_terminates_tracked_child() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = descriptor_with(Some(LaunchConfig {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
            working_dir: Some(dir.path().to_path_buf()),
            signature: None,
        }));

        let supervisor = LocalProcessSupervisor::new();
        let handle = supervisor.start_process(&descriptor).await.unwrap();
        let pid = handle.pid.unwrap();
        assert!(is_alive(pid));

        let outcome = supervisor
            .stop_process(handle, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.terminated, vec![pid]);
        assert!(outcome.killed.is_empty());
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn panicking_query_yields_none() {
        let result: Option<u32> = off_runtime(|| panic!("proc walk failed")).await;
        assert!(result.is_none());
        assert_eq!(off_runtime(|| 7).await, Some(7));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "current_thread")]
    async fn stop_leaves_runtime_thread_free() {
        let descriptor = descriptor_with(Some(LaunchConfig {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
            working_dir: None,
            signature: None,
        }));
        let supervisor = LocalProcessSupervisor::new();
        let handle = supervisor.start_process(&descriptor).await.unwrap();

        let ticks = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        let outcome = supervisor
            .stop_process(handle, None, Duration::from_secs(5))
            .await
            .unwrap();
        ticker.abort();
        assert_eq!(outcome.terminated.len(), 1);
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn stopping_nothing_is_a_noop() {
        let supervisor = LocalProcessSupervisor::new();
        let sig = ProcessSignature {
            process_name: "forgebot-no-such-process".to_string(),
            arg_marker: "nothing-matches-this".to_string(),
        };
        let outcome = supervisor
            .stop_process(
                ProcessHandle::detached(BackendKind::Image, None),
                Some(&sig),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert!(outcome.is_noop());
    }
}
