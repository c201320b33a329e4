//! GPU memory release after an unload
//!
//! Unloading a checkpoint returns control before the driver has actually
//! freed the memory. The [`MemoryReclaimer`] hook runs right after a
//! successful unload; the caller then waits out the settle delay.

use async_trait::async_trait;
use tokio::process::Command;

/// Used and total VRAM of the first GPU, in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VramUsage {
    pub used_mib: u64,
    pub total_mib: u64,
}

#[async_trait]
pub trait MemoryReclaimer: Send + Sync {
    /// Best-effort VRAM reading, logged under `label`.
    async fn snapshot(&self, label: &str) -> Option<VramUsage>;

    /// Release cached GPU memory. Failures are logged, never returned.
    async fn reclaim(&self);
}

/// Does nothing. For externally managed GPUs and tests.
#[derive(Debug, Default, Clone)]
pub struct NoopReclaimer;

#[async_trait]
impl MemoryReclaimer for NoopReclaimer {
    async fn snapshot(&self, _label: &str) -> Option<VramUsage> {
        None
    }

    async fn reclaim(&self) {}
}

/// Runs an optional release command and reads VRAM via `nvidia-smi`.
#[derive(Debug, Default, Clone)]
pub struct CommandReclaimer {
    release_command: Option<Vec<String>>,
    query_vram: bool,
}

impl CommandReclaimer {
    pub fn new(release_command: Option<Vec<String>>, query_vram: bool) -> Self {
        Self {
            release_command: release_command.filter(|argv| !argv.is_empty()),
            query_vram,
        }
    }
}

#[async_trait]
impl MemoryReclaimer for CommandReclaimer {
    async fn snapshot(&self, label: &str) -> Option<VramUsage> {
        if !self.query_vram {
            return None;
        }

        let output = match Command::new("nvidia-smi")
            .args([
                "--query-gpu=memory.used,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .await
        {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::debug!(status = %output.status, "nvidia-smi exited unsuccessfully");
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "nvidia-smi unavailable, skipping VRAM query");
                return None;
            }
        };

        let usage = parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout));
        if let Some(usage) = usage {
            tracing::info!(
                label,
                used_mib = usage.used_mib,
                total_mib = usage.total_mib,
                "VRAM usage"
            );
        }
        usage
    }

    async fn reclaim(&self) {
        let Some(argv) = &self.release_command else {
            return;
        };

        match Command::new(&argv[0]).args(&argv[1..]).status().await {
            Ok(status) if status.success() => {
                tracing::debug!(command = %argv[0], "GPU memory release command finished");
            }
            Ok(status) => {
                tracing::warn!(command = %argv[0], %status, "GPU memory release command failed");
            }
            Err(e) => {
                tracing::warn!(command = %argv[0], error = %e, "Could not run GPU memory release command");
            }
        }
    }
}

/// First line of `nvidia-smi --format=csv,noheader,nounits`, e.g. `"1024, 24576"`.
fn parse_nvidia_smi(output: &str) -> Option<VramUsage> {
    let line = output.lines().find(|line| !line.trim().is_empty())?;
    let mut fields = line.split(',').map(|field| field.trim().parse::<u64>());
    let used_mib = fields.next()?.ok()?;
    let total_mib = fields.next()?.ok()?;
    Some(VramUsage {
        used_mib,
        total_mib,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_gpu() {
        let usage = parse_nvidia_smi("10240, 24564\n512, 8192\n").unwrap();
        assert_eq!(usage.used_mib, 10240);
        assert_eq!(usage.total_mib, 24564);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_nvidia_smi("").is_none());
        assert!(parse_nvidia_smi("[N/A], [N/A]").is_none());
        assert!(parse_nvidia_smi("42").is_none());
    }

    #[test]
    fn empty_release_command_is_ignored() {
        let reclaimer = CommandReclaimer::new(Some(vec![]), false);
        assert!(reclaimer.release_command.is_none());
    }

    #[tokio::test]
    async fn snapshot_disabled_without_query() {
        let reclaimer = CommandReclaimer::new(None, false);
        assert!(reclaimer.snapshot("before").await.is_none());
        reclaimer.reclaim().await;
    }
}
