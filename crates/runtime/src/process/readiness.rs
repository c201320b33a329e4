use std::time::Duration;

use crate::backend::{BackendClient, BackendDescriptor};
use crate::config::ReadinessConfig;

/// Bounded readiness polling: `max_attempts` probes, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl From<&ReadinessConfig> for ReadinessPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            interval: config.interval,
        }
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&ReadinessConfig::default())
    }
}

/// Poll until the backend answers or the attempts run out. There is no
/// sleep after the final attempt.
pub async fn await_ready(
    client: &dyn BackendClient,
    descriptor: &BackendDescriptor,
    policy: ReadinessPolicy,
) -> bool {
    for attempt in 1..=policy.max_attempts {
        if client.check_ready(descriptor).await {
            tracing::info!(backend = %descriptor.kind, attempt, "Backend is ready");
            return true;
        }

        tracing::debug!(
            backend = %descriptor.kind,
            attempt,
            max_attempts = policy.max_attempts,
            "Waiting for backend to start"
        );
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    tracing::warn!(
        backend = %descriptor.kind,
        attempts = policy.max_attempts,
        "Backend did not become ready"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ImageArtifact;
    use crate::models::{ModelProfile, Persona};
    use crate::types::{BackendKind, GenError, LoadError, UnloadError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers ready from the `ready_on`-th probe onwards (0 = never).
    struct CountingClient {
        probes: AtomicU32,
        ready_on: u32,
    }

    #[async_trait]
    impl BackendClient for CountingClient {
        async fn check_ready(&self, _: &BackendDescriptor) -> bool {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            self.ready_on != 0 && n >= self.ready_on
        }

        async fn load_model(&self, _: &BackendDescriptor, _: &str) -> Result<(), LoadError> {
            unreachable!()
        }

        async fn unload_model(&self, _: &BackendDescriptor) -> Result<(), UnloadError> {
            unreachable!()
        }

        async fn generate(
            &self,
            _: &BackendDescriptor,
            _: &str,
            _: &ModelProfile,
        ) -> Result<ImageArtifact, GenError> {
            unreachable!()
        }

        async fn complete(&self, _: &BackendDescriptor, _: &str, _: &Persona) -> Result<String, GenError> {
            unreachable!()
        }
    }

    fn descriptor() -> BackendDescriptor {
        crate::config::Config::default().descriptor(BackendKind::Image)
    }

    fn policy(max_attempts: u32) -> ReadinessPolicy {
        ReadinessPolicy {
            max_attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn returns_on_first_success() {
        let client = CountingClient {
            probes: AtomicU32::new(0),
            ready_on: 3,
        };
        assert!(await_ready(&client, &descriptor(), policy(10)).await);
        assert_eq!(client.probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_exactly_max_attempts() {
        let client = CountingClient {
            probes: AtomicU32::new(0),
            ready_on: 0,
        };
        assert!(!await_ready(&client, &descriptor(), policy(4)).await);
        assert_eq!(client.probes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn no_sleep_after_last_attempt() {
        let client = CountingClient {
            probes: AtomicU32::new(0),
            ready_on: 0,
        };
        let slow = ReadinessPolicy {
            max_attempts: 1,
            interval: Duration::from_secs(30),
        };
        let started = std::time::Instant::now();
        assert!(!await_ready(&client, &descriptor(), slow).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
