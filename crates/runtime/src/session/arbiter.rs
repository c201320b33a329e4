//! Resource arbiter
//!
//! Serializes every generation request through one gate so that at most one
//! backend holds a model in GPU memory at a time. Each accepted request runs
//! start, readiness, load, generate, then unload and stop. Teardown runs on
//! every exit path: explicit [`SessionGuard::release`] on normal completion,
//! and a spawned teardown from `Drop` when the request future is cancelled.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use super::{
    GenerationOutput, GenerationRequest, SessionBoard, SessionSnapshot, SessionTransition,
};
use crate::backend::{
    BackendClient, BackendDescriptor, CommandReclaimer, HttpBackendClient, ImageArtifact,
};
use crate::config::{Config, QueuePolicy};
use crate::models::ProfileCatalog;
use crate::process::{
    await_ready, LocalProcessSupervisor, ProcessHandle, ProcessSupervisor, ReadinessPolicy,
};
use crate::types::{
    BackendKind, GenError, GenerationError, ProcessState, SessionState, TeardownError,
};

#[derive(Debug, Clone, Copy)]
pub struct ArbiterSettings {
    pub queue_policy: QueuePolicy,
    pub readiness: ReadinessPolicy,
    pub grace_period: Duration,
}

impl From<&Config> for ArbiterSettings {
    fn from(config: &Config) -> Self {
        Self {
            queue_policy: config.arbiter.queue_policy,
            readiness: ReadinessPolicy::from(&config.readiness),
            grace_period: config.arbiter.grace_period,
        }
    }
}

pub struct ResourceArbiter {
    client: Arc<dyn BackendClient>,
    supervisor: Arc<dyn ProcessSupervisor>,
    catalog: Arc<ProfileCatalog>,
    image: Arc<BackendDescriptor>,
    text: Arc<BackendDescriptor>,
    settings: ArbiterSettings,
    gate: Arc<tokio::sync::Mutex<()>>,
    board: Arc<Mutex<SessionBoard>>,
}

impl ResourceArbiter {
    pub fn new(
        client: Arc<dyn BackendClient>,
        supervisor: Arc<dyn ProcessSupervisor>,
        catalog: Arc<ProfileCatalog>,
        image: BackendDescriptor,
        text: BackendDescriptor,
        settings: ArbiterSettings,
    ) -> Self {
        Self {
            client,
            supervisor,
            catalog,
            image: Arc::new(image),
            text: Arc::new(text),
            settings,
            gate: Arc::new(tokio::sync::Mutex::new(())),
            board: Arc::new(Mutex::new(SessionBoard::default())),
        }
    }

    /// HTTP client, local process supervisor and `nvidia-smi` reclaimer.
    pub fn from_config(config: &Config) -> Self {
        let reclaimer = CommandReclaimer::new(
            config.arbiter.release_command.clone(),
            config.arbiter.vram_query,
        );
        let client = HttpBackendClient::new(Arc::new(reclaimer), config.arbiter.settle_delay);

        Self::new(
            Arc::new(client),
            Arc::new(LocalProcessSupervisor::new()),
            Arc::new(ProfileCatalog::from_config(config)),
            config.descriptor(BackendKind::Image),
            config.descriptor(BackendKind::Text),
            ArbiterSettings::from(config),
        )
    }

    pub fn catalog(&self) -> &ProfileCatalog {
        &self.catalog
    }

    pub fn descriptor(&self, kind: BackendKind) -> &BackendDescriptor {
        match kind {
            BackendKind::Image => &self.image,
            BackendKind::Text => &self.text,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.board.lock().snapshot()
    }

    /// Most recent session state changes, oldest first.
    pub fn transitions(&self) -> Vec<SessionTransition> {
        self.board.lock().history()
    }

    /// Generate one image in the style named by `model_key`.
    ///
    /// An unknown style is rejected before the session gate is touched.
    pub async fn request_image(
        &self,
        model_key: &str,
        prompt: &str,
    ) -> Result<ImageArtifact, GenerationError> {
        let profile = self.catalog.image_profile(model_key)?.clone();
        let prompt = prompt.to_string();

        let model = Some(profile.model.clone());

        self.run_session(BackendKind::Image, model, |client, descriptor| async move {
            client.generate(&descriptor, &prompt, &profile).await
        })
        .await
    }

    /// Reply to a chat message using `persona` (or the default persona).
    pub async fn request_completion(
        &self,
        persona: Option<&str>,
        message: &str,
    ) -> Result<String, GenerationError> {
        let persona = self.catalog.persona(persona)?.clone();
        let prompt = persona.render(message);
        let model = self.text.default_model.clone();

        self.run_session(BackendKind::Text, model, |client, descriptor| async move {
            client.complete(&descriptor, &prompt, &persona).await
        })
        .await
    }

    pub async fn submit(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        match request {
            GenerationRequest::Image { model_key, prompt } => self
                .request_image(&model_key, &prompt)
                .await
                .map(GenerationOutput::Image),
            GenerationRequest::Completion { persona, message } => self
                .request_completion(persona.as_deref(), &message)
                .await
                .map(GenerationOutput::Text),
        }
    }

    /// Claim the session for `kind`, waiting or failing per the queue policy.
    pub async fn acquire(&self, kind: BackendKind) -> Result<SessionGuard, GenerationError> {
        let permit = match self.settings.queue_policy {
            QueuePolicy::Fifo => self.gate.clone().lock_owned().await,
            QueuePolicy::Reject => self.gate.clone().try_lock_owned().map_err(|_| {
                let active = self.board.lock().active_backend().unwrap_or(kind);
                tracing::info!(requested = %kind, %active, "Rejecting request, session busy");
                GenerationError::Busy { active }
            })?,
        };

        self.board.lock().transition(kind, SessionState::Loading, None);

        Ok(SessionGuard {
            kind,
            descriptor: match kind {
                BackendKind::Image => self.image.clone(),
                BackendKind::Text => self.text.clone(),
            },
            client: self.client.clone(),
            supervisor: self.supervisor.clone(),
            board: self.board.clone(),
            readiness: self.settings.readiness,
            grace: self.settings.grace_period,
            process: None,
            loaded: false,
            permit: Some(permit),
        })
    }

    /// Wait until no session holds the gate, including teardowns still
    /// running in the background after a cancelled request.
    pub async fn wait_idle(&self) {
        drop(self.gate.clone().lock_owned().await);
    }

    async fn run_session<T, F, Fut>(
        &self,
        kind: BackendKind,
        model: Option<String>,
        operation: F,
    ) -> Result<T, GenerationError>
    where
        F: FnOnce(Arc<dyn BackendClient>, Arc<BackendDescriptor>) -> Fut,
        Fut: Future<Output = Result<T, GenError>>,
    {
        let mut guard = self.acquire(kind).await?;

        let result = match guard.prepare(model.as_deref()).await {
            Ok(()) => operation(guard.client.clone(), guard.descriptor.clone())
                .await
                .map_err(|source| GenerationError::Generation {
                    backend: kind,
                    source,
                }),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            tracing::warn!(backend = %kind, error = %e, "Generation request failed");
        }

        guard.release().await;
        result
    }
}

/// Exclusive claim on the GPU for one request. Dropping it without
/// [`release`](Self::release) schedules teardown on the current runtime.
pub struct SessionGuard {
    kind: BackendKind,
    descriptor: Arc<BackendDescriptor>,
    client: Arc<dyn BackendClient>,
    supervisor: Arc<dyn ProcessSupervisor>,
    board: Arc<Mutex<SessionBoard>>,
    readiness: ReadinessPolicy,
    grace: Duration,
    process: Option<ProcessHandle>,
    loaded: bool,
    permit: Option<OwnedMutexGuard<()>>,
}

impl SessionGuard {
    pub fn backend(&self) -> BackendKind {
        self.kind
    }

    /// Start the server (if managed), wait for readiness, then load `model`.
    ///
    /// With no model the server keeps whatever it loads by itself; the
    /// session still unloads on release.
    pub async fn prepare(&mut self, model: Option<&str>) -> Result<(), GenerationError> {
        let kind = self.kind;

        if self.descriptor.is_managed() {
            self.board.lock().set_process(kind, ProcessState::Starting);
            match self.supervisor.start_process(&self.descriptor).await {
                Ok(handle) => {
                    self.board.lock().set_pid(handle.pid);
                    self.process = Some(handle);
                }
                Err(source) => {
                    self.board.lock().set_process(kind, ProcessState::NotStarted);
                    return Err(GenerationError::Launch {
                        backend: kind,
                        source,
                    });
                }
            }
        }

        if !await_ready(self.client.as_ref(), &self.descriptor, self.readiness).await {
            return Err(GenerationError::ReadinessTimeout {
                backend: kind,
                attempts: self.readiness.max_attempts,
            });
        }
        if self.process.is_some() {
            self.board.lock().set_process(kind, ProcessState::Ready);
        }

        if let Some(model) = model {
            self.client.load_model(&self.descriptor, model).await?;
        }
        self.loaded = true;
        self.board.lock().transition(kind, SessionState::Active, model);
        Ok(())
    }

    /// Unload, stop and return to idle. Teardown failures are logged and
    /// returned for reporting; the session ends idle regardless.
    ///
    /// Teardown runs on its own task, so dropping this future part way
    /// through only stops waiting for it.
    pub async fn release(mut self) -> Vec<TeardownError> {
        let Some(teardown) = self.take_teardown() else {
            return Vec::new();
        };

        let kind = self.kind;
        match tokio::spawn(teardown.run()).await {
            Ok(errors) => errors,
            Err(e) => {
                tracing::error!(backend = %kind, error = %e, "Teardown task failed");
                Vec::new()
            }
        }
    }

    fn take_teardown(&mut self) -> Option<Teardown> {
        let permit = self.permit.take()?;
        Some(Teardown {
            kind: self.kind,
            descriptor: self.descriptor.clone(),
            client: self.client.clone(),
            supervisor: self.supervisor.clone(),
            board: self.board.clone(),
            grace: self.grace,
            process: self.process.take(),
            loaded: self.loaded,
            permit,
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(teardown) = self.take_teardown() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(backend = %self.kind, "Session dropped mid-request, tearing down in background");
                runtime.spawn(teardown.run());
            }
            Err(_) => {
                tracing::error!(backend = %self.kind, "Session dropped outside a runtime, marking idle without teardown");
                teardown.abandon();
            }
        }
    }
}

/// Everything teardown needs, detached from the guard so it can outlive a
/// cancelled request.
struct Teardown {
    kind: BackendKind,
    descriptor: Arc<BackendDescriptor>,
    client: Arc<dyn BackendClient>,
    supervisor: Arc<dyn ProcessSupervisor>,
    board: Arc<Mutex<SessionBoard>>,
    grace: Duration,
    process: Option<ProcessHandle>,
    loaded: bool,
    permit: OwnedMutexGuard<()>,
}

impl Teardown {
    async fn run(self) -> Vec<TeardownError> {
        let kind = self.kind;
        let mut errors = Vec::new();
        self.board.lock().transition(kind, SessionState::TearingDown, None);

        if self.loaded {
            if let Err(source) = self.client.unload_model(&self.descriptor).await {
                let err = TeardownError::Unload {
                    backend: kind,
                    source,
                };
                tracing::warn!(backend = %kind, error = %err, "Unload failed during teardown");
                errors.push(err);
            }
        }

        if let Some(handle) = self.process {
            self.board.lock().set_process(kind, ProcessState::Stopping);
            let signature = self
                .descriptor
                .launch
                .as_ref()
                .and_then(|launch| launch.signature.as_ref());

            match self.supervisor.stop_process(handle, signature, self.grace).await {
                Ok(outcome) => tracing::info!(
                    backend = %kind,
                    terminated = ?outcome.terminated,
                    killed = ?outcome.killed,
                    "Backend process stopped"
                ),
                Err(err) => {
                    tracing::warn!(backend = %kind, error = %err, "Stop failed during teardown");
                    errors.push(err);
                }
            }
            self.board.lock().set_process(kind, ProcessState::NotStarted);
        }

        self.board.lock().transition(kind, SessionState::Idle, None);
        drop(self.permit);
        errors
    }

    fn abandon(self) {
        let mut board = self.board.lock();
        board.set_process(self.kind, ProcessState::NotStarted);
        board.transition(self.kind, SessionState::Idle, None);
    }
}
