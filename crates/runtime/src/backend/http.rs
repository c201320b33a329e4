//! reqwest implementation of [`BackendClient`] for the SD WebUI and
//! text-generation-webui APIs.

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::reclaim::{MemoryReclaimer, NoopReclaimer};
use super::sanitize::strip_code_fences;
use super::{BackendClient, BackendDescriptor, ImageArtifact};
use crate::models::{ModelProfile, Persona};
use crate::types::{BackendKind, GenError, LoadError, RemoteFailure, UnloadError};

pub struct HttpBackendClient {
    client: reqwest::Client,
    reclaimer: Arc<dyn MemoryReclaimer>,
    settle_delay: Duration,
}

impl HttpBackendClient {
    pub fn new(reclaimer: Arc<dyn MemoryReclaimer>, settle_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            reclaimer,
            settle_delay,
        }
    }

    /// Client with no memory-release hook.
    pub fn without_reclaimer(settle_delay: Duration) -> Self {
        Self::new(Arc::new(NoopReclaimer), settle_delay)
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    async fn post_for_status(&self, url: &str, body: &Value) -> Result<(), RemoteFailure> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteFailure::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(RemoteFailure::Status(status.as_u16())),
        }
    }

    /// POST to the generation endpoint and return the decoded JSON body.
    async fn post_generation(
        &self,
        descriptor: &BackendDescriptor,
        body: &Value,
    ) -> Result<Value, GenError> {
        let mut request = self
            .client
            .post(descriptor.endpoint(&descriptor.generate_path))
            .json(body);
        if let Some(timeout) = descriptor.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            match (e.is_timeout(), descriptor.request_timeout) {
                (true, Some(timeout)) => GenError::Timeout(timeout),
                _ => GenError::Transport(e.to_string()),
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(GenError::Status {
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                descriptor
                    .request_timeout
                    .map(GenError::Timeout)
                    .unwrap_or_else(|| GenError::Transport(e.to_string()))
            } else {
                GenError::Decode(e.to_string())
            }
        })
    }
}

/// Request body that selects `model` on each backend's load endpoint.
fn load_body(kind: BackendKind, model: &str) -> Value {
    match kind {
        BackendKind::Image => json!({ "sd_model_checkpoint": model }),
        BackendKind::Text => json!({ "model_name": model }),
    }
}

/// Decode the first base64 image, tolerating a `data:image/png;base64,` prefix.
fn decode_first_image(body: &Value) -> Result<Vec<u8>, GenError> {
    let encoded = body
        .get("images")
        .and_then(|images| images.get(0))
        .and_then(Value::as_str)
        .ok_or_else(|| GenError::Decode("response has no images".to_string()))?;

    let payload = match encoded.split_once("base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| GenError::Decode(format!("invalid base64 image: {}", e)))
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn check_ready(&self, descriptor: &BackendDescriptor) -> bool {
        let url = descriptor.endpoint(&descriptor.ready_path);
        match self
            .client
            .get(&url)
            .timeout(descriptor.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::trace!(backend = %descriptor.kind, error = %e, "Readiness probe failed");
                false
            }
        }
    }

    async fn load_model(
        &self,
        descriptor: &BackendDescriptor,
        model: &str,
    ) -> Result<(), LoadError> {
        let url = descriptor.endpoint(&descriptor.load_path);
        tracing::info!(backend = %descriptor.kind, model, "Loading model");

        self.post_for_status(&url, &load_body(descriptor.kind, model))
            .await
            .map_err(|failure| LoadError {
                model: model.to_string(),
                failure,
            })
    }

    async fn unload_model(&self, descriptor: &BackendDescriptor) -> Result<(), UnloadError> {
        let url = descriptor.endpoint(&descriptor.unload_path);
        self.reclaimer.snapshot("before unload").await;

        self.post_for_status(&url, &json!({}))
            .await
            .map_err(|failure| UnloadError { failure })?;

        self.reclaimer.reclaim().await;
        tracing::debug!(
            backend = %descriptor.kind,
            settle_delay = ?self.settle_delay,
            "Model unloaded, waiting for GPU memory to settle"
        );
        tokio::time::sleep(self.settle_delay).await;
        self.reclaimer.snapshot("after unload").await;

        Ok(())
    }

    async fn generate(
        &self,
        descriptor: &BackendDescriptor,
        prompt: &str,
        profile: &ModelProfile,
    ) -> Result<ImageArtifact, GenError> {
        let body = json!({
            "prompt": prompt,
            "steps": profile.steps,
            "cfg_scale": profile.cfg_scale,
            "width": profile.width,
            "height": profile.height,
            "sampler_index": profile.sampler,
            "scheduler": profile.scheduler,
            "model": profile.model,
        });

        let started = std::time::Instant::now();
        let response = self.post_generation(descriptor, &body).await?;
        let bytes = decode_first_image(&response)?;

        tracing::info!(
            backend = %descriptor.kind,
            model = %profile.model,
            bytes = bytes.len(),
            elapsed = ?started.elapsed(),
            "Image generated"
        );

        Ok(ImageArtifact {
            bytes,
            model: profile.model.clone(),
        })
    }

    async fn complete(
        &self,
        descriptor: &BackendDescriptor,
        prompt: &str,
        persona: &Persona,
    ) -> Result<String, GenError> {
        let body = json!({
            "prompt": prompt,
            "max_new_tokens": persona.max_new_tokens,
            "temperature": persona.temperature,
            "top_p": persona.top_p,
            "repetition_penalty": persona.repetition_penalty,
            "use_history": persona.use_history,
        });

        let response = self.post_generation(descriptor, &body).await?;
        let text = response
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("text"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GenError::Empty);
        }

        let cleaned = strip_code_fences(text).trim().to_string();
        if cleaned.is_empty() {
            return Err(GenError::Empty);
        }

        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VramUsage;
    use parking_lot::Mutex;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn descriptor(kind: BackendKind, server: &MockServer) -> BackendDescriptor {
        let (ready, load, unload, generate) = match kind {
            BackendKind::Image => ("/options", "/options", "/unload-checkpoint", "/txt2img"),
            BackendKind::Text => (
                "/v1/models",
                "/v1/internal/model/load",
                "/v1/internal/model/unload",
                "/v1/completions",
            ),
        };
        BackendDescriptor {
            kind,
            base_url: server.uri(),
            ready_path: ready.to_string(),
            load_path: load.to_string(),
            unload_path: unload.to_string(),
            generate_path: generate.to_string(),
            launch: None,
            probe_timeout: Duration::from_secs(1),
            request_timeout: Some(Duration::from_secs(5)),
            default_model: Some("tiny.gguf".to_string()),
        }
    }

    fn profile() -> ModelProfile {
        ModelProfile {
            model: "albedobaseXL_v20.safetensors".to_string(),
            steps: 30,
            cfg_scale: 4.0,
            width: 832,
            height: 1216,
            sampler: "dpm_sde".to_string(),
            scheduler: "karras".to_string(),
        }
    }

    fn persona() -> Persona {
        Persona {
            prompt: "{cleaned_message}".to_string(),
            max_new_tokens: 200,
            temperature: 0.7,
            top_p: 0.9,
            repetition_penalty: 1.15,
            use_history: false,
        }
    }

    fn client() -> HttpBackendClient {
        HttpBackendClient::without_reclaimer(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn ready_only_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/options"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client();
        assert!(client.check_ready(&descriptor(BackendKind::Image, &server)).await);
        // /v1/models is not mounted, so wiremock answers 404
        assert!(!client.check_ready(&descriptor(BackendKind::Text, &server)).await);
    }

    #[tokio::test]
    async fn unreachable_server_is_not_ready() {
        let server = MockServer::start().await;
        let desc = descriptor(BackendKind::Image, &server);
        drop(server);
        assert!(!client().check_ready(&desc).await);
    }

    #[tokio::test]
    async fn load_posts_backend_specific_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/options"))
            .and(body_json(json!({ "sd_model_checkpoint": "flux1-dev-bnb-nf4.safetensors" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/internal/model/load"))
            .and(body_json(json!({ "model_name": "tiny.gguf" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client();
        client
            .load_model(&descriptor(BackendKind::Image, &server), "flux1-dev-bnb-nf4.safetensors")
            .await
            .unwrap();
        client
            .load_model(&descriptor(BackendKind::Text, &server), "tiny.gguf")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn load_rejection_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/options"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let err = client()
            .load_model(&descriptor(BackendKind::Image, &server), "missing.safetensors")
            .await
            .unwrap_err();
        assert_eq!(err.model, "missing.safetensors");
        assert_eq!(err.failure, RemoteFailure::Status(422));
    }

    #[derive(Default)]
    struct RecordingReclaimer {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MemoryReclaimer for RecordingReclaimer {
        async fn snapshot(&self, label: &str) -> Option<VramUsage> {
            self.events.lock().push(format!("snapshot:{}", label));
            None
        }

        async fn reclaim(&self) {
            self.events.lock().push("reclaim".to_string());
        }
    }

    #[tokio::test]
    async fn unload_reclaims_and_settles_before_returning() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unload-checkpoint"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let reclaimer = Arc::new(RecordingReclaimer::default());
        let settle = Duration::from_millis(50);
        let client = HttpBackendClient::new(reclaimer.clone(), settle);

        let started = std::time::Instant::now();
        client
            .unload_model(&descriptor(BackendKind::Image, &server))
            .await
            .unwrap();
        assert!(started.elapsed() >= settle);
        assert_eq!(
            *reclaimer.events.lock(),
            vec!["snapshot:before unload", "reclaim", "snapshot:after unload"]
        );
    }

    #[tokio::test]
    async fn failed_unload_skips_reclaim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/internal/model/unload"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let reclaimer = Arc::new(RecordingReclaimer::default());
        let client = HttpBackendClient::new(reclaimer.clone(), Duration::from_millis(1));
        let err = client
            .unload_model(&descriptor(BackendKind::Text, &server))
            .await
            .unwrap_err();
        assert_eq!(err.failure, RemoteFailure::Status(500));
        assert!(!reclaimer.events.lock().iter().any(|e| e == "reclaim"));
    }

    #[tokio::test]
    async fn generate_sends_profile_and_decodes_image() {
        let server = MockServer::start().await;
        let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        Mock::given(method("POST"))
            .and(path("/txt2img"))
            .and(body_json(json!({
                "prompt": "a lighthouse",
                "steps": 30,
                "cfg_scale": 4.0,
                "width": 832,
                "height": 1216,
                "sampler_index": "dpm_sde",
                "scheduler": "karras",
                "model": "albedobaseXL_v20.safetensors",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "images": [encoded] })))
            .mount(&server)
            .await;

        let artifact = client()
            .generate(&descriptor(BackendKind::Image, &server), "a lighthouse", &profile())
            .await
            .unwrap();
        assert_eq!(artifact.bytes, png);
        assert_eq!(artifact.model, "albedobaseXL_v20.safetensors");
    }

    #[tokio::test]
    async fn generate_non_200_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/txt2img"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client()
            .generate(&descriptor(BackendKind::Image, &server), "x", &profile())
            .await
            .unwrap_err();
        assert!(matches!(err, GenError::Status { status: 500 }));
    }

    #[test]
    fn data_url_prefix_is_accepted() {
        let body = json!({ "images": ["data:image/png;base64,AQID"] });
        assert_eq!(decode_first_image(&body).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            decode_first_image(&json!({ "images": [] })),
            Err(GenError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn completion_is_sanitized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "text": "  Hello ```print(1)``` World  " }]
            })))
            .mount(&server)
            .await;

        let text = client()
            .complete(&descriptor(BackendKind::Text, &server), "hi", &persona())
            .await
            .unwrap();
        assert_eq!(text, "Hello  World");
    }

    #[tokio::test]
    async fn completion_of_only_code_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "text": "```rm -rf /```" }]
            })))
            .mount(&server)
            .await;

        let err = client()
            .complete(&descriptor(BackendKind::Text, &server), "hi", &persona())
            .await
            .unwrap_err();
        assert!(matches!(err, GenError::Empty));
    }

    #[tokio::test]
    async fn completion_without_choices_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client()
            .complete(&descriptor(BackendKind::Text, &server), "hi", &persona())
            .await
            .unwrap_err();
        assert!(matches!(err, GenError::Empty));
    }

    #[tokio::test]
    async fn slow_completion_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "choices": [{ "text": "late" }] }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut desc = descriptor(BackendKind::Text, &server);
        desc.request_timeout = Some(Duration::from_millis(100));
        let err = client().complete(&desc, "hi", &persona()).await.unwrap_err();
        assert!(matches!(err, GenError::Timeout(_)));
    }
}
