//! Ollama backend adapter.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bridge_common::{BackendKind, InferenceResponse, ModelDescriptor};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{strip_prompt_echo, BackendAdapter, ModelPuller};
use crate::config::LocalBackendConfig;
use crate::error::{Error, Result};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Ollama backend adapter.
///
/// Communicates with an Ollama server over its HTTP API.
pub struct OllamaAdapter {
    http_client: Client,
    enabled: bool,
    base_url: String,
    probe_timeout: Duration,
    catalog_timeout: Duration,
    generate_timeout: Duration,
    pull_timeout: Duration,
}

impl OllamaAdapter {
    pub fn new(base_url: &str) -> Self {
        Self::from_config(&LocalBackendConfig {
            base_url: base_url.to_string(),
            ..LocalBackendConfig::default()
        })
    }

    pub fn from_config(config: &LocalBackendConfig) -> Self {
        Self {
            http_client: Client::new(),
            enabled: config.enabled,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            catalog_timeout: Duration::from_secs(config.catalog_timeout_secs),
            generate_timeout: Duration::from_secs(config.generate_timeout_secs),
            pull_timeout: Duration::from_secs(config.pull_timeout_secs),
        }
    }

    /// Names of models currently loaded in memory (`/api/ps`).
    pub async fn list_running(&self) -> Vec<String> {
        match self.fetch_running().await {
            Ok(running) => running.models.into_iter().map(|m| m.name).collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to list running Ollama models");
                vec![]
            }
        }
    }

    async fn fetch_tags(&self) -> Result<OllamaTagsResponse> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .timeout(self.catalog_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Communication(format!(
                "Ollama returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn fetch_running(&self) -> Result<OllamaPsResponse> {
        let url = format!("{}/api/ps", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .timeout(self.catalog_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Communication(format!(
                "Ollama returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn request_generation(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<OllamaGenerateResponse> {
        let request = OllamaGenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                num_predict: max_tokens,
                temperature,
            },
        };

        let url = format!("{}/api/generate", self.base_url);

        tracing::debug!("Sending generate request to Ollama: {} model={}", url, model);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .timeout(self.generate_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InferenceFailed(format!("{}: {}", status, body)));
        }

        let generated: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::InferenceFailed(format!("malformed response: {}", e)))?;

        if let Some(error) = generated.error {
            return Err(Error::InferenceFailed(error));
        }

        Ok(generated)
    }
}

// ============================================================================
// Ollama API types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

/// Response from /api/tags endpoint.
#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModelInfo>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelInfo {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    details: Option<OllamaModelDetails>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelDetails {
    #[serde(default)]
    parameter_size: Option<String>,
    #[serde(default)]
    quantization_level: Option<String>,
}

/// Response from /api/ps endpoint.
#[derive(Debug, Deserialize)]
struct OllamaPsResponse {
    #[serde(default)]
    models: Vec<OllamaRunningModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaRunningModel {
    name: String,
}

#[derive(Debug, Serialize)]
struct OllamaPullRequest {
    model: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaPullResponse {
    #[serde(default)]
    error: Option<String>,
}

// ============================================================================
// BackendAdapter implementation
// ============================================================================

#[async_trait]
impl BackendAdapter for OllamaAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn is_available(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let url = format!("{}/api/tags", self.base_url);

        match self
            .http_client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::debug!(error = %e, "Ollama liveness probe failed");
                false
            }
        }
    }

    async fn list_models(&self) -> Vec<ModelDescriptor> {
        let tags = match self.fetch_tags().await {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list Ollama models");
                return vec![];
            }
        };
        let running = self.running_models().await;

        tags.models
            .into_iter()
            .map(|m| {
                let size_gb = m
                    .size
                    .map(|bytes| (bytes as f64 / BYTES_PER_GIB * 100.0).round() / 100.0)
                    .unwrap_or(0.0);
                let parameter_count = m
                    .details
                    .as_ref()
                    .and_then(|d| d.parameter_size.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                let quantization = m
                    .details
                    .as_ref()
                    .and_then(|d| d.quantization_level.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                let currently_loaded = running.iter().any(|r| *r == m.name);

                ModelDescriptor {
                    name: m.name,
                    backend: BackendKind::Local,
                    size_gb,
                    parameter_count,
                    quantization,
                    available: true,
                    currently_loaded,
                }
            })
            .collect()
    }

    async fn running_models(&self) -> Vec<String> {
        self.list_running().await
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> InferenceResponse {
        let start = Instant::now();

        match self
            .request_generation(model, prompt, max_tokens, temperature)
            .await
        {
            Ok(generated) => {
                let elapsed = start.elapsed();
                let text = strip_prompt_echo(&generated.response, prompt);
                let tokens = generated
                    .eval_count
                    .unwrap_or_else(|| text.split_whitespace().count() as u32);
                InferenceResponse::success(model, BackendKind::Local, text, tokens, elapsed)
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "Ollama generation failed");
                InferenceResponse::failure(model, BackendKind::Local, e.response_message())
            }
        }
    }
}

#[async_trait]
impl ModelPuller for OllamaAdapter {
    async fn pull(&self, model: &str) -> Result<()> {
        let url = format!("{}/api/pull", self.base_url);
        let request = OllamaPullRequest {
            model: model.to_string(),
            stream: false,
        };

        tracing::info!("Pulling model {} via Ollama API", model);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .timeout(self.pull_timeout)
            .send()
            .await
            .map_err(|e| Error::PullFailed(format!("{}: {}", model, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::PullFailed(format!("{}: {}: {}", model, status, body)));
        }

        let pulled: OllamaPullResponse = response
            .json()
            .await
            .map_err(|e| Error::PullFailed(format!("{}: {}", model, e)))?;
        if let Some(error) = pulled.error {
            return Err(Error::PullFailed(format!("{}: {}", model, error)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_tags(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {
                        "name": "llama3.2:latest",
                        "size": 2019393189u64,
                        "details": {"parameter_size": "3.2B", "quantization_level": "Q4_K_M"}
                    },
                    {"name": "qwen2.5:14b"}
                ]
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_ollama_adapter_url_normalization() {
        let adapter = OllamaAdapter::new("http://localhost:11434/");
        assert_eq!(adapter.base_url, "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_is_available_on_200() {
        let server = MockServer::start().await;
        mock_tags(&server).await;

        let adapter = OllamaAdapter::new(&server.uri());
        assert!(adapter.is_available().await);
    }

    #[tokio::test]
    async fn test_is_unavailable_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        assert!(!adapter.is_available().await);
    }

    #[tokio::test]
    async fn test_disabled_adapter_is_unavailable() {
        let server = MockServer::start().await;
        mock_tags(&server).await;

        let adapter = OllamaAdapter::from_config(&LocalBackendConfig {
            enabled: false,
            base_url: server.uri(),
            ..LocalBackendConfig::default()
        });
        assert!(!adapter.is_available().await);
    }

    #[tokio::test]
    async fn test_is_unavailable_when_unreachable() {
        let adapter = OllamaAdapter::new("http://127.0.0.1:1");
        assert!(!adapter.is_available().await);
    }

    #[tokio::test]
    async fn test_list_models_maps_tags_and_running() {
        let server = MockServer::start().await;
        mock_tags(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/ps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3.2:latest"}]
            })))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        let models = adapter.list_models().await;

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3.2:latest");
        assert_eq!(models[0].backend, BackendKind::Local);
        assert_eq!(models[0].size_gb, 1.88);
        assert_eq!(models[0].parameter_count, "3.2B");
        assert_eq!(models[0].quantization, "Q4_K_M");
        assert!(models[0].currently_loaded);

        assert_eq!(models[1].parameter_count, "unknown");
        assert_eq!(models[1].size_gb, 0.0);
        assert!(!models[1].currently_loaded);
    }

    #[tokio::test]
    async fn test_list_models_without_ps_endpoint() {
        let server = MockServer::start().await;
        mock_tags(&server).await;

        let adapter = OllamaAdapter::new(&server.uri());
        let models = adapter.list_models().await;

        assert_eq!(models.len(), 2);
        assert!(models.iter().all(|m| !m.currently_loaded));
    }

    #[tokio::test]
    async fn test_list_models_failure_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        assert!(adapter.list_models().await.is_empty());
    }

    #[tokio::test]
    async fn test_generate_strips_echoed_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "llama3.2:latest",
                "stream": false,
                "options": {"num_predict": 64}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "Why is the sky blue? Rayleigh scattering.",
                "eval_count": 4,
                "done": true
            })))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        let resp = adapter
            .generate("llama3.2:latest", "Why is the sky blue?", 64, 0.7)
            .await;

        assert!(resp.is_success());
        assert_eq!(resp.text, " Rayleigh scattering.");
        assert_eq!(resp.tokens_generated, 4);
        assert!(resp.tokens_per_second >= 0.0);
        assert_eq!(resp.backend, BackendKind::Local);
        assert_eq!(resp.model_used, "llama3.2:latest");
    }

    #[tokio::test]
    async fn test_generate_counts_words_without_eval_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "one two three"
            })))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        let resp = adapter.generate("llama3.2:latest", "Count", 16, 0.0).await;

        assert_eq!(resp.tokens_generated, 3);
        assert_eq!(resp.text, "one two three");
    }

    #[tokio::test]
    async fn test_generate_error_status_is_captured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"error": "model 'missing' not found"})),
            )
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        let resp = adapter.generate("missing", "Hi", 16, 0.7).await;

        assert!(!resp.is_success());
        assert!(resp.text.is_empty());
        assert_eq!(resp.tokens_generated, 0);
        assert_eq!(resp.tokens_per_second, 0.0);
        assert_eq!(
            resp.error.as_deref(),
            Some(r#"404 Not Found: {"error":"model 'missing' not found"}"#)
        );
    }

    #[tokio::test]
    async fn test_generate_malformed_response_is_captured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        let resp = adapter.generate("llama3.2:latest", "Hi", 16, 0.7).await;

        assert!(resp.error.unwrap().contains("malformed response"));
    }

    #[tokio::test]
    async fn test_generate_unreachable_is_captured() {
        let adapter = OllamaAdapter::new("http://127.0.0.1:1");
        let resp = adapter.generate("llama3.2:latest", "Hi", 16, 0.7).await;

        assert!(resp.error.is_some());
        assert_eq!(resp.backend, BackendKind::Local);
    }

    #[tokio::test]
    async fn test_pull_via_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .and(body_partial_json(json!({"model": "llama3.1:8b", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        assert!(adapter.pull("llama3.1:8b").await.is_ok());
    }

    #[tokio::test]
    async fn test_pull_via_api_reports_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "pull model manifest: file does not exist"})),
            )
            .mount(&server)
            .await;

        let adapter = OllamaAdapter::new(&server.uri());
        let err = adapter.pull("nope:1b").await.unwrap_err();
        assert!(matches!(err, Error::PullFailed(_)));
    }
}
