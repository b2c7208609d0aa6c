//! Petals distributed-network backend adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bridge_common::{BackendKind, InferenceResponse, ModelDescriptor};
use tokio::sync::Mutex;

use super::{size_from_name, strip_prompt_echo, BackendAdapter, DistributedRuntime, SidecarRuntime};
use crate::config::DistributedBackendConfig;

/// Petals backend adapter.
///
/// Availability is decided once, at construction: an adapter built without a
/// runtime stays unavailable for the life of the process. Models are loaded
/// lazily on first use and remembered per model name.
pub struct PetalsAdapter {
    runtime: Option<Arc<dyn DistributedRuntime>>,
    supported_models: Vec<String>,
    /// One slot per model name. The inner flag is `true` once loaded; holding
    /// the slot lock serializes concurrent first loads of the same model.
    load_slots: Mutex<HashMap<String, Arc<Mutex<bool>>>>,
}

impl PetalsAdapter {
    pub fn new(runtime: Option<Arc<dyn DistributedRuntime>>, supported_models: Vec<String>) -> Self {
        Self {
            runtime,
            supported_models,
            load_slots: Mutex::new(HashMap::new()),
        }
    }

    /// Build the adapter from configuration, probing the sidecar once.
    pub async fn connect(config: &DistributedBackendConfig) -> Self {
        if !config.enabled {
            tracing::info!("Distributed backend disabled by configuration");
            return Self::new(None, config.supported_models.clone());
        }

        match SidecarRuntime::connect(config).await {
            Ok(runtime) => {
                tracing::info!("Petals sidecar available at {}", config.sidecar_addr);
                Self::new(Some(Arc::new(runtime)), config.supported_models.clone())
            }
            Err(e) => {
                tracing::warn!(
                    "Petals sidecar not available at {}: {}",
                    config.sidecar_addr,
                    e
                );
                Self::new(None, config.supported_models.clone())
            }
        }
    }

    /// Load `model` if it is not loaded yet. Returns whether it is ready.
    ///
    /// Concurrent callers for the same model wait for the first load and see
    /// its result. Failed loads are not remembered; the next caller retries.
    pub async fn ensure_loaded(&self, model: &str) -> bool {
        let Some(runtime) = self.runtime.as_ref() else {
            return false;
        };

        let slot = {
            let mut slots = self.load_slots.lock().await;
            slots.entry(model.to_string()).or_default().clone()
        };

        let mut loaded = slot.lock().await;
        if *loaded {
            return true;
        }

        tracing::info!("Loading distributed model: {}", model);
        match runtime.load(model).await {
            Ok(()) => {
                *loaded = true;
                tracing::info!("Distributed model {} loaded", model);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to load distributed model {}: {}", model, e);
                false
            }
        }
    }

    /// Whether `model` has finished loading. A load in progress counts as not loaded.
    async fn is_loaded(&self, model: &str) -> bool {
        let slot = self.load_slots.lock().await.get(model).cloned();
        match slot {
            Some(slot) => slot.try_lock().map(|loaded| *loaded).unwrap_or(false),
            None => false,
        }
    }
}

#[async_trait]
impl BackendAdapter for PetalsAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
    }

    async fn is_available(&self) -> bool {
        self.runtime.is_some()
    }

    fn supports(&self, model: &str) -> bool {
        self.supported_models.iter().any(|m| m == model)
    }

    async fn list_models(&self) -> Vec<ModelDescriptor> {
        let available = self.runtime.is_some();
        let mut models = Vec::with_capacity(self.supported_models.len());

        for name in &self.supported_models {
            let (size_gb, parameter_count) = size_from_name(name);
            models.push(ModelDescriptor {
                name: name.clone(),
                backend: BackendKind::Distributed,
                size_gb,
                parameter_count: parameter_count.to_string(),
                quantization: "distributed".to_string(),
                available,
                currently_loaded: self.is_loaded(name).await,
            });
        }

        models
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> InferenceResponse {
        let Some(runtime) = self.runtime.as_ref() else {
            return InferenceResponse::failure(
                model,
                BackendKind::Distributed,
                "Petals not available",
            );
        };

        if !self.ensure_loaded(model).await {
            return InferenceResponse::failure(
                model,
                BackendKind::Distributed,
                format!("Model not loaded: {}", model),
            );
        }

        let start = Instant::now();
        match runtime.generate(model, prompt, max_tokens, temperature).await {
            Ok(raw) => {
                let elapsed = start.elapsed();
                let text = strip_prompt_echo(&raw.text, prompt);
                InferenceResponse::success(model, BackendKind::Distributed, text, raw.tokens, elapsed)
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "Petals generation failed");
                InferenceResponse::failure(model, BackendKind::Distributed, e.response_message())
            }
        }
    }
}
