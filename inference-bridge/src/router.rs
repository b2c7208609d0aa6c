//! Inference router choosing a backend for each request.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bridge_common::{
    base_model_name, is_namespaced, BackendKind, DistributedStatus, ErrorReply, InferenceRequest,
    InferenceResponse, LocalStatus, ModelDescriptor, PullReport, PullStatus, SystemReport,
};

use crate::config::RecommendedModel;
use crate::engine::{BackendAdapter, ModelPuller};
use crate::session::SessionRegistry;

/// Error carried by responses when no backend can serve a request.
pub const NO_BACKEND_ERROR: &str = "No inference backend available. Install Ollama (curl -fsSL https://ollama.com/install.sh | sh) or Petals (pip install petals transformers)";

const INSTALL_OLLAMA: &str = "Install Ollama: curl -fsSL https://ollama.com/install.sh | sh";
const INSTALL_PETALS: &str = "Install Petals: pip install petals transformers";

/// Backend state observed for one routing decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct Availability {
    pub local: bool,
    pub distributed: bool,
    /// Whether the distributed backend serves the requested model.
    pub distributed_supports: bool,
}

/// Pick the backend for `model`, first match in priority order.
///
/// Namespaced models ("org/name") never go to the local backend. Returns
/// `None` when nothing can serve the model.
pub fn select_backend(model: &str, availability: Availability) -> Option<BackendKind> {
    BackendKind::SERVING.into_iter().find(|kind| match kind {
        BackendKind::Local => availability.local && !is_namespaced(model),
        BackendKind::Distributed => availability.distributed && availability.distributed_supports,
        BackendKind::None => false,
    })
}

/// Router dispatching requests to the local and distributed backends.
pub struct InferenceRouter {
    sessions: Arc<SessionRegistry>,
    local: Arc<dyn BackendAdapter>,
    distributed: Arc<dyn BackendAdapter>,
    puller: Arc<dyn ModelPuller>,
    recommended: Vec<RecommendedModel>,
}

impl InferenceRouter {
    /// Create a new router.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        local: Arc<dyn BackendAdapter>,
        distributed: Arc<dyn BackendAdapter>,
        puller: Arc<dyn ModelPuller>,
        recommended: Vec<RecommendedModel>,
    ) -> Self {
        Self {
            sessions,
            local,
            distributed,
            puller,
            recommended,
        }
    }

    /// Route one inference request and stamp its session id on the response.
    pub async fn infer(&self, request: &InferenceRequest) -> InferenceResponse {
        let model = self
            .sessions
            .resolve_model(request.session_id, request.explicit_model.as_deref())
            .await;

        let response = match self.choose_backend(&model).await {
            Some(kind) => {
                let adapter = self.adapter(kind);
                tracing::info!(
                    session_id = request.session_id,
                    model = %model,
                    backend = %adapter.kind(),
                    "Routing inference request"
                );
                adapter
                    .generate(&model, &request.prompt, request.max_tokens, request.temperature)
                    .await
            }
            None => {
                tracing::warn!(
                    session_id = request.session_id,
                    model = %model,
                    "No backend available for request"
                );
                InferenceResponse::failure(&model, BackendKind::None, NO_BACKEND_ERROR)
            }
        };

        response.with_session(request.session_id)
    }

    /// Catalog of every backend: local entries first, then distributed.
    pub async fn list_all_models(&self) -> Vec<ModelDescriptor> {
        let mut models = self.local.list_models().await;
        models.extend(self.distributed.list_models().await);
        models
    }

    /// Advisory report on backend health and missing recommended models.
    pub async fn system_check(&self) -> SystemReport {
        let local_available = self.local.is_available().await;
        let distributed_available = self.distributed.is_available().await;

        let mut report = SystemReport {
            timestamp: SystemReport::now_timestamp(),
            local: LocalStatus {
                available: local_available,
                models: vec![],
                running: vec![],
            },
            distributed: DistributedStatus {
                available: distributed_available,
                models: vec![],
            },
            missing_recommended: vec![],
            recommended_actions: vec![],
        };

        if local_available {
            report.local.models = self.local.list_models().await;
            report.local.running = self.local.running_models().await;

            let installed = installed_base_names(&report.local.models);
            for rec in self.pullable_recommended() {
                if !installed.contains(base_model_name(&rec.model)) {
                    report.missing_recommended.push(rec.model.clone());
                    report
                        .recommended_actions
                        .push(format!("Pull '{}' for {} use case", rec.model, rec.use_case));
                }
            }
        } else {
            report.recommended_actions.push(INSTALL_OLLAMA.to_string());
        }

        if distributed_available {
            report.distributed.models = self.distributed.list_models().await;
        } else {
            report.recommended_actions.push(INSTALL_PETALS.to_string());
        }

        report
    }

    /// Pull one model into the local backend. Returns whether it succeeded.
    pub async fn pull_model(&self, model: &str) -> bool {
        match self.puller.pull(model).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "Model pull failed");
                false
            }
        }
    }

    /// Pull every recommended model that is not installed yet.
    pub async fn pull_recommended(&self) -> PullReport {
        if !self.local.is_available().await {
            return PullReport::Unavailable(ErrorReply::new("Ollama not available"));
        }

        let models = self.local.list_models().await;
        let installed = installed_base_names(&models);
        let mut results = BTreeMap::new();

        for rec in self.pullable_recommended() {
            let status = if installed.contains(base_model_name(&rec.model)) {
                PullStatus::AlreadyInstalled
            } else if self.pull_model(&rec.model).await {
                PullStatus::Success
            } else {
                PullStatus::Failed
            };
            results.insert(rec.model.clone(), status);
        }

        PullReport::Completed(results)
    }

    pub async fn create_session(&self, model: Option<String>) -> u64 {
        self.sessions.create(model).await
    }

    pub async fn close_session(&self, session_id: u64) {
        self.sessions.close(session_id).await;
    }

    async fn choose_backend(&self, model: &str) -> Option<BackendKind> {
        // The local probe is an HTTP round trip; skip it when local can't serve the model anyway.
        let local = !is_namespaced(model) && self.local.is_available().await;
        let availability = Availability {
            local,
            distributed: !local && self.distributed.is_available().await,
            distributed_supports: self.distributed.supports(model),
        };
        select_backend(model, availability)
    }

    fn adapter(&self, kind: BackendKind) -> &dyn BackendAdapter {
        match kind {
            BackendKind::Distributed => self.distributed.as_ref(),
            _ => self.local.as_ref(),
        }
    }

    /// Recommended models the local backend can pull.
    fn pullable_recommended(&self) -> impl Iterator<Item = &RecommendedModel> {
        self.recommended.iter().filter(|rec| !is_namespaced(&rec.model))
    }
}

fn installed_base_names(models: &[ModelDescriptor]) -> HashSet<&str> {
    models.iter().map(|m| m.base_name()).collect()
}
