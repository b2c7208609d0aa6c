//! Shared application state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, PullMethod};
use crate::engine::{CommandPuller, ModelPuller, OllamaAdapter, PetalsAdapter};
use crate::router::InferenceRouter;
use crate::session::SessionRegistry;

/// Shared application state passed to every connection.
pub struct AppState {
    pub config: Config,
    pub router: InferenceRouter,
    /// Cancelled when the bridge should stop accepting connections.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, router: InferenceRouter) -> Self {
        Self {
            config,
            router,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the backends described by `config` and wire them into a router.
    ///
    /// The Petals sidecar is probed here, once.
    pub async fn from_config(config: Config) -> Self {
        let local = Arc::new(OllamaAdapter::from_config(&config.local));
        tracing::info!("Local backend (Ollama) at {}", config.local.base_url);

        let distributed = Arc::new(PetalsAdapter::connect(&config.distributed).await);

        let puller: Arc<dyn ModelPuller> = match config.pull.method {
            PullMethod::Api => local.clone(),
            PullMethod::Command => Arc::new(CommandPuller::from_config(&config.pull)),
        };

        let sessions = Arc::new(SessionRegistry::new(config.models.default.clone()));
        let router = InferenceRouter::new(
            sessions,
            local,
            distributed,
            puller,
            config.models.recommended.clone(),
        );

        Self::new(config, router)
    }
}
