//! Request dispatch for one client message.

use bridge_common::{
    Ack, ClientRequest, ErrorReply, ModelList, PullOutcome, SessionCreated, ShutdownAck,
};
use serde::Serialize;
use serde_json::Value;

use crate::state::AppState;

/// Reply to one message, and whether the connection should close after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub reply: Value,
    pub close: bool,
}

impl Dispatch {
    fn reply<T: Serialize>(body: &T) -> Self {
        let reply = serde_json::to_value(body)
            .unwrap_or_else(|e| serde_json::json!({ "error": format!("Failed to encode reply: {}", e) }));
        Self { reply, close: false }
    }

    /// An `{"error": ...}` reply that keeps the connection open.
    pub fn error(message: impl Into<String>) -> Self {
        Self::reply(&ErrorReply::new(message))
    }
}

/// Parse and execute one message. Exactly one reply per call.
pub async fn handle_message(state: &AppState, message: &str) -> Dispatch {
    let request = match ClientRequest::parse(message) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected client message");
            return Dispatch::reply(&ErrorReply::from(e));
        }
    };

    tracing::debug!(action = request.action(), "Handling request");
    let router = &state.router;

    match request {
        ClientRequest::SystemCheck => Dispatch::reply(&router.system_check().await),
        ClientRequest::ListModels => Dispatch::reply(&ModelList {
            models: router.list_all_models().await,
        }),
        ClientRequest::PullModel { model } => {
            let success = router.pull_model(&model).await;
            Dispatch::reply(&PullOutcome { success, model })
        }
        ClientRequest::PullRecommended => Dispatch::reply(&router.pull_recommended().await),
        ClientRequest::CreateSession { model } => Dispatch::reply(&SessionCreated {
            session_id: router.create_session(model).await,
        }),
        ClientRequest::CloseSession { session_id } => {
            router.close_session(session_id).await;
            Dispatch::reply(&Ack { success: true })
        }
        ClientRequest::Infer(request) => Dispatch::reply(&router.infer(&request).await),
        ClientRequest::Shutdown => {
            if !state.config.server.allow_shutdown {
                tracing::warn!("Client requested shutdown but it is not permitted");
                return Dispatch::error("Shutdown not permitted");
            }
            tracing::info!("Shutdown requested by client");
            state.shutdown.cancel();
            Dispatch {
                close: true,
                ..Dispatch::reply(&ShutdownAck::shutting_down())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{OllamaAdapter, PetalsAdapter};
    use crate::router::InferenceRouter;
    use crate::session::SessionRegistry;
    use std::sync::Arc;

    /// State with no reachable backend.
    fn offline_state(allow_shutdown: bool) -> AppState {
        let mut config = Config::default();
        config.server.allow_shutdown = allow_shutdown;
        config.local.enabled = false;

        let local = Arc::new(OllamaAdapter::from_config(&config.local));
        let router = InferenceRouter::new(
            Arc::new(SessionRegistry::new(config.models.default.clone())),
            local.clone(),
            Arc::new(PetalsAdapter::new(None, config.distributed.supported_models.clone())),
            local,
            config.models.recommended.clone(),
        );
        AppState::new(config, router)
    }

    #[tokio::test]
    async fn test_invalid_json_reply() {
        let state = offline_state(false);
        let dispatch = handle_message(&state, "{not json").await;

        assert!(!dispatch.close);
        let error = dispatch.reply["error"].as_str().unwrap();
        assert!(error.starts_with("Invalid JSON: "), "{}", error);
    }

    #[tokio::test]
    async fn test_unknown_action_reply() {
        let state = offline_state(false);
        let dispatch = handle_message(&state, r#"{"action": "dance"}"#).await;
        assert_eq!(dispatch.reply["error"], "Unknown action: dance");
    }

    #[tokio::test]
    async fn test_session_lifecycle_replies() {
        let state = offline_state(false);

        let created = handle_message(&state, r#"{"action": "create_session", "model": "llama3.1:8b"}"#).await;
        assert_eq!(created.reply["session_id"], 1);

        let closed = handle_message(&state, r#"{"action": "close_session", "session_id": 1}"#).await;
        assert_eq!(closed.reply, serde_json::json!({"success": true}));

        let again = handle_message(&state, r#"{"action": "close_session", "session_id": 1}"#).await;
        assert_eq!(again.reply, serde_json::json!({"success": true}));
    }

    #[tokio::test]
    async fn test_infer_without_backends() {
        let state = offline_state(false);
        let dispatch = handle_message(&state, r#"{"prompt": "Hello", "session_id": 7}"#).await;

        assert_eq!(dispatch.reply["backend"], "none");
        assert_eq!(dispatch.reply["session_id"], 7);
        assert_eq!(dispatch.reply["tokens_generated"], 0);
        assert!(dispatch.reply["error"].as_str().unwrap().starts_with("No inference backend"));
    }

    #[tokio::test]
    async fn test_invalid_infer_fields() {
        let state = offline_state(false);
        let dispatch = handle_message(&state, r#"{"prompt": "Hi", "max_tokens": 0}"#).await;
        assert!(dispatch.reply["error"].as_str().unwrap().starts_with("Invalid request: "));
    }

    #[tokio::test]
    async fn test_pull_recommended_without_local() {
        let state = offline_state(false);
        let dispatch = handle_message(&state, r#"{"action": "pull_recommended"}"#).await;
        assert_eq!(dispatch.reply, serde_json::json!({"error": "Ollama not available"}));
    }

    #[tokio::test]
    async fn test_shutdown_not_permitted() {
        let state = offline_state(false);
        let dispatch = handle_message(&state, r#"{"action": "shutdown"}"#).await;

        assert_eq!(dispatch.reply["error"], "Shutdown not permitted");
        assert!(!dispatch.close);
        assert!(!state.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_permitted() {
        let state = offline_state(true);
        let dispatch = handle_message(&state, r#"{"action": "shutdown"}"#).await;

        assert_eq!(dispatch.reply["status"], "shutting_down");
        assert!(dispatch.close);
        assert!(state.shutdown.is_cancelled());
    }
}
