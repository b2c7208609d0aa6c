//! Socket protocol between native clients and the bridge.
//!
//! # Framing
//!
//! Each message is one JSON document terminated by `\n`. Replies use the same
//! framing. Every request gets exactly one reply, in order.
//!
//! # Requests
//!
//! Requests are objects with an `action` field that selects the operation.
//! A request without `action` is treated as `infer`.
//!
//! ```json
//! {"action": "create_session", "model": "llama3.1:8b"}
//! {"action": "infer", "session_id": 1, "prompt": "Hello", "max_tokens": 64}
//! {"action": "close_session", "session_id": 1}
//! ```
//!
//! Failures are reported as `{"error": "..."}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{InferenceRequest, ModelDescriptor};

/// Actions understood by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Availability and catalog report for every backend.
    SystemCheck,
    /// Models from every backend, local first.
    ListModels,
    /// Fetch one model into the local backend.
    PullModel { model: String },
    /// Fetch every recommended model that is not installed yet.
    PullRecommended,
    /// Open a session, optionally pinned to a model.
    CreateSession {
        #[serde(default)]
        model: Option<String>,
    },
    /// Close a session. Unknown ids are accepted.
    CloseSession {
        #[serde(default)]
        session_id: u64,
    },
    /// Generate text.
    Infer(InferenceRequest),
    /// Stop accepting connections and close this one.
    Shutdown,
}

impl ClientRequest {
    /// Action names, as they appear on the wire.
    pub const ACTIONS: [&'static str; 8] = [
        "system_check",
        "list_models",
        "pull_model",
        "pull_recommended",
        "create_session",
        "close_session",
        "infer",
        "shutdown",
    ];

    /// Action name used when a request omits `action`.
    pub const DEFAULT_ACTION: &'static str = "infer";

    /// Parse one framed message.
    pub fn parse(message: &str) -> Result<Self, RequestError> {
        let mut value: serde_json::Value =
            serde_json::from_str(message).map_err(|e| RequestError::InvalidJson(e.to_string()))?;

        let object = value
            .as_object_mut()
            .ok_or_else(|| RequestError::Invalid("expected a JSON object".to_string()))?;

        let action = match object.get("action") {
            None | Some(serde_json::Value::Null) => Self::DEFAULT_ACTION.to_string(),
            Some(serde_json::Value::String(action)) => action.clone(),
            Some(other) => {
                return Err(RequestError::Invalid(format!(
                    "action must be a string, got {}",
                    other
                )))
            }
        };

        if !Self::ACTIONS.contains(&action.as_str()) {
            return Err(RequestError::UnknownAction(action));
        }
        object.insert("action".to_string(), serde_json::Value::String(action));

        let request: ClientRequest =
            serde_json::from_value(value).map_err(|e| RequestError::Invalid(e.to_string()))?;

        if let ClientRequest::Infer(ref infer) = request {
            infer.validate().map_err(RequestError::Invalid)?;
        }

        Ok(request)
    }

    /// Wire name of this action.
    pub fn action(&self) -> &'static str {
        match self {
            ClientRequest::SystemCheck => "system_check",
            ClientRequest::ListModels => "list_models",
            ClientRequest::PullModel { .. } => "pull_model",
            ClientRequest::PullRecommended => "pull_recommended",
            ClientRequest::CreateSession { .. } => "create_session",
            ClientRequest::CloseSession { .. } => "close_session",
            ClientRequest::Infer(_) => "infer",
            ClientRequest::Shutdown => "shutdown",
        }
    }
}

/// Why a message could not be turned into a [`ClientRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    /// Not valid JSON (including truncated documents).
    InvalidJson(String),
    /// `action` names nothing the bridge knows.
    UnknownAction(String),
    /// Valid JSON, but fields are missing or out of range.
    Invalid(String),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::InvalidJson(detail) => write!(f, "Invalid JSON: {}", detail),
            RequestError::UnknownAction(action) => write!(f, "Unknown action: {}", action),
            RequestError::Invalid(detail) => write!(f, "Invalid request: {}", detail),
        }
    }
}

impl std::error::Error for RequestError {}

/// `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

impl ErrorReply {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl From<RequestError> for ErrorReply {
    fn from(e: RequestError) -> Self {
        Self::new(e.to_string())
    }
}

/// Reply to `create_session`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: u64,
}

/// Reply to `close_session`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

/// Reply to `pull_model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullOutcome {
    pub success: bool,
    pub model: String,
}

/// Reply to `list_models`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<ModelDescriptor>,
}

/// Reply to `shutdown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownAck {
    pub status: String,
}

impl ShutdownAck {
    pub fn shutting_down() -> Self {
        Self {
            status: "shutting_down".to_string(),
        }
    }
}

/// Result of pulling one recommended model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullStatus {
    AlreadyInstalled,
    Success,
    Failed,
}

/// Reply to `pull_recommended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PullReport {
    /// The local backend is down; nothing was attempted.
    Unavailable(ErrorReply),
    /// Per-model outcome, keyed by model name.
    Completed(BTreeMap<String, PullStatus>),
}

impl PullReport {
    /// Whether any pull was attempted and failed.
    pub fn has_failures(&self) -> bool {
        match self {
            PullReport::Unavailable(_) => true,
            PullReport::Completed(results) => {
                results.values().any(|status| *status == PullStatus::Failed)
            }
        }
    }
}

/// Local backend section of the system report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStatus {
    pub available: bool,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
    /// Names of models currently held in memory.
    #[serde(default)]
    pub running: Vec<String>,
}

/// Distributed backend section of the system report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedStatus {
    pub available: bool,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

/// Reply to `system_check`. Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemReport {
    /// Local time, "YYYY-MM-DD HH:MM:SS".
    pub timestamp: String,
    pub local: LocalStatus,
    pub distributed: DistributedStatus,
    /// Recommended local models whose base name is not installed.
    #[serde(default)]
    pub missing_recommended: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}

impl SystemReport {
    /// Timestamp in the report format.
    pub fn now_timestamp() -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
