//! Model catalog types.

use serde::{Deserialize, Serialize};

/// Inference backends known to the bridge.
///
/// `None` only ever appears on responses, when no backend could serve the
/// request. Catalog entries always name a real backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// HTTP model server on local hardware (Ollama)
    Local,
    /// Peer-to-peer network sharding large models across participants (Petals)
    Distributed,
    /// No backend served the request
    None,
}

impl BackendKind {
    /// Backends that can actually serve requests, in routing priority order.
    pub const SERVING: [BackendKind; 2] = [BackendKind::Local, BackendKind::Distributed];
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Distributed => write!(f, "distributed"),
            BackendKind::None => write!(f, "none"),
        }
    }
}

/// Snapshot of one model as reported by a backend catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier (e.g., "llama3.2:3b" or "meta-llama/Meta-Llama-3.1-70B-Instruct")
    pub name: String,
    pub backend: BackendKind,
    /// Approximate size on disk or across the network, in GiB
    pub size_gb: f64,
    /// Parameter count as reported (e.g., "7B"), or "unknown"
    pub parameter_count: String,
    /// Quantization level (e.g., "Q4_K_M"), or "unknown"
    pub quantization: String,
    pub available: bool,
    /// Whether the backend currently holds the model in memory
    #[serde(default)]
    pub currently_loaded: bool,
}

impl ModelDescriptor {
    /// Name without the `:tag` suffix, used to compare installed models.
    pub fn base_name(&self) -> &str {
        base_model_name(&self.name)
    }
}

/// Strip the `:tag` suffix of a model name ("llama3.2:3b" -> "llama3.2").
pub fn base_model_name(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

/// Whether a model name carries an organization/path namespace
/// ("meta-llama/Meta-Llama-3.1-8B-Instruct").
pub fn is_namespaced(name: &str) -> bool {
    name.contains('/')
}
