//! Backend adapter abstraction layer.
//!
//! This module defines the `BackendAdapter` trait that puts the local HTTP
//! backend (Ollama) and the distributed network (Petals) behind one interface.
//! Adapters never return errors to the router: catalog failures become empty
//! lists and generation failures are carried in the response `error` field.

mod ollama;
mod petals;
mod puller;
mod runtime;

pub use ollama::OllamaAdapter;
pub use petals::PetalsAdapter;
pub use puller::{CommandPuller, ModelPuller};
pub use runtime::{DistributedRuntime, RawGeneration, SidecarRuntime};

use async_trait::async_trait;
use bridge_common::{BackendKind, InferenceResponse, ModelDescriptor};

/// Uniform capability every inference backend provides to the router.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which backend this adapter talks to.
    fn kind(&self) -> BackendKind;

    /// Whether the backend can take requests right now.
    async fn is_available(&self) -> bool;

    /// Whether this backend can serve `model` at all (e.g. a fixed model list).
    fn supports(&self, _model: &str) -> bool {
        true
    }

    /// Catalog snapshot. Empty on any failure.
    async fn list_models(&self) -> Vec<ModelDescriptor>;

    /// Names of models currently resident in memory, where the backend reports it.
    async fn running_models(&self) -> Vec<String> {
        Vec::new()
    }

    /// Perform exactly one generation call.
    ///
    /// The returned response has `session_id == 0`; the router stamps it.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> InferenceResponse;
}

/// Remove the prompt when a backend echoes it at the start of its output.
pub(crate) fn strip_prompt_echo(output: &str, prompt: &str) -> String {
    if !prompt.is_empty() {
        if let Some(rest) = output.strip_prefix(prompt) {
            return rest.to_string();
        }
    }
    output.to_string()
}

/// Parse a size hint embedded in a model name ("Meta-Llama-3.1-70B-Instruct")
/// into an approximate footprint in GiB and a parameter label.
pub(crate) fn size_from_name(name: &str) -> (f64, &'static str) {
    const SIZES: [(&str, f64); 4] = [("70B", 140.0), ("22B", 44.0), ("8B", 16.0), ("7B", 14.0)];

    SIZES
        .iter()
        .find(|(label, _)| name.contains(label))
        .map(|(label, size)| (*size, *label))
        .unwrap_or((0.0, "unknown"))
}
