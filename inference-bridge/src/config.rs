//! Configuration for the inference bridge.

use std::path::Path;

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// Main configuration structure for the bridge.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    /// Local HTTP backend (Ollama).
    #[serde(default)]
    pub local: LocalBackendConfig,
    /// Distributed backend (Petals sidecar).
    #[serde(default)]
    pub distributed: DistributedBackendConfig,
    #[serde(default)]
    pub pull: PullConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Longest accepted message line, in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Whether clients may stop the server with the `shutdown` action.
    #[serde(default)]
    pub allow_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_message_bytes: default_max_message_bytes(),
            allow_shutdown: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A model suggested for a given use case.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecommendedModel {
    pub use_case: String,
    pub model: String,
}

impl RecommendedModel {
    fn new(use_case: &str, model: &str) -> Self {
        Self {
            use_case: use_case.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Model used when neither the request nor its session names one.
    #[serde(default = "default_model")]
    pub default: String,
    /// Models suggested by the system check, in report order.
    #[serde(default = "default_recommended")]
    pub recommended: Vec<RecommendedModel>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            recommended: default_recommended(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalBackendConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Liveness probe timeout.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Timeout for tag and running-model listing.
    #[serde(default = "default_catalog_timeout")]
    pub catalog_timeout_secs: u64,
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,
    /// Timeout for `POST /api/pull`.
    #[serde(default = "default_api_pull_timeout")]
    pub pull_timeout_secs: u64,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_ollama_url(),
            probe_timeout_secs: default_probe_timeout(),
            catalog_timeout_secs: default_catalog_timeout(),
            generate_timeout_secs: default_generate_timeout(),
            pull_timeout_secs: default_api_pull_timeout(),
        }
    }
}

/// Petals sidecar configuration.
///
/// The sidecar is probed once at startup. If it is unreachable the
/// distributed backend stays unavailable until the bridge restarts.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributedBackendConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sidecar_addr")]
    pub sidecar_addr: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_sidecar_generate_timeout")]
    pub generate_timeout_secs: u64,
    /// Models the distributed network can serve.
    #[serde(default = "default_supported_models")]
    pub supported_models: Vec<String>,
}

impl Default for DistributedBackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sidecar_addr: default_sidecar_addr(),
            connect_timeout_secs: default_connect_timeout(),
            generate_timeout_secs: default_sidecar_generate_timeout(),
            supported_models: default_supported_models(),
        }
    }
}

/// How models are fetched into the local backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PullMethod {
    /// `POST /api/pull` on the local backend.
    Api,
    /// Run an external command (`ollama pull <model>`).
    #[default]
    Command,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullConfig {
    #[serde(default)]
    pub method: PullMethod,
    /// Program invoked as `<program> pull <model>`.
    #[serde(default = "default_pull_program")]
    pub program: String,
    /// Timeout for the pull command.
    #[serde(default = "default_command_pull_timeout")]
    pub timeout_secs: u64,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            method: PullMethod::default(),
            program: default_pull_program(),
            timeout_secs: default_command_pull_timeout(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_max_message_bytes() -> usize {
    1024 * 1024
}
fn default_model() -> String {
    "llama3.2:latest".to_string()
}
fn default_recommended() -> Vec<RecommendedModel> {
    vec![
        RecommendedModel::new("fast", "llama3.2:3b"),
        RecommendedModel::new("balanced", "llama3.2:latest"),
        RecommendedModel::new("quality", "llama3.1:8b"),
        RecommendedModel::new("code", "qwen2.5-coder:7b"),
        RecommendedModel::new("reasoning", "qwen2.5:14b"),
        RecommendedModel::new("large", "llama3.1:70b"),
    ]
}
fn default_true() -> bool {
    true
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_probe_timeout() -> u64 {
    2
}
fn default_catalog_timeout() -> u64 {
    5
}
fn default_generate_timeout() -> u64 {
    120
}
fn default_api_pull_timeout() -> u64 {
    600
}
fn default_sidecar_addr() -> String {
    "127.0.0.1:8766".to_string()
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_sidecar_generate_timeout() -> u64 {
    300
}
fn default_supported_models() -> Vec<String> {
    vec![
        "meta-llama/Meta-Llama-3.1-70B-Instruct".to_string(),
        "meta-llama/Meta-Llama-3.1-8B-Instruct".to_string(),
        "mistralai/Mixtral-8x22B-Instruct-v0.1".to_string(),
        "mistralai/Mistral-7B-Instruct-v0.3".to_string(),
    ]
}
fn default_pull_program() -> String {
    "ollama".to_string()
}
fn default_command_pull_timeout() -> u64 {
    1800
}

impl Config {
    /// Load configuration, reading `path` instead of `config.toml` when given.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (BRIDGE__SECTION__KEY format)
    /// 2. The config file (required if `path` is given, optional otherwise)
    /// 3. Built-in defaults
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("config").required(false),
        };

        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("models.default", default_model())?
            .add_source(file)
            .add_source(
                Environment::with_prefix("BRIDGE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("distributed.supported_models")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
