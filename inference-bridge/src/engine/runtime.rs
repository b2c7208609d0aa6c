//! Distributed inference runtime.
//!
//! The Petals client library only exists for Python, so the bridge reaches it
//! through a sidecar process that owns the tokenizers and distributed models.
//! The sidecar speaks newline-delimited JSON over TCP, one request per
//! connection:
//!
//! ```text
//! {"type":"status"}                                  -> {"ready":true,"petals_available":true}
//! {"type":"load","model":"..."}                      -> {"loaded":true,"error":null}
//! {"type":"generate","model":"...","prompt":"...",
//!  "max_tokens":256,"temperature":0.7}               -> {"text":"...","tokens":42,"error":null}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::config::DistributedBackendConfig;
use crate::error::{Error, Result};

/// Decoded output of one distributed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGeneration {
    /// Decoded text. May start with the prompt.
    pub text: String,
    /// Number of generated tokens.
    pub tokens: u32,
}

/// Tokenizer + causal-LM capability of a distributed inference network.
#[async_trait]
pub trait DistributedRuntime: Send + Sync {
    /// Load the tokenizer and distributed model for `model`.
    async fn load(&self, model: &str) -> Result<()>;

    /// Generate from an already loaded model.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<RawGeneration>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SidecarRequest<'a> {
    Status,
    Load {
        model: &'a str,
    },
    Generate {
        model: &'a str,
        prompt: &'a str,
        max_tokens: u32,
        temperature: f32,
    },
}

#[derive(Debug, Deserialize)]
struct SidecarStatus {
    #[serde(default)]
    petals_available: bool,
}

#[derive(Debug, Deserialize)]
struct SidecarLoad {
    #[serde(default)]
    loaded: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SidecarGeneration {
    #[serde(default)]
    text: String,
    #[serde(default)]
    tokens: u32,
    #[serde(default)]
    error: Option<String>,
}

/// [`DistributedRuntime`] backed by a Petals sidecar process.
#[derive(Debug, Clone)]
pub struct SidecarRuntime {
    addr: String,
    connect_timeout: Duration,
    generate_timeout: Duration,
}

impl SidecarRuntime {
    /// Probe the sidecar once and return a runtime if Petals is usable.
    pub async fn connect(config: &DistributedBackendConfig) -> Result<Self> {
        let runtime = Self {
            addr: config.sidecar_addr.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            generate_timeout: Duration::from_secs(config.generate_timeout_secs),
        };

        let status: SidecarStatus = runtime
            .call(&SidecarRequest::Status, runtime.connect_timeout)
            .await?;
        if !status.petals_available {
            return Err(Error::BackendUnavailable(format!(
                "Petals sidecar at {} reports Petals is not installed",
                runtime.addr
            )));
        }

        Ok(runtime)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: &SidecarRequest<'_>,
        timeout: Duration,
    ) -> Result<T> {
        let exchange = async {
            let stream = TcpStream::connect(&self.addr).await?;
            let mut framed = Framed::new(stream, LinesCodec::new());

            framed
                .send(serde_json::to_string(request)?)
                .await
                .map_err(|e| Error::Communication(e.to_string()))?;

            let line = framed
                .next()
                .await
                .ok_or_else(|| {
                    Error::Communication("sidecar closed the connection without replying".to_string())
                })?
                .map_err(|e| Error::Communication(e.to_string()))?;

            Ok::<T, Error>(serde_json::from_str(&line)?)
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| {
                Error::Communication(format!(
                    "sidecar at {} did not reply within {:?}",
                    self.addr, timeout
                ))
            })?
    }
}

#[async_trait]
impl DistributedRuntime for SidecarRuntime {
    async fn load(&self, model: &str) -> Result<()> {
        let reply: SidecarLoad = self
            .call(&SidecarRequest::Load { model }, self.generate_timeout)
            .await
            .map_err(|e| Error::LoadFailed(format!("{}: {}", model, e)))?;

        match (reply.loaded, reply.error) {
            (true, _) => Ok(()),
            (false, Some(error)) => Err(Error::LoadFailed(format!("{}: {}", model, error))),
            (false, None) => Err(Error::LoadFailed(model.to_string())),
        }
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<RawGeneration> {
        let request = SidecarRequest::Generate {
            model,
            prompt,
            max_tokens,
            temperature,
        };
        let reply: SidecarGeneration = self.call(&request, self.generate_timeout).await?;

        if let Some(error) = reply.error {
            return Err(Error::InferenceFailed(error));
        }

        Ok(RawGeneration {
            text: reply.text,
            tokens: reply.tokens,
        })
    }
}
