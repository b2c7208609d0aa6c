//! Fetching models into the local backend.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::PullConfig;
use crate::error::{Error, Result};

/// Something that can download a model by name into the local backend.
#[async_trait]
pub trait ModelPuller: Send + Sync {
    async fn pull(&self, model: &str) -> Result<()>;
}

/// Pulls models by running `<program> pull <model>`.
///
/// Success is a zero exit status within the timeout. Progress output goes to
/// the bridge's own stdout/stderr. A timed-out child is killed.
pub struct CommandPuller {
    program: String,
    timeout: Duration,
}

impl CommandPuller {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PullConfig) -> Self {
        Self::new(config.program.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl ModelPuller for CommandPuller {
    async fn pull(&self, model: &str) -> Result<()> {
        tracing::info!("Pulling model {} with `{} pull`", model, self.program);

        let mut child = Command::new(&self.program)
            .arg("pull")
            .arg(model)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::PullFailed(format!("failed to start {}: {}", self.program, e)))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(Error::PullFailed(format!(
                    "{}: timed out after {:?}",
                    model, self.timeout
                )));
            }
        };

        if status.success() {
            tracing::info!("Pulled model {}", model);
            return Ok(());
        }

        Err(Error::PullFailed(format!(
            "{}: {} exited with {}",
            model, self.program, status
        )))
    }
}
