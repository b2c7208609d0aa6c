//! Inference Bridge - session-oriented socket server in front of Ollama and Petals.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the configured address (default 0.0.0.0:8765)
//! inference-bridge
//!
//! # Print the system report and exit
//! inference-bridge --check
//!
//! # Pull every recommended model, or one model
//! inference-bridge --pull-recommended
//! inference-bridge --pull llama3.2:3b
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bridge_common::PullOutcome;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use inference_bridge::{AppState, Config, ConnectionServer};

/// Inference Bridge - routes inference requests to Ollama or a Petals network
#[derive(Parser, Debug)]
#[command(name = "inference-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "BRIDGE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Model used when neither a request nor its session names one
    #[arg(long, value_name = "MODEL")]
    default_model: Option<String>,

    /// Print the system report as JSON and exit
    #[arg(long, conflicts_with_all = ["pull_recommended", "pull"])]
    check: bool,

    /// Pull all recommended models and exit
    #[arg(long, conflicts_with = "pull")]
    pull_recommended: bool,

    /// Pull one model and exit
    #[arg(long, value_name = "MODEL")]
    pull: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref model) = self.default_model {
            config.models.default = model.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = Config::load_from(args.config.as_deref())
        .map_err(|e| format!("Failed to load configuration: {}", e))?;
    args.apply(&mut config);
    tracing::info!(
        "Starting inference-bridge {} (default model {})",
        env!("CARGO_PKG_VERSION"),
        config.models.default
    );

    let state = Arc::new(AppState::from_config(config).await);

    if args.check {
        let report = state.router.system_check().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(ExitCode::SUCCESS);
    }

    if args.pull_recommended {
        let report = state.router.pull_recommended().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(exit_code(!report.has_failures()));
    }

    if let Some(model) = args.pull {
        let success = state.router.pull_model(&model).await;
        println!("{}", serde_json::to_string_pretty(&PullOutcome { success, model })?);
        return Ok(exit_code(success));
    }

    let server = ConnectionServer::bind(state)
        .await
        .map_err(|e| format!("Failed to bind listener: {}", e))?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received interrupt, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to listen for interrupt"),
        }
    });

    server.serve().await?;

    Ok(ExitCode::SUCCESS)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
