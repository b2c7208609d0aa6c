//! Inference Bridge - routes session-oriented socket requests to a local Ollama
//! server or a Petals distributed network.

pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use router::InferenceRouter;
pub use server::ConnectionServer;
pub use session::SessionRegistry;
pub use state::AppState;
