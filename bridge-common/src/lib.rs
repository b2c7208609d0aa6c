//! Inference Bridge Common Types
//!
//! Shared types used by the bridge server and its socket clients.

pub mod inference;
pub mod model;
pub mod protocol;

pub use inference::{tokens_per_second, InferenceRequest, InferenceResponse};
pub use model::{base_model_name, is_namespaced, BackendKind, ModelDescriptor};
pub use protocol::{
    Ack, ClientRequest, DistributedStatus, ErrorReply, LocalStatus, ModelList, PullOutcome,
    PullReport, PullStatus, RequestError, SessionCreated, ShutdownAck, SystemReport,
};
