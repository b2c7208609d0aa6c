//! Inference request and response records.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::BackendKind;

/// Default `max_tokens` when a request omits it.
pub const DEFAULT_MAX_TOKENS: u32 = 256;
/// Default sampling temperature when a request omits it.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Upper bound accepted for `temperature`.
pub const MAX_TEMPERATURE: f32 = 2.0;

/// A single prompt-to-text request.
///
/// `session_id == 0` means the request is not bound to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-request model override. Never changes a session's sticky model.
    #[serde(default, rename = "model", skip_serializing_if = "Option::is_none")]
    pub explicit_model: Option<String>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            session_id: 0,
            prompt: prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            explicit_model: None,
        }
    }

    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.explicit_model = Some(model.into());
        self
    }

    /// Check generation parameters. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }
        if !self.temperature.is_finite()
            || self.temperature < 0.0
            || self.temperature > MAX_TEMPERATURE
        {
            return Err(format!(
                "temperature must be between 0 and {}, got {}",
                MAX_TEMPERATURE, self.temperature
            ));
        }
        Ok(())
    }
}

/// Unified response shape for every backend.
///
/// Either `text` is non-empty and `error` is `None`, or `error` is set and
/// `text` is empty with zero token counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub session_id: u64,
    pub text: String,
    pub tokens_generated: u32,
    pub tokens_per_second: f64,
    pub model_used: String,
    pub backend: BackendKind,
    #[serde(default)]
    pub error: Option<String>,
}

impl InferenceResponse {
    /// Successful generation. An empty completion is turned into a failure.
    pub fn success(
        model: &str,
        backend: BackendKind,
        text: String,
        tokens_generated: u32,
        elapsed: Duration,
    ) -> Self {
        if text.is_empty() {
            return Self::failure(
                model,
                backend,
                format!("{} returned an empty completion", backend),
            );
        }
        Self {
            session_id: 0,
            text,
            tokens_generated,
            tokens_per_second: tokens_per_second(tokens_generated, elapsed),
            model_used: model.to_string(),
            backend,
            error: None,
        }
    }

    /// Failed generation with zeroed counters.
    pub fn failure(model: &str, backend: BackendKind, error: impl Into<String>) -> Self {
        Self {
            session_id: 0,
            text: String::new(),
            tokens_generated: 0,
            tokens_per_second: 0.0,
            model_used: model.to_string(),
            backend,
            error: Some(error.into()),
        }
    }

    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Generation throughput. Zero when no measurable time elapsed.
pub fn tokens_per_second(tokens: u32, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        tokens as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: InferenceRequest = serde_json::from_str(r#"{"prompt": "Hello"}"#).unwrap();
        assert_eq!(req.session_id, 0);
        assert_eq!(req.max_tokens, 256);
        assert_eq!(req.temperature, 0.7);
        assert!(req.explicit_model.is_none());
    }

    #[test]
    fn test_request_model_field_maps_to_explicit_model() {
        let req: InferenceRequest =
            serde_json::from_str(r#"{"prompt": "Hi", "model": "qwen2.5:14b", "session_id": 3}"#)
                .unwrap();
        assert_eq!(req.explicit_model.as_deref(), Some("qwen2.5:14b"));
        assert_eq!(req.session_id, 3);
    }

    #[test]
    fn test_validate_rejects_zero_max_tokens() {
        let mut req = InferenceRequest::new("Hi");
        req.max_tokens = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_temperature_range() {
        let mut req = InferenceRequest::new("Hi");
        req.temperature = 0.0;
        assert!(req.validate().is_ok());
        req.temperature = 2.0;
        assert!(req.validate().is_ok());
        req.temperature = -0.1;
        assert!(req.validate().is_err());
        req.temperature = f32::NAN;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_tokens_per_second_zero_elapsed() {
        assert_eq!(tokens_per_second(42, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_tokens_per_second() {
        assert_eq!(tokens_per_second(100, Duration::from_secs(4)), 25.0);
    }

    #[test]
    fn test_success_with_empty_text_becomes_failure() {
        let resp =
            InferenceResponse::success("llama3.2", BackendKind::Local, String::new(), 5, Duration::from_secs(1));
        assert!(!resp.is_success());
        assert!(resp.text.is_empty());
        assert_eq!(resp.tokens_generated, 0);
        assert_eq!(resp.error.as_deref(), Some("local returned an empty completion"));
    }

    #[test]
    fn test_failure_zeroes_counters() {
        let resp = InferenceResponse::failure("m", BackendKind::Distributed, "boom");
        assert_eq!(resp.tokens_generated, 0);
        assert_eq!(resp.tokens_per_second, 0.0);
        assert!(resp.text.is_empty());
    }

    #[test]
    fn test_error_serialized_as_null_on_success() {
        let resp = InferenceResponse::success(
            "llama3.2",
            BackendKind::Local,
            "Hi there".to_string(),
            2,
            Duration::from_secs(1),
        )
        .with_session(7);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"], serde_json::Value::Null);
        assert_eq!(json["session_id"], 7);
        assert_eq!(json["backend"], "local");
    }
}
