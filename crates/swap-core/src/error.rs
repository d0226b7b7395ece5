//! Error handling for vramswap
//!
//! Provides a unified error type and result type for use across all vramswap
//! components. The first five variants form the orchestration taxonomy: four
//! recoverable per-candidate failures and the terminal `AllCandidatesExhausted`.

use std::time::Duration;

/// Result type alias for vramswap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for vramswap
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No device memory for the model even after eviction attempts
    #[error("Admission failure for {model} on {device}: requested {requested_mb} MB, {available_mb} MB available")]
    Admission {
        model: String,
        device: String,
        requested_mb: u64,
        available_mb: u64,
    },

    /// The adapter failed to materialize a model
    #[error("Load error for {model}: {message}")]
    Load { model: String, message: String },

    /// The backend rejected or crashed on a specific input
    #[error("Generation error from {model}: {message}")]
    Generation {
        model: String,
        message: String,
        oom: bool,
    },

    /// Generation exceeded the configured deadline
    #[error("Generation on {model} timed out after {}ms", .after.as_millis())]
    Timeout { model: String, after: Duration },

    /// Every candidate failed; surfaced to the caller
    #[error("All candidates exhausted (tried: {})", .tried.join(", "))]
    AllCandidatesExhausted { tried: Vec<String> },

    /// The orchestrator is shutting down and accepts no new work
    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Device memory probe errors
    #[error("Memory probe error: {0}")]
    Probe(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a probe error
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a load error for a model
    pub fn load(model: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Load {
            model: model.into(),
            message: msg.into(),
        }
    }

    /// Create a generation error for a model
    pub fn generation(model: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Generation {
            model: model.into(),
            message: msg.into(),
            oom: false,
        }
    }

    /// Create a generation error carrying the out-of-memory marker
    pub fn out_of_memory(model: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Generation {
            model: model.into(),
            message: msg.into(),
            oom: true,
        }
    }

    /// Create a timeout error
    pub fn timeout(model: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            model: model.into(),
            after,
        }
    }

    /// Check if the fallback controller may move on to the next candidate
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Admission { .. }
                | Error::Load { .. }
                | Error::Generation { .. }
                | Error::Timeout { .. }
        )
    }

    /// Check if the backend signalled it ran out of device memory
    pub fn is_oom(&self) -> bool {
        matches!(self, Error::Generation { oom: true, .. })
    }

    /// Name of the model the error is attributed to, if any
    pub fn model(&self) -> Option<&str> {
        match self {
            Error::Admission { model, .. }
            | Error::Load { model, .. }
            | Error::Generation { model, .. }
            | Error::Timeout { model, .. } => Some(model),
            _ => None,
        }
    }

    /// Check if this error indicates a client-side problem
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfiguration(_) | Error::InvalidRequest(_) | Error::NotFound(_)
        )
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Admission { .. } => "admission",
            Error::Load { .. } => "load",
            Error::Generation { oom: true, .. } => "out_of_memory",
            Error::Generation { .. } => "generation",
            Error::Timeout { .. } => "timeout",
            Error::AllCandidatesExhausted { .. } => "exhausted",
            Error::ShuttingDown => "shutting_down",
            Error::InvalidConfiguration(_) => "configuration",
            Error::NotFound(_) => "not_found",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Probe(_) => "probe",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }

    /// Convert to HTTP status code for the request layer
    pub fn to_http_status(&self) -> u16 {
        match self {
            Error::InvalidConfiguration(_) | Error::InvalidRequest(_) => 400,
            Error::NotFound(_) => 404,
            Error::Timeout { .. } => 504,
            Error::AllCandidatesExhausted { .. } | Error::ShuttingDown => 503,
            Error::Admission { .. } => 503,
            Error::Load { .. } | Error::Generation { .. } => 502,
            _ => 500,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ErrorContext<T> {
    /// Add context to an error
    fn with_context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let original = e.into();
            Error::Other(anyhow::anyhow!("{}: {}", context.into(), original))
        })
    }

    fn with_context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let original = e.into();
            Error::Other(anyhow::anyhow!("{}: {}", f(), original))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_is_recoverable() {
        assert!(Error::load("m", "boom").is_recoverable());
        assert!(Error::generation("m", "bad input").is_recoverable());
        assert!(Error::timeout("m", Duration::from_secs(1)).is_recoverable());
        let admission = Error::Admission {
            model: "m".into(),
            device: "gpu:0".into(),
            requested_mb: 100,
            available_mb: 10,
        };
        assert!(admission.is_recoverable());

        let exhausted = Error::AllCandidatesExhausted {
            tried: vec!["a".into(), "b".into()],
        };
        assert!(!exhausted.is_recoverable());
        assert_eq!(exhausted.to_string(), "All candidates exhausted (tried: a, b)");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::config("test").category(), "configuration");
        assert_eq!(Error::load("m", "x").category(), "load");
        assert_eq!(Error::out_of_memory("m", "x").category(), "out_of_memory");
        assert_eq!(Error::timeout("m", Duration::ZERO).category(), "timeout");
    }

    #[test]
    fn test_oom_marker() {
        assert!(Error::out_of_memory("m", "CUDA out of memory").is_oom());
        assert!(!Error::generation("m", "bad").is_oom());
        assert_eq!(Error::out_of_memory("m", "x").model(), Some("m"));
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(Error::invalid_request("test").to_http_status(), 400);
        assert_eq!(Error::not_found("test").to_http_status(), 404);
        assert_eq!(
            Error::AllCandidatesExhausted { tried: vec![] }.to_http_status(),
            503
        );
        assert_eq!(Error::internal("test").to_http_status(), 500);
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.with_context("failed to read config file").unwrap_err();

        assert!(matches!(err, Error::Other(_)));
        assert!(err.to_string().contains("failed to read config file"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_context_fn() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "original error"));

        let err = result
            .with_context_fn(|| format!("loading model {}", "llama-8b"))
            .unwrap_err();

        assert!(err.to_string().contains("loading model llama-8b"));
        assert!(err.to_string().contains("original error"));
    }
}
