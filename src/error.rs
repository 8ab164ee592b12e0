// 🚨 Error taxonomy for the feature pipeline and the prediction service
//
// Pipeline-construction errors (Configuration, DataIntegrity) abort a load.
// Request-time errors (Validation, Inference, Unavailable) stay request-scoped.

use thiserror::Error;

/// Who caused a failure: the caller, or the service itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Server,
}

impl ErrorClass {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorClass::Client => "client",
            ErrorClass::Server => "server",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown registry key, bad parameters, unreadable config
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing columns, zero-row joins, duplicate ids, null indicator rows
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Bad or unknown ids, non-finite features, unfitted schema
    #[error("validation error: {0}")]
    Validation(String),

    /// Failure inside a model's prediction call
    #[error("inference error: {0}")]
    Inference(String),

    /// A serving dependency failed to load at startup
    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    pub fn data_integrity(msg: impl Into<String>) -> Self {
        PipelineError::DataIntegrity(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        PipelineError::Inference(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Validation(_) => ErrorClass::Client,
            _ => ErrorClass::Server,
        }
    }

    /// True for errors that must stop a pipeline run (and block readiness)
    pub fn is_fatal_for_load(&self) -> bool {
        matches!(
            self,
            PipelineError::Configuration(_) | PipelineError::DataIntegrity(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_client_caused() {
        let err = PipelineError::validation("no matching IDs");
        assert_eq!(err.class(), ErrorClass::Client);
        assert_eq!(err.to_string(), "validation error: no matching IDs");
    }

    #[test]
    fn test_inference_and_unavailable_are_server_caused() {
        assert_eq!(PipelineError::inference("shape").class(), ErrorClass::Server);
        assert_eq!(
            PipelineError::Unavailable("model".to_string()).class(),
            ErrorClass::Server
        );
    }

    #[test]
    fn test_fatal_for_load() {
        assert!(PipelineError::configuration("unknown model 'x'").is_fatal_for_load());
        assert!(PipelineError::data_integrity("zero rows").is_fatal_for_load());
        assert!(!PipelineError::validation("nan").is_fatal_for_load());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let err: PipelineError = io.into();
        assert!(err.to_string().contains("missing.csv"));
        assert_eq!(err.class().as_str(), "server");
    }
}
