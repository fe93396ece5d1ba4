use thiserror::Error;

/// Failure of a single fetch-and-render cycle.
///
/// Every variant aborts the current cycle only; whatever was published by an
/// earlier cycle stays in place.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Missing placeholder value, malformed URL or unusable setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, timeout, bad status or non-JSON response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body is not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// A present raw value does not fit the declared field type.
    #[error("type coercion error: field '{field}' from '{source_key}' expected {expected}, got '{value}'")]
    TypeCoercion {
        field: String,
        source_key: String,
        value: String,
        expected: &'static str,
    },

    /// Field definitions or table template could not be loaded.
    #[error("template error: {0}")]
    Template(String),
}

impl CycleError {
    /// Stable name used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Configuration(_) => "configuration",
            CycleError::Transport(_) => "transport",
            CycleError::Parse(_) => "parse",
            CycleError::TypeCoercion { .. } => "type_coercion",
            CycleError::Template(_) => "template",
        }
    }
}

impl From<reqwest::Error> for CycleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CycleError::Transport(format!("timeout: {}", err))
        } else {
            CycleError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CycleError {
    fn from(err: serde_json::Error) -> Self {
        CycleError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for CycleError {
    fn from(err: url::ParseError) -> Self {
        CycleError::Configuration(format!("invalid url: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, CycleError>;
