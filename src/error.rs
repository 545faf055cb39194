use thiserror::Error;

/// Taxonomy of failures raised by the index-and-query core. Variant names
/// track the kinds in the error-handling design, not the originating
/// Vespa/HTTP vocabulary.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid field name: {0}")]
    InvalidFieldName(String),

    #[error("invalid data type: {0}")]
    InvalidDataType(String),

    #[error("invalid data range: {0}")]
    InvalidDataRange(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation conflict: {0}")]
    OperationConflict(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("backend returned non-2xx status {status}: {message}")]
    BackendStatus { status: u16, message: String },

    #[error("invalid application package: {0}")]
    InvalidApplication(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether a caller should retry this error against the backend.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Transient(_) => true,
            CoreError::BackendStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
