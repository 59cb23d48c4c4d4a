use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Incompatible value {value}: {cause}")]
    Validation { value: String, cause: String },

    #[error("Schema definition error: {0}")]
    SchemaDefinition(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid key state: {0}")]
    KeyState(String),

    #[error("Malformed wire payload: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a validation error for `value` with the underlying cause.
    pub fn validation(value: impl std::fmt::Debug, cause: impl std::fmt::Display) -> Self {
        Error::Validation {
            value: format!("{:?}", value),
            cause: cause.to_string(),
        }
    }

    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::SchemaDefinition(_) => "SCHEMA_DEFINITION_ERROR",
            Error::UnknownField(_) => "UNKNOWN_FIELD",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::KeyState(_) => "KEY_STATE",
            Error::Decode(_) => "DECODE_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }

    /// Local marshalling errors are never worth retrying.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Prefix the message with the operation that produced the error.
    pub fn with_context(self, context: &str) -> Error {
        match self {
            Error::Validation { value, cause } => Error::Validation {
                value,
                cause: format!("{}: {}", context, cause),
            },
            Error::Decode(msg) => Error::Decode(format!("{}: {}", context, msg)),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
