/// Error types for the entity service client
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] kindstore_core::Error),

    #[error("Transaction {id} failed: conflict detected")]
    TransactionFailed { id: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unexpected response from {endpoint} (status {status}): {body}")]
    Protocol {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Entity is locked: {0}")]
    Locked(String),
}

impl ClientError {
    pub(crate) fn protocol(endpoint: &str, status: u16, body: impl ToString) -> Self {
        ClientError::Protocol {
            endpoint: endpoint.to_string(),
            status,
            body: body.to_string(),
        }
    }

    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Core(e) => e.code(),
            ClientError::TransactionFailed { .. } => "TRANSACTION_FAILED",
            ClientError::Connection(_) => "CONNECTION_ERROR",
            ClientError::Protocol { .. } => "PROTOCOL_ERROR",
            ClientError::Transport(_) => "TRANSPORT_ERROR",
            ClientError::Auth(_) => "AUTH_ERROR",
            ClientError::Locked(_) => "LOCKED",
        }
    }

    /// Only optimistic-concurrency conflicts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::TransactionFailed { .. })
    }

    /// Id of the failed transaction, for linking the next attempt
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            ClientError::TransactionFailed { id } => Some(id),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Core(kindstore_core::Error::Json(err))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_retry() {
        let failed = ClientError::TransactionFailed { id: "tx-1".into() };
        assert!(failed.is_retryable());
        assert_eq!(failed.transaction_id(), Some("tx-1"));
        assert_eq!(failed.code(), "TRANSACTION_FAILED");

        let protocol = ClientError::protocol("commit", 500, "boom");
        assert!(!protocol.is_retryable());
        assert!(protocol.transaction_id().is_none());
        assert!(protocol.to_string().contains("commit"));
        assert!(protocol.to_string().contains("500"));
    }

    #[test]
    fn test_core_errors_keep_their_code() {
        let err: ClientError = kindstore_core::Error::InvalidArgument("x".into()).into();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert!(!err.is_retryable());
    }
}
