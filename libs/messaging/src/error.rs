/// Failures raised by a concrete messaging backend.
///
/// These are surfaced to the immediate caller. Nothing in this crate retries
/// inside the transport layer: the processor and the checker tasks log them
/// and carry on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Publish failed: {error} (kind: {kind}, context: {context})")]
    PublishFailed {
        error: String,
        kind: &'static str,
        context: String,
    },

    #[error("Subscribe failed: {error} (context: {context})")]
    SubscribeFailed { error: String, context: String },

    #[error("Close failed: {0}")]
    CloseFailed(String),

    #[error("Backend closed")]
    Closed,

    #[error("Other error: {0}")]
    Other(String),
}

impl TransportError {
    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed(_) | TransportError::ConnectionLost(_)
        )
    }

    /// Create a connection failed error
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        TransportError::ConnectionFailed(msg.into())
    }

    /// Create a publish failed error for the given message kind and target
    pub fn publish_failed(
        msg: impl Into<String>,
        kind: &'static str,
        context: impl ToString,
    ) -> Self {
        TransportError::PublishFailed {
            error: msg.into(),
            kind,
            context: context.to_string(),
        }
    }

    /// Create a subscribe failed error
    pub fn subscribe_failed(msg: impl Into<String>, context: impl ToString) -> Self {
        TransportError::SubscribeFailed {
            error: msg.into(),
            context: context.to_string(),
        }
    }

    /// Create a close failed error
    pub fn close_failed(msg: impl Into<String>) -> Self {
        TransportError::CloseFailed(msg.into())
    }
}

/// Errors of the reconfigurable layer sitting above the backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessagingError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No messaging backend registered under type '{0}'")]
    UnknownBackend(String),

    #[error("Configuration rejected by messaging backend '{0}'")]
    InvalidConfiguration(String),

    #[error("Messaging configuration does not name a backend type")]
    MissingBackendType,

    #[error("Message handler failed: {0}")]
    Handler(String),
}

impl MessagingError {
    /// Create a handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        MessagingError::Handler(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(TransportError::connection_failed("refused").is_connection_error());
        assert!(TransportError::ConnectionLost("reset".into()).is_connection_error());
        assert!(!TransportError::Closed.is_connection_error());
        assert!(!TransportError::close_failed("socket").is_connection_error());
    }

    #[test]
    fn test_error_formatting() {
        let err = TransportError::publish_failed("broker down", "heartbeat", "dm/app");
        assert_eq!(
            err.to_string(),
            "Publish failed: broker down (kind: heartbeat, context: dm/app)"
        );

        let wrapped: MessagingError = err.into();
        assert!(wrapped.to_string().starts_with("Publish failed"));

        let unknown = MessagingError::UnknownBackend("amqp".into());
        assert!(unknown.to_string().contains("'amqp'"));
    }
}
