//! Error types for consumer construction and for the failures reported through events.

use std::time::Duration;

/// Boxed error type used for handler and client failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Raised while building a [`Consumer`](crate::Consumer). These are the only errors that are
/// ever returned to the caller; everything that happens after `start()` is reported as an event.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing option `subscription`")]
    MissingSubscription,

    #[error("option `batch_size` must be between 1 and 10, got {batch_size}")]
    BatchSizeOutOfRange { batch_size: u8 },

    #[error("missing option `handler`")]
    MissingHandler,

    #[error("missing option `client`")]
    MissingClient,

    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Classification of a [`ConsumerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Pull,
    HandlerTimeout,
    HandlerFailure,
    Acknowledge,
}

/// A failure that happened while the consumer was running.
///
/// None of these ever escape the poll loop. Each variant maps to exactly one event:
///
/// | variant          | event                                          |
/// |------------------|------------------------------------------------|
/// | `Pull`           | [`ConsumerEvent::PullingError`]                |
/// | `HandlerTimeout` | [`ConsumerEvent::TimeoutError`]                |
/// | `HandlerFailure` | [`ConsumerEvent::ProcessingError`]             |
/// | `Acknowledge`    | [`ConsumerEvent::DeletingError`]               |
///
/// [`ConsumerEvent::PullingError`]: crate::ConsumerEvent::PullingError
/// [`ConsumerEvent::TimeoutError`]: crate::ConsumerEvent::TimeoutError
/// [`ConsumerEvent::ProcessingError`]: crate::ConsumerEvent::ProcessingError
/// [`ConsumerEvent::DeletingError`]: crate::ConsumerEvent::DeletingError
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("failed to pull messages: {0}")]
    Pull(#[source] BoxError),

    #[error("message handler timed out after {}ms: operation timed out", .timeout.as_millis())]
    HandlerTimeout { timeout: Duration },

    #[error("unexpected message handler failure: {0}")]
    HandlerFailure(#[source] BoxError),

    #[error("failed to acknowledge message: {0}")]
    Acknowledge(#[source] BoxError),
}

impl ConsumerError {
    /// Which stage of the cycle produced the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsumerError::Pull(_) => ErrorKind::Pull,
            ConsumerError::HandlerTimeout { .. } => ErrorKind::HandlerTimeout,
            ConsumerError::HandlerFailure(_) => ErrorKind::HandlerFailure,
            ConsumerError::Acknowledge(_) => ErrorKind::Acknowledge,
        }
    }

    /// Whether the handler ran past its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConsumerError::HandlerTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_name_the_option() {
        assert_eq!(
            ConfigError::MissingSubscription.to_string(),
            "missing option `subscription`"
        );
        assert_eq!(
            ConfigError::BatchSizeOutOfRange { batch_size: 11 }.to_string(),
            "option `batch_size` must be between 1 and 10, got 11"
        );
    }

    #[test]
    fn handler_errors_carry_prefixes() {
        let timeout = ConsumerError::HandlerTimeout {
            timeout: Duration::from_millis(500),
        };
        assert_eq!(
            timeout.to_string(),
            "message handler timed out after 500ms: operation timed out"
        );
        assert_eq!(timeout.kind(), ErrorKind::HandlerTimeout);
        assert!(timeout.is_timeout());

        let failure = ConsumerError::HandlerFailure("boom".into());
        assert_eq!(failure.to_string(), "unexpected message handler failure: boom");
        assert_eq!(failure.kind(), ErrorKind::HandlerFailure);
        assert!(!failure.is_timeout());
    }
}
