use crate::coordination::CoordError;

/// Errors raised by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No eligible element, or the queue directory itself is absent. An
    /// expected outcome; `peek`/`poll` turn it into `None`.
    #[error("no eligible element in {0}")]
    NotFound(String),

    /// A child name or payload that does not decode as a queue item.
    #[error("protocol violation at {name}: {reason}")]
    ProtocolViolation { name: String, reason: String },

    /// A required directory could not be created at construction.
    #[error("cannot create directory {path}: {source}")]
    Configuration {
        path: String,
        #[source]
        source: CoordError,
    },

    #[error(transparent)]
    Coordination(#[from] CoordError),
}

impl QueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Coordination(e) if e.is_transient())
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
