//! Error types for the hostlink bridge
//!
//! Failures are split by who is at fault: the caller (usage), the host
//! (remote), or the path between them (transport). Nothing in the bridge
//! retries on its own, since host-side operations may not be idempotent.

use std::fmt;
use std::io;
use thiserror::Error;

use super::callback::OperationId;
use super::handle::CallbackToken;

/// Top-level bridge error
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The caller used the bridge incorrectly
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    /// The host rejected or failed the operation
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The host could not be reached or answered with garbage
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Whether this failure was reported by the host itself
    pub fn is_remote(&self) -> bool {
        matches!(self, BridgeError::Remote(_))
    }

    /// Whether this failure is a programmer error on the local side
    pub fn is_usage(&self) -> bool {
        matches!(self, BridgeError::Usage(_))
    }
}

/// Programmer errors, raised before anything reaches the host
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// An operation on a pending receiver needs a step to be evaluated
    #[error("operation '{operation}' needs a step: its receiver is not resolved")]
    MissingStep {
        /// Operation suffix that was requested
        operation: String,
    },

    /// A chain grew past the configured limit
    #[error("chain of {links} links exceeds the configured maximum of {max}")]
    ChainTooLong {
        /// Links the chain would have had
        links: usize,
        /// Configured maximum
        max: usize,
    },

    /// Two round trips tried to use one lineage at the same time
    #[error("step lineage {lineage} is already talking to the host")]
    StepConflict {
        /// Lineage that was busy
        lineage: String,
    },

    /// Callback placeholders in a template do not match the slots supplied
    #[error("template has {found} callback placeholders but {expected} slots were supplied")]
    PlaceholderMismatch {
        /// Number of slots supplied
        expected: usize,
        /// Number of placeholders found in the template
        found: usize,
    },

    /// No command is registered under this name
    #[error("no window command registered as '{0}'")]
    UnknownCommand(String),

    /// The proxy refers to a handle released from the session arena
    #[error("handle '{0}' was released")]
    ReleasedHandle(String),
}

/// Failure reported by the host through an `error` envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    /// Message produced by the host
    pub message: String,
}

impl RemoteError {
    /// Create a remote error from a host message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failures reaching the host or understanding its reply
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error on the underlying channel
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialisation error on the wire
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The reply was not a valid result envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope kind does not fit what the caller asked for
    #[error("expected a {expected} result, host returned '{found}'")]
    UnexpectedKind {
        /// Shape the caller declared
        expected: &'static str,
        /// Envelope kind received
        found: &'static str,
    },

    /// The reply did not belong to the request just sent
    #[error("response id mismatch (expected {expected}, got {got})")]
    ResponseMismatch {
        /// Request id sent
        expected: u64,
        /// Response id received
        got: u64,
    },

    /// The host closed the connection
    #[error("connection closed by host")]
    Closed,

    /// The transport layer of the host reported an error outside any envelope
    #[error("host transport error: {0}")]
    Host(String),
}

/// Callback operation whose endpoints never saw their closing call
///
/// Not an error: the bridge reports it so an outer policy can decide what to
/// do with endpoints that were reclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackLeak {
    /// Operation that was still pending
    pub operation: OperationId,
    /// Tokens whose endpoints were still open
    pub tokens: Vec<CallbackToken>,
    /// Seconds the operation had been pending
    pub age_secs: i64,
}

impl fmt::Display for CallbackLeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "callback operation {} leaked {} endpoint(s) after {}s",
            self.operation,
            self.tokens.len(),
            self.age_secs
        )
    }
}

/// Result type using BridgeError
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Convenience result alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;
