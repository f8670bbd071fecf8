use thiserror::Error;

use crate::protocol::AdapterError;

/// Errors surfaced to callers of the arbitration engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError {
    /// Unknown service identifier.
    #[error("service not found: {0}")]
    NotFound(String),

    /// Activation was requested for a service that failed its last poll.
    #[error("service is offline: {0}")]
    ServiceOffline(String),

    /// The lock/unlock call the caller asked for did not go through.
    #[error("lock call to {service} failed: {source}")]
    LockCallFailed {
        service: String,
        #[source]
        source: AdapterError,
    },

    /// A sweep finished, but some services refused or were unreachable.
    #[error("failed to lock {failed} service(s); last error: {last}")]
    PartialFailure { failed: usize, last: String },
}
