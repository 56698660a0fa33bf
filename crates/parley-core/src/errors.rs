//! Error types for the Parley transport
//!
//! Setup failures (`Bind`, `Connect`, `Accept`) are fatal for a run and are
//! returned before any message is exchanged. Everything that happens after
//! the transport went active ends the session instead of the process.

use crate::role::Endpoint;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Errors produced by [`Transport`](crate::Transport) and its roles
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept a peer on {endpoint}: {source}")]
    Accept {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid transport configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Transport has not completed setup")]
    NotConnected,

    #[error("Transport was already started")]
    AlreadyStarted,

    #[error("Transport closed")]
    TransportClosed,

    #[error("Session ended: {0}")]
    SessionEnded(#[source] std::io::Error),
}

impl TransportError {
    /// Whether the error happened while establishing the connection pair
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Bind { .. }
                | TransportError::Connect { .. }
                | TransportError::Accept { .. }
        )
    }
}

/// Result type for transport operations
pub type Result<T> = core::result::Result<T, TransportError>;
