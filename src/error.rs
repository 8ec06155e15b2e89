//! Error types for the services link core.
//!
//! Fatal link errors (bad password, ancient peer, unparseable line) and
//! caller errors from outbound operations share one enum so the lifecycle
//! owner can decide what tears the connection down.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Top-level protocol errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// I/O error during reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The uplink's `SERVER` password did not match our `recvpass`.
    #[error("authentication failure: {0}")]
    AuthFailure(String),

    /// The peer advertised a protocol version below the minimum we speak.
    #[error("remote protocol version {got} is too old (need at least {min})")]
    ProtocolTooOld {
        /// Version the peer advertised.
        got: u32,
        /// Minimum version this crate speaks.
        min: u32,
    },

    /// A line that could not be tokenized at all.
    #[error("malformed line: {0:?}")]
    InvalidLine(String),

    /// An outbound operation named a source that is not one of our own
    /// pseudo-clients or pseudo-servers.
    #[error("{0} is not an internal client or server")]
    NotInternal(String),

    /// A UID or SID that does not exist in the network state.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// The SID or UID counter rolled over its leftmost column.
    #[error("identifier space exhausted after {0}")]
    IdentifierExhausted(String),

    /// Validator failure or duplicate identifier.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation the dialect has no use for.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl ProtocolError {
    /// Whether this error must tear the link down.
    ///
    /// Handler-level inconsistencies (unknown UIDs, short argument lists)
    /// are logged and the line skipped; only these variants propagate to
    /// the lifecycle owner.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::AuthFailure(_)
                | ProtocolError::ProtocolTooOld { .. }
                | ProtocolError::InvalidLine(_)
                | ProtocolError::Io(_)
        )
    }
}
