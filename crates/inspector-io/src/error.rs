//! Error types for the inspector I/O bridge.

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating the bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport server failed to bind or listen on the configured
    /// host and port. The I/O thread has already torn itself down when
    /// this is returned; the bridge is in its terminal error state.
    #[error("failed to start inspector transport on {host}:{port}: {source}")]
    TransportBind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// `start()` was called on a bridge that already spawned its I/O thread.
    #[error("inspector bridge already started")]
    AlreadyStarted,

    /// I/O error outside the transport bind path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this is a transport bind/listen failure.
    pub fn is_transport_bind(&self) -> bool {
        matches!(self, Error::TransportBind { .. })
    }
}
