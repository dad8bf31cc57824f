//! Error types for cmld-core.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for cmld operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The rendezvous channel could not be allocated.
    #[error("failed to create service channel: {0}")]
    ChannelCreate(#[source] std::io::Error),

    /// The rendezvous channel could not be bound to its well-known address.
    #[error("failed to bind service channel to {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rendezvous channel could not be put into listening mode or
    /// registered with the reactor.
    #[error("failed to listen on service channel: {0}")]
    Listen(#[source] std::io::Error),

    /// Accepting a pending connection failed.
    #[error("failed to accept service connection: {0}")]
    Accept(#[source] std::io::Error),

    /// The connectivity observer could not be registered with the container.
    #[error("failed to register connectivity observer: {message}")]
    ObserverRegistration { message: String },

    /// A frame from the companion agent could not be decoded.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// The companion agent closed its end of the connection.
    #[error("peer closed the connection")]
    PeerClosed,

    /// No companion agent is connected.
    #[error("companion agent is not connected")]
    NotConnected,

    /// Writing to the connected endpoint failed. The connection is
    /// presumed alive and is left open.
    #[error("send error: {message}")]
    Send { message: String },

    /// Invalid state transition.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A container operation failed.
    #[error("container error: {message}")]
    Container { message: String },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Returns true if this error happened while bringing the service
    /// channel up. These abort container start when propagated.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Error::ChannelCreate(_)
                | Error::Bind { .. }
                | Error::Listen(_)
                | Error::ObserverRegistration { .. }
        )
    }

    /// Returns true if this error tears the connected endpoint down.
    ///
    /// Send failures are deliberately not included: a failed write leaves
    /// the connection open.
    pub fn is_teardown(&self) -> bool {
        matches!(self, Error::Decode { .. } | Error::PeerClosed)
    }
}

/// Convenience result type for cmld operations.
pub type Result<T> = std::result::Result<T, Error>;
