//! Error types for the pgnet client.

use thiserror::Error;

/// Errors that can occur when using the pgnet client.
///
/// Application-level failures (a [`Response`](crate::protocol::Response) with
/// an `UNEXPECTED` or `BAD` status) are not errors: they are delivered to the
/// caller of the original request like any other response.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not be established (refused, unresolvable, invalid port).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server rejected the credentials during the handshake.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server's public key did not match the expected one.
    #[error("server verification failed: expected public key {expected:?}, got {received:?}")]
    Verification {
        /// Public key the client was configured to accept.
        expected: String,
        /// Public key the server presented.
        received: String,
    },

    /// A malformed frame was received.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection.
    #[error("not connected to server")]
    NotConnected,

    /// A connection attempt is already running on this client.
    #[error("client is already connected or connecting")]
    AlreadyConnected,

    /// The connection attempt was cancelled by [`Client::close`](crate::Client::close).
    #[error("connection attempt cancelled")]
    Cancelled,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for pgnet client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
