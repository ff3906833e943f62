//! Transport abstraction for the pgnet protocol.
//!
//! The [`Transport`] trait defines a bidirectional text frame channel between
//! the client and a server. Every frame is one complete JSON document, so each
//! implementation handles its own framing (WebSocket messages, in-process
//! channel items, ...).
//!
//! # Connection Setup
//!
//! Establishing a transport is not part of this trait. Remote and local
//! transports need very different parameters, so that concern lives in
//! [`Connector`](crate::session::Connector) implementations, which open a
//! transport and then run the application handshake over it.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use pgnet_client::error::ClientError;
//! use pgnet_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, frame: String) -> Result<(), ClientError> {
//!         // Write one JSON frame
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ClientError>> {
//!         // Read the next JSON frame, `None` once the peer is gone
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ClientError> {
//!         unimplemented!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ClientError;

/// A bidirectional text frame transport.
///
/// Each call to [`send`](Transport::send) transmits one complete frame and
/// each call to [`recv`](Transport::recv) returns one complete frame.
///
/// # Object Safety
///
/// This trait is object-safe. Connectors hand out `Box<dyn Transport>` so the
/// client's connection loop never depends on the concrete backend.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the connection
/// loop polls it inside `tokio::select!`. Cancelling a pending `recv` must not
/// lose a frame. Channel-based implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one frame to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TransportSend`] if the frame could not be sent,
    /// or [`ClientError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, frame: String) -> Result<(), ClientError>;

    /// Receive the next frame from the peer.
    ///
    /// Returns:
    /// - `Some(Ok(text))` when a complete frame was received
    /// - `Some(Err(e))` on a transport error
    /// - `None` once the connection was closed cleanly
    async fn recv(&mut self) -> Option<Result<String, ClientError>>;

    /// Close the connection.
    ///
    /// Must be idempotent: closing an already closed transport returns `Ok`.
    /// Implementations release their resources even if a graceful close
    /// handshake fails.
    async fn close(&mut self) -> Result<(), ClientError>;
}
