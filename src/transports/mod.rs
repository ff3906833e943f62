//! Transport implementations.
//!
//! | Module       | Transport              | Feature               |
//! |--------------|------------------------|-----------------------|
//! | `local`      | [`LocalTransport`]     | always                |
//! | `websocket`  | `WebSocketTransport`   | `transport-websocket` |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), pgnet_client::ClientError> {
//! use pgnet_client::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:38929").await?;
//! if let Some(Ok(hello)) = ws.recv().await {
//!     println!("server hello: {hello}");
//! }
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod local;

#[cfg(feature = "transport-websocket")]
pub mod websocket;

pub use local::{local_pair, LocalPeer, LocalTransport};

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
