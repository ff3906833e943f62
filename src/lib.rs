//! # pgnet client
//!
//! Async client for pgnet-style game servers, with hash-based state
//! synchronization.
//!
//! A [`Client`] opens a session through a [`Connector`] (a remote WebSocket
//! server or an in-process [`LocalServer`]), sends requests strictly in order
//! with at most one on the wire, and keeps a cached [`GameState`] of the
//! joined game fresh through periodic `check_update` heartbeats that only
//! transfer state when the server's fingerprint changed.
//!
//! ## Features
//!
//! - **Ordered requests**: FIFO dispatch with front-of-queue priority and
//!   flushing, replies delivered as [`PendingResponse`] futures
//! - **Cheap state sync**: matching fingerprints are a no-op, changes replace
//!   the cache wholesale and emit [`ClientEvent::StateChanged`]
//! - **Transport-agnostic**: implement [`Transport`] for any text frame channel
//! - **WebSocket built-in**: default `transport-websocket` feature provides
//!   `WebSocketTransport` and `RemoteConnector`
//! - **Offline play**: [`LocalServer`] hosts games such as
//!   [`TicTacToe`](games::TicTacToe) in-process
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pgnet_client::games::TicTacToe;
//! use pgnet_client::{Client, ClientConfig, ClientEvent, LocalConnector, LocalServer};
//!
//! # async fn example() {
//! let server = LocalServer::new(TicTacToe::factory());
//! let (client, mut events) = Client::new(LocalConnector::new(server, "alice"), ClientConfig::new());
//! let client = Arc::new(client);
//!
//! let runner = Arc::clone(&client);
//! tokio::spawn(async move { runner.async_connect().await });
//!
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Connection(true) = event {
//!         let reply = client.create_game("room1", None).await;
//!         println!("{reply:?}");
//!         client.close().await;
//!     }
//! }
//! # }
//! ```

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod games;
pub mod heartbeat;
pub mod protocol;
pub mod server;
pub mod session;
pub mod settings;
pub mod state;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{Client, ClientConfig, ConnectionState, PendingResponse};
pub use error::{ClientError, Result};
pub use event::ClientEvent;
pub use protocol::{GameDirectory, MetaCommand, Packet, Response, Status};
pub use server::{Game, GameFactory, LocalServer};
#[cfg(feature = "transport-websocket")]
pub use session::RemoteConnector;
pub use session::{Connector, Credentials, LocalConnector, Session};
pub use settings::ConnectionSettings;
pub use state::GameState;
pub use transport::Transport;
pub use transports::{local_pair, LocalPeer, LocalTransport};
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
