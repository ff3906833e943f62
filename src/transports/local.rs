//! In-process transport used by local/offline play.
//!
//! [`local_pair`] creates two connected halves: a [`LocalTransport`] handed to
//! the client, and a [`LocalPeer`] driven by whatever plays the server (usually
//! [`LocalServer`](crate::server::LocalServer), or a test). Frames are the same
//! JSON text the remote transport carries, so the client's sequencing logic
//! runs unchanged.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::transport::Transport;

/// Client half of an in-process connection.
#[derive(Debug)]
pub struct LocalTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half of an in-process connection.
#[derive(Debug)]
pub struct LocalPeer {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Create a connected `(client, server)` pair.
pub fn local_pair() -> (LocalTransport, LocalPeer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LocalTransport {
            tx: Some(client_tx),
            rx: client_rx,
        },
        LocalPeer {
            tx: server_tx,
            rx: server_rx,
        },
    )
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&mut self, frame: String) -> Result<(), ClientError> {
        let tx = self.tx.as_ref().ok_or(ClientError::TransportClosed)?;
        tx.send(frame)
            .map_err(|_| ClientError::TransportSend("local peer is gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, ClientError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        // Dropping the sender lets the peer observe the disconnect.
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

impl LocalPeer {
    /// Send a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TransportClosed`] once the client half is gone.
    pub fn send(&self, frame: impl Into<String>) -> Result<(), ClientError> {
        self.tx
            .send(frame.into())
            .map_err(|_| ClientError::TransportClosed)
    }

    /// Receive the next frame from the client, `None` once it closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receive a frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (mut transport, mut peer) = local_pair();
        transport.send("hello".into()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        peer.send("world").unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_visible_to_peer() {
        let (mut transport, mut peer) = local_pair();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert!(peer.recv().await.is_none());
        assert!(matches!(
            transport.send("late".into()).await,
            Err(ClientError::TransportClosed)
        ));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_peer_ends_stream() {
        let (mut transport, peer) = local_pair();
        drop(peer);
        assert!(transport.recv().await.is_none());
        assert!(matches!(
            transport.send("x".into()).await,
            Err(ClientError::TransportSend(_))
        ));
    }
}
