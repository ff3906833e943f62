use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{GameFactory, Lobby};
use crate::protocol::{
    decode_frame, decode_packet, encode_response, Login, Response, ServerHello,
};
use crate::transports::{local_pair, LocalPeer, LocalTransport};

/// A lobby hosted inside the client process.
///
/// Cloning yields another handle to the same lobby, so several local clients
/// (hot-seat play, tests) can share one server.
#[derive(Clone)]
pub struct LocalServer {
    lobby: Arc<Mutex<Lobby>>,
}

impl std::fmt::Debug for LocalServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalServer").finish_non_exhaustive()
    }
}

impl LocalServer {
    /// Create a server hosting games built by `factory`.
    pub fn new(factory: GameFactory) -> Self {
        Self {
            lobby: Arc::new(Mutex::new(Lobby::new(factory))),
        }
    }

    /// Open a new session and return the client half of its transport.
    ///
    /// The server half runs on a spawned task until the client disconnects.
    pub fn open_session(&self) -> LocalTransport {
        let (transport, peer) = local_pair();
        tokio::spawn(serve_session(Arc::clone(&self.lobby), peer));
        transport
    }

    /// Shared access to the lobby.
    pub fn lobby(&self) -> &Arc<Mutex<Lobby>> {
        &self.lobby
    }
}

fn send_response(peer: &LocalPeer, response: &Response) -> bool {
    match encode_response(response) {
        Ok(frame) => peer.send(frame).is_ok(),
        Err(e) => {
            warn!("failed to encode response: {e}");
            false
        }
    }
}

async fn serve_session(lobby: Arc<Mutex<Lobby>>, mut peer: LocalPeer) {
    let hello = ServerHello {
        pubkey: String::new(),
    };
    let Ok(frame) = serde_json::to_string(&hello) else {
        return;
    };
    if peer.send(frame).is_err() {
        return;
    }

    let Some(frame) = peer.recv().await else {
        return;
    };
    let username = match decode_frame::<Login>(&frame) {
        Ok(login) => login.username,
        Err(e) => {
            let _ = send_response(&peer, &Response::bad(e.to_string()));
            return;
        }
    };
    let reply = lobby.lock().await.login(&username);
    let accepted = reply.status.is_ok();
    if !send_response(&peer, &reply) || !accepted {
        return;
    }
    debug!(username = %username, "local session started");

    while let Some(frame) = peer.recv().await {
        let response = match decode_packet(&frame) {
            Ok(packet) => {
                let packet = packet.from_user(username.as_str());
                lobby.lock().await.handle_packet(&packet)
            }
            Err(e) => {
                warn!(username = %username, "malformed packet: {e}");
                Response::bad("Malformed packet.")
            }
        };
        if !send_response(&peer, &response) {
            break;
        }
    }

    lobby.lock().await.logout(&username);
    debug!(username = %username, "local session ended");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::games::ChatRoom;
    use crate::protocol::{decode_response, encode_packet, MetaCommand, Packet, Status};
    use crate::session::{handshake, Credentials};
    use crate::transport::Transport;

    async fn request(transport: &mut LocalTransport, packet: &Packet) -> Response {
        transport.send(encode_packet(packet).unwrap()).await.unwrap();
        decode_response(&transport.recv().await.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn session_serves_lobby_requests() {
        let server = LocalServer::new(ChatRoom::factory());
        let mut transport = server.open_session();
        handshake(&mut transport, &Credentials::new("alice"))
            .await
            .unwrap();

        let created = request(
            &mut transport,
            &MetaCommand::CreateGame.packet().with_field("name", "lounge"),
        )
        .await;
        assert!(created.status.is_ok());
        assert_eq!(server.lobby().lock().await.game_of("alice"), Some("lounge"));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let server = LocalServer::new(ChatRoom::factory());
        let mut first = server.open_session();
        handshake(&mut first, &Credentials::new("alice")).await.unwrap();

        let mut second = server.open_session();
        let err = handshake(&mut second, &Credentials::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ClientError::Auth(_)));
    }

    #[tokio::test]
    async fn malformed_packet_gets_bad_status() {
        let server = LocalServer::new(ChatRoom::factory());
        let mut transport = server.open_session();
        handshake(&mut transport, &Credentials::new("alice"))
            .await
            .unwrap();

        transport.send("{".into()).await.unwrap();
        let reply = decode_response(&transport.recv().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply.status, Status::Bad);
    }

    #[tokio::test]
    async fn closing_transport_logs_out() {
        let server = LocalServer::new(ChatRoom::factory());
        let mut transport = server.open_session();
        handshake(&mut transport, &Credentials::new("alice"))
            .await
            .unwrap();
        transport.close().await.unwrap();

        // The session task notices the closed channel and logs the user out.
        let mut again = server.open_session();
        let mut attempts = 0;
        loop {
            match handshake(&mut again, &Credentials::new("alice")).await {
                Ok(_) => break,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    again = server.open_session();
                }
                Err(e) => panic!("user was never logged out: {e}"),
            }
        }
    }
}
