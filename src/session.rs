//! Connection setup: opening a transport and authenticating over it.
//!
//! The handshake runs identically over every transport:
//!
//! 1. the server sends a [`ServerHello`] carrying its public key
//! 2. the client checks it against the expected key, if one was configured
//! 3. the client sends a [`Login`] frame
//! 4. the server answers with a [`Response`]; `OK` authenticates the session
//!
//! A [`Connector`] bundles "open a transport" with that handshake, so the
//! [`Client`](crate::Client) can be handed a remote or an in-process backend
//! without knowing which.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::protocol::{decode_frame, decode_response, Login, Response, ServerHello};
use crate::server::LocalServer;
use crate::transport::Transport;

/// Default port of pgnet servers.
pub const DEFAULT_PORT: u16 = 38929;

/// Login parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    /// Username to log in as.
    pub username: String,
    /// Account password, if the server requires one.
    pub password: Option<String>,
    /// Expected server public key. `None` or empty skips verification.
    pub verify_pubkey: Option<String>,
}

impl Credentials {
    /// Credentials with just a username.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Set the account password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Require the server to present this public key.
    #[must_use]
    pub fn with_verify_pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.verify_pubkey = Some(pubkey.into());
        self
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Identity the server attaches to every packet of this session.
    pub username: String,
    /// Public key the server presented during the handshake.
    pub server_pubkey: String,
}

/// Run the client side of the handshake over a freshly opened transport.
///
/// # Errors
///
/// - [`ClientError::Verification`] if the server key does not match
/// - [`ClientError::Auth`] if the server rejects the login
/// - [`ClientError::Protocol`] for malformed handshake frames
/// - [`ClientError::Connect`] if the transport ends mid-handshake
pub async fn handshake<T>(transport: &mut T, credentials: &Credentials) -> Result<Session>
where
    T: Transport + ?Sized,
{
    if credentials.username.is_empty() {
        return Err(ClientError::Auth("a username is required".into()));
    }

    let hello: ServerHello = decode_frame(&next_frame(transport).await?)?;
    if let Some(expected) = credentials.verify_pubkey.as_deref().filter(|k| !k.is_empty()) {
        if expected != hello.pubkey {
            warn!("server public key mismatch");
            return Err(ClientError::Verification {
                expected: expected.to_string(),
                received: hello.pubkey,
            });
        }
        debug!("server public key verified");
    }

    let login = Login {
        username: credentials.username.clone(),
        password: credentials.password.clone(),
    };
    transport.send(serde_json::to_string(&login)?).await?;

    let reply: Response = decode_response(&next_frame(transport).await?)?;
    if !reply.status.is_ok() {
        return Err(ClientError::Auth(reply.message));
    }

    info!(username = %credentials.username, "logged in");
    Ok(Session {
        username: credentials.username.clone(),
        server_pubkey: hello.pubkey,
    })
}

async fn next_frame<T: Transport + ?Sized>(transport: &mut T) -> Result<String> {
    match transport.recv().await {
        Some(frame) => frame,
        None => Err(ClientError::Connect(
            "connection closed during handshake".into(),
        )),
    }
}

/// Opens authenticated sessions for a [`Client`](crate::Client).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport and complete the handshake over it.
    async fn connect(&self) -> Result<(Box<dyn Transport>, Session)>;

    /// Short description of the target for status messages.
    fn describe(&self) -> String;
}

/// Close the transport if the handshake failed, then pass the result through.
async fn finish_handshake(
    mut transport: Box<dyn Transport>,
    credentials: &Credentials,
) -> Result<(Box<dyn Transport>, Session)> {
    match handshake(&mut *transport, credentials).await {
        Ok(session) => Ok((transport, session)),
        Err(e) => {
            let _ = transport.close().await;
            Err(e)
        }
    }
}

// ── Remote ──────────────────────────────────────────────────────────

/// Connects to a pgnet server over WebSocket.
#[cfg(feature = "transport-websocket")]
#[derive(Debug, Clone)]
pub struct RemoteConnector {
    /// Host name or IP address.
    pub address: String,
    /// TCP port, 1 to 65535.
    pub port: u16,
    /// Login parameters.
    pub credentials: Credentials,
}

#[cfg(feature = "transport-websocket")]
impl RemoteConnector {
    /// Create a connector for `address:port`.
    pub fn new(address: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            address: address.into(),
            port,
            credentials,
        }
    }

    /// The WebSocket URL of the server.
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.address, self.port)
    }
}

#[cfg(feature = "transport-websocket")]
#[async_trait]
impl Connector for RemoteConnector {
    async fn connect(&self) -> Result<(Box<dyn Transport>, Session)> {
        if self.address.is_empty() {
            return Err(ClientError::Connect("no server address given".into()));
        }
        if self.port == 0 {
            return Err(ClientError::Connect("port must be between 1 and 65535".into()));
        }
        let transport = crate::transports::WebSocketTransport::connect(&self.url()).await?;
        finish_handshake(Box::new(transport), &self.credentials).await
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// ── Local ───────────────────────────────────────────────────────────

/// Connects to an in-process [`LocalServer`].
#[derive(Debug, Clone)]
pub struct LocalConnector {
    server: LocalServer,
    credentials: Credentials,
}

impl LocalConnector {
    /// Create a connector logging into `server` as `username`.
    pub fn new(server: LocalServer, username: impl Into<String>) -> Self {
        Self {
            server,
            credentials: Credentials::new(username),
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<(Box<dyn Transport>, Session)> {
        let transport = self.server.open_session();
        finish_handshake(Box::new(transport), &self.credentials).await
    }

    fn describe(&self) -> String {
        "local server".into()
    }
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
    use crate::protocol::encode_response;
    use crate::transports::local_pair;

    fn hello(pubkey: &str) -> String {
        serde_json::to_string(&ServerHello {
            pubkey: pubkey.into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_handshake() {
        let (mut transport, mut peer) = local_pair();
        peer.send(hello("KEY")).unwrap();
        peer.send(encode_response(&Response::new("Welcome.")).unwrap())
            .unwrap();

        let credentials = Credentials::new("alice")
            .with_password("hunter2")
            .with_verify_pubkey("KEY");
        let session = handshake(&mut transport, &credentials).await.unwrap();
        assert_eq!(session.username, "alice");
        assert_eq!(session.server_pubkey, "KEY");

        let login: Login = serde_json::from_str(&peer.recv().await.unwrap()).unwrap();
        assert_eq!(login.username, "alice");
        assert_eq!(login.password.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn key_mismatch_never_sends_credentials() {
        let (mut transport, mut peer) = local_pair();
        peer.send(hello("OTHER")).unwrap();

        let credentials = Credentials::new("alice").with_verify_pubkey("KEY");
        let err = handshake(&mut transport, &credentials).await.unwrap_err();
        assert!(matches!(err, ClientError::Verification { .. }));
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn empty_verify_key_skips_verification() {
        let (mut transport, peer) = local_pair();
        peer.send(hello("ANY")).unwrap();
        peer.send(encode_response(&Response::new("ok")).unwrap())
            .unwrap();

        let credentials = Credentials::new("bob").with_verify_pubkey("");
        assert!(handshake(&mut transport, &credentials).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_login_is_auth_error() {
        let (mut transport, peer) = local_pair();
        peer.send(hello("")).unwrap();
        peer.send(encode_response(&Response::unexpected("Wrong password.")).unwrap())
            .unwrap();

        let err = handshake(&mut transport, &Credentials::new("bob"))
            .await
            .unwrap_err();
        match err {
            ClientError::Auth(message) => assert_eq!(message, "Wrong password."),
            other => panic!("expected Auth, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_mid_handshake_is_connect_error() {
        let (mut transport, peer) = local_pair();
        drop(peer);
        let err = handshake(&mut transport, &Credentials::new("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect(_)));
    }

    #[tokio::test]
    async fn garbage_hello_is_protocol_error() {
        let (mut transport, peer) = local_pair();
        peer.send("not json").unwrap();
        let err = handshake(&mut transport, &Credentials::new("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[cfg(feature = "transport-websocket")]
    #[tokio::test]
    async fn remote_connector_rejects_port_zero() {
        let connector = RemoteConnector::new("localhost", 0, Credentials::new("bob"));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, ClientError::Connect(_)));
        assert_eq!(connector.url(), "ws://localhost:0");
    }
}
