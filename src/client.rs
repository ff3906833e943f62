//! Async client façade for pgnet servers.
//!
//! [`Client`] is a handle shared by the presentation layer. Requests are
//! forwarded over an unbounded MPSC channel to a connection loop that runs
//! inside [`Client::async_connect`] and exclusively owns the transport, the
//! [`Dispatcher`] and the [`HeartbeatEngine`]. Each request yields a
//! [`PendingResponse`] future; events are emitted on the bounded channel
//! returned from [`Client::new`].
//!
//! # Example
//!
//! ```rust,ignore
//! let server = LocalServer::new(TicTacToe::factory());
//! let (client, mut events) = Client::new(LocalConnector::new(server, "alice"), ClientConfig::new());
//! let client = Arc::new(client);
//!
//! let runner = Arc::clone(&client);
//! tokio::spawn(async move { runner.async_connect().await });
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::Connection(true) => { client.create_game("room1", None); }
//!         ClientEvent::StateChanged(state) => { /* redraw */ }
//!         ClientEvent::Connection(false) => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, Resolution};
use crate::error::{ClientError, Result};
use crate::event::ClientEvent;
use crate::heartbeat::{HeartbeatEngine, SyncOutcome};
use crate::protocol::{decode_response, encode_packet, MetaCommand, Packet, Response};
use crate::session::Connector;
use crate::state::GameState;
use crate::transport::Transport;

/// Default period of the heartbeat ticker.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Default limit for opening a transport and completing the handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// `tokio::time::interval` rejects a zero period.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

// ── Configuration ───────────────────────────────────────────────────

/// Tuning knobs for a [`Client`].
///
/// # Example
///
/// ```
/// use pgnet_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new()
///     .with_heartbeat_interval(Duration::from_millis(250))
///     .with_event_channel_capacity(64);
/// assert_eq!(config.connect_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often the heartbeat asks the server for state changes while a game
    /// is joined.
    ///
    /// Defaults to **500 ms**.
    pub heartbeat_interval: Duration,
    /// Limit for opening the transport and completing the handshake.
    ///
    /// Defaults to **5 seconds**.
    pub connect_timeout: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// Status events are dropped (with a warning) when the consumer falls
    /// behind. Connection, game and state events wait for room instead, which
    /// stalls the connection loop until the consumer catches up.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`Client::close`] waits for the connection loop to wind down.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the heartbeat period. Values below 1 ms are clamped to 1 ms.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle of a [`Client`] connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection. The initial state.
    Disconnected,
    /// Opening the transport and running the handshake.
    Connecting,
    /// Authenticated; requests are being served.
    Connected,
    /// [`Client::close`] was called and the connection is winding down.
    Closing,
}

// ── PendingResponse ─────────────────────────────────────────────────

/// The eventual reply to one request.
///
/// Resolves to `Some(response)` once the server answers, or to `None` when
/// the request will never be answered: the queue was flushed or the
/// connection ended first. Dropping it does not cancel the request.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    fn new(rx: oneshot::Receiver<Response>) -> Self {
        Self { rx }
    }

    /// A reply that is already available.
    pub fn ready(response: Response) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(response);
        Self { rx }
    }

    /// Take the reply if it has already arrived.
    pub fn try_recv(&mut self) -> Option<Response> {
        self.rx.try_recv().ok()
    }
}

impl Future for PendingResponse {
    type Output = Option<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| result.ok())
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Messages from the handle (and the heartbeat ticker) to the connection loop.
enum Command {
    Send {
        packet: Packet,
        reply: oneshot::Sender<Response>,
        do_next: bool,
        sync_after: bool,
    },
    CheckUpdate,
    Heartbeat,
    Flush,
}

/// Who receives the response to a dispatched packet.
#[derive(Debug)]
enum Reply {
    Caller(oneshot::Sender<Response>),
    Sync,
}

// ── Shared state ────────────────────────────────────────────────────

struct ClientState {
    connection: watch::Sender<ConnectionState>,
    username: Mutex<Option<String>>,
    game: Mutex<Option<String>>,
    game_state: Mutex<GameState>,
}

impl ClientState {
    fn new() -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connection,
            username: Mutex::new(None),
            game: Mutex::new(None),
            game_state: Mutex::new(GameState::default()),
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Client handle ───────────────────────────────────────────────────

/// Client for a pgnet server.
///
/// The handle is `Send + Sync`; wrap it in an [`Arc`] to drive
/// [`async_connect`](Self::async_connect) on one task while issuing requests
/// from others.
pub struct Client {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    event_tx: mpsc::Sender<ClientEvent>,
    state: ClientState,
    /// Command channel of the live connection, `None` while not connected.
    commands: StdMutex<Option<mpsc::UnboundedSender<Command>>>,
    shutdown_tx: StdMutex<Option<oneshot::Sender<()>>>,
    /// Bumped by every connection attempt. A run whose generation is no
    /// longer current was abandoned by a timed-out [`close`](Self::close) and
    /// must leave the shared state to its successor.
    generation: AtomicU64,
}

impl Client {
    /// Create a disconnected client and the receiver for its events.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn new(
        connector: impl Connector,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let client = Self {
            connector: Arc::new(connector),
            config,
            event_tx,
            state: ClientState::new(),
            commands: StdMutex::new(None),
            shutdown_tx: StdMutex::new(None),
            generation: AtomicU64::new(0),
        };
        (client, event_rx)
    }

    // ── Connection lifecycle ────────────────────────────────────────

    /// Connect, then serve the connection until it ends.
    ///
    /// The heartbeat ticker runs for exactly as long as this future: it is
    /// started once the handshake succeeds and stopped when the future
    /// returns or is dropped. Requests still pending when the connection ends
    /// resolve to `None`.
    ///
    /// Returns `Ok(())` once an established connection has ended, whether by
    /// [`close`](Self::close), by the server, or by an I/O or protocol error.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AlreadyConnected`] if a connection is already running
    /// - [`ClientError::Timeout`] if connecting exceeds the connect timeout
    /// - [`ClientError::Cancelled`] if [`close`](Self::close) interrupted the attempt
    /// - any handshake error of the [`Connector`]
    pub async fn async_connect(&self) -> Result<()> {
        let (mut shutdown_rx, generation) = self.begin_connecting()?;
        let mut guard = ConnectionGuard {
            client: self,
            generation,
            heartbeat: None,
        };

        let attempt = tokio::select! {
            result = tokio::time::timeout(self.config.connect_timeout, self.connector.connect()) => {
                match result {
                    Ok(connected) => connected,
                    Err(_) => Err(ClientError::Timeout),
                }
            }
            _ = &mut shutdown_rx => Err(ClientError::Cancelled),
        };
        let (mut transport, session) = match attempt {
            Ok(connected) => connected,
            Err(e) => {
                warn!(server = %self.connector.describe(), "failed to connect: {e}");
                if self.is_current(generation) {
                    self.transition(
                        ConnectionState::Disconnected,
                        format!("Failed to connect: {e}"),
                    );
                }
                return Err(e);
            }
        };

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let connected = {
            let _shutdown_tx = lock(&self.shutdown_tx);
            let current = self.is_current(generation);
            if current {
                *lock(&self.commands) = Some(cmd_tx.clone());
            }
            current
                && self.state.connection.send_if_modified(|state| {
                    let advance = *state == ConnectionState::Connecting;
                    if advance {
                        *state = ConnectionState::Connected;
                    }
                    advance
                })
        };
        if !self.is_current(generation) {
            if let Err(e) = transport.close().await {
                debug!("error closing transport: {e}");
            }
            return Err(ClientError::Cancelled);
        }

        *self.state.username.lock().await = Some(session.username.clone());
        *self.state.game.lock().await = None;
        *self.state.game_state.lock().await = GameState::default();
        guard.heartbeat = Some(spawn_heartbeat(cmd_tx, self.config.heartbeat_interval));

        if connected {
            info!(username = %session.username, server = %self.connector.describe(), "connected");
            self.emit_status(format!(
                "Connected to {} as {}.",
                self.connector.describe(),
                session.username
            ));
            self.emit(ClientEvent::Connection(true)).await;
        }

        let mut connection = Connection::new(self, generation);
        let reason = connection
            .run(&mut *transport, &mut cmd_rx, &mut shutdown_rx)
            .await;

        // Stop accepting requests, then drop everything still queued so the
        // callers see "no answer".
        self.release_commands(generation);
        if let Some(task) = guard.heartbeat.take() {
            task.abort();
        }
        drop(cmd_rx);
        drop(connection);

        if let Err(e) = transport.close().await {
            debug!("error closing transport: {e}");
        }
        if !self.is_current(generation) {
            // A timed-out close already reported the end of this connection.
            info!(reason = %reason, "abandoned connection wound down");
            return Ok(());
        }
        if self.state.game.lock().await.take().is_some() {
            self.emit(ClientEvent::Game(None)).await;
        }
        *self.state.game_state.lock().await = GameState::default();

        info!(reason = %reason, "disconnected");
        self.transition(ConnectionState::Disconnected, reason);
        self.emit(ClientEvent::Connection(false)).await;
        Ok(())
    }

    /// Close the connection or abort a connection attempt.
    ///
    /// Waits up to the configured shutdown timeout for
    /// [`async_connect`](Self::async_connect) to wind down. Past the timeout
    /// the running connection is abandoned: the client reports itself
    /// disconnected right away and the old run finishes without touching the
    /// client again, so a new connection may start immediately.
    ///
    /// Idempotent: calling it while disconnected or already closing does
    /// nothing.
    pub async fn close(&self) {
        let shutdown = {
            let mut shutdown_tx = lock(&self.shutdown_tx);
            let closing = self.state.connection.send_if_modified(|state| {
                let close = matches!(
                    state,
                    ConnectionState::Connecting | ConnectionState::Connected
                );
                if close {
                    *state = ConnectionState::Closing;
                }
                close
            });
            if !closing {
                return;
            }
            shutdown_tx.take()
        };

        debug!("close requested");
        self.emit_status("Closing connection.");
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }

        let mut watcher = self.state.connection.subscribe();
        let stopped = watcher.wait_for(|state| *state == ConnectionState::Disconnected);
        if tokio::time::timeout(self.config.shutdown_timeout, stopped)
            .await
            .is_err()
        {
            warn!("connection did not close within timeout; marking disconnected");
            {
                let _shutdown_tx = lock(&self.shutdown_tx);
                self.generation.fetch_add(1, Ordering::SeqCst);
                lock(&self.commands).take();
            }
            if let Ok(mut game) = self.state.game.try_lock() {
                *game = None;
            }
            self.transition(ConnectionState::Disconnected, "Connection closed.");
            self.try_emit(ClientEvent::Connection(false));
        }
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Queue a packet behind every pending request.
    ///
    /// While not connected the reply is an immediate `UNEXPECTED`
    /// "Not connected." response.
    pub fn send(&self, packet: Packet) -> PendingResponse {
        self.submit(packet, false, false)
    }

    /// Queue a packet ahead of every request not yet on the wire.
    pub fn send_next(&self, packet: Packet) -> PendingResponse {
        self.submit(packet, true, false)
    }

    /// Queue a packet followed by a state check, so the cache reflects the
    /// packet's effect as soon as possible.
    pub fn send_and_sync(&self, packet: Packet) -> PendingResponse {
        self.submit(packet, false, true)
    }

    /// Create a game and join it.
    pub fn create_game(&self, name: &str, password: Option<&str>) -> PendingResponse {
        self.send(
            MetaCommand::CreateGame
                .packet()
                .with_field("name", name)
                .with_field("password", password),
        )
    }

    /// Join an existing game.
    pub fn join_game(&self, name: &str, password: Option<&str>) -> PendingResponse {
        self.send(
            MetaCommand::JoinGame
                .packet()
                .with_field("name", name)
                .with_field("password", password),
        )
    }

    /// Leave the current game.
    pub fn leave_game(&self) -> PendingResponse {
        self.send(MetaCommand::LeaveGame.packet())
    }

    /// Request the directory of joinable games. Decode the reply with
    /// [`GameDirectory::from_response`](crate::protocol::GameDirectory::from_response).
    pub fn get_game_dir(&self) -> PendingResponse {
        self.send(MetaCommand::GetGameDir.packet())
    }

    /// Check for state changes ahead of every queued request.
    ///
    /// Ignored while no game is joined.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] while not connected.
    pub fn check_update(&self) -> Result<()> {
        self.command(Command::CheckUpdate)
    }

    /// Drop every pending request without answering it. Their
    /// [`PendingResponse`]s resolve to `None`, and a late reply to a request
    /// that was already on the wire is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] while not connected.
    pub fn flush_queue(&self) -> Result<()> {
        self.command(Command::Flush)
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.connection.borrow()
    }

    /// Watch connection state transitions.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.connection.subscribe()
    }

    /// Returns `true` while authenticated and serving requests.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Username of the current or most recent session.
    pub async fn username(&self) -> Option<String> {
        self.state.username.lock().await.clone()
    }

    /// Name of the joined game.
    pub async fn game(&self) -> Option<String> {
        self.state.game.lock().await.clone()
    }

    /// Latest snapshot of the joined game.
    pub async fn game_state(&self) -> GameState {
        self.state.game_state.lock().await.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn begin_connecting(&self) -> Result<(oneshot::Receiver<()>, u64)> {
        let mut shutdown_tx = lock(&self.shutdown_tx);
        let started = self.state.connection.send_if_modified(|state| {
            let start = *state == ConnectionState::Disconnected;
            if start {
                *state = ConnectionState::Connecting;
            }
            start
        });
        if !started {
            return Err(ClientError::AlreadyConnected);
        }
        let (tx, rx) = oneshot::channel();
        *shutdown_tx = Some(tx);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(shutdown_tx);

        debug!(server = %self.connector.describe(), generation, "connecting");
        self.emit_status(format!("Connecting to {}...", self.connector.describe()));
        Ok((rx, generation))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Stop accepting requests for the connection of `generation`, unless a
    /// newer connection owns the channel by now.
    fn release_commands(&self, generation: u64) {
        let _shutdown_tx = lock(&self.shutdown_tx);
        if self.is_current(generation) {
            lock(&self.commands).take();
        }
    }

    fn submit(&self, packet: Packet, do_next: bool, sync_after: bool) -> PendingResponse {
        let (reply, rx) = oneshot::channel();
        let command = Command::Send {
            packet,
            reply,
            do_next,
            sync_after,
        };
        match self.command(command) {
            Ok(()) => PendingResponse::new(rx),
            Err(_) => PendingResponse::ready(Response::unexpected("Not connected.")),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        let commands = lock(&self.commands);
        let Some(tx) = commands.as_ref() else {
            debug!("request while not connected");
            return Err(ClientError::NotConnected);
        };
        tx.send(command).map_err(|_| ClientError::NotConnected)
    }

    fn transition(&self, state: ConnectionState, status: impl Into<String>) {
        let previous = self.state.connection.send_replace(state);
        if previous != state {
            self.emit_status(status);
        }
    }

    /// Emit a status event. Dropped with a warning if the channel is full.
    fn emit_status(&self, status: impl Into<String>) {
        self.try_emit(ClientEvent::Status(status.into()));
    }

    fn try_emit(&self, event: ClientEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// Emit an event that must not be lost, waiting for channel capacity.
    async fn emit(&self, event: ClientEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("target", &self.connector.describe())
            .field("connection", &self.connection_state())
            .field("config", &self.config)
            .finish()
    }
}

/// Resets the handle when [`Client::async_connect`] returns or is dropped.
struct ConnectionGuard<'a> {
    client: &'a Client,
    generation: u64,
    heartbeat: Option<JoinHandle<()>>,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        let mut shutdown_tx = lock(&self.client.shutdown_tx);
        if !self.client.is_current(self.generation) {
            return;
        }
        shutdown_tx.take();
        drop(shutdown_tx);
        lock(&self.client.commands).take();
        if let Ok(mut game) = self.client.state.game.try_lock() {
            *game = None;
        }
        self.client.state.connection.send_if_modified(|state| {
            let reset = *state != ConnectionState::Disconnected;
            if reset {
                *state = ConnectionState::Disconnected;
            }
            reset
        });
    }
}

fn spawn_heartbeat(tx: mpsc::UnboundedSender<Command>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(MIN_HEARTBEAT_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(Command::Heartbeat).is_err() {
                break;
            }
        }
    })
}

// ── Connection loop ─────────────────────────────────────────────────

/// State owned by the loop of one established connection.
struct Connection<'a> {
    client: &'a Client,
    generation: u64,
    dispatcher: Dispatcher<Reply>,
    engine: HeartbeatEngine,
    in_game: bool,
}

impl<'a> Connection<'a> {
    fn new(client: &'a Client, generation: u64) -> Self {
        Self {
            client,
            generation,
            dispatcher: Dispatcher::new(),
            engine: HeartbeatEngine::new(),
            in_game: false,
        }
    }

    /// Serve requests until the connection ends. Returns the reason.
    async fn run(
        &mut self,
        transport: &mut dyn Transport,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> String {
        debug!("connection loop started");
        loop {
            if let Err(reason) = self.transmit(transport).await {
                return reason;
            }

            tokio::select! {
                _ = &mut *shutdown_rx => {
                    debug!("shutdown signal received");
                    return "Connection closed.".into();
                }

                command = cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => return "Connection closed.".into(),
                },

                incoming = transport.recv() => match incoming {
                    Some(Ok(frame)) => match decode_response(&frame) {
                        Ok(response) => self.handle_response(response).await,
                        Err(e) => {
                            error!("closing connection after malformed frame: {e}");
                            return format!("Connection closed: {e}");
                        }
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return format!("Connection lost: {e}");
                    }
                    None => {
                        debug!("transport closed by server");
                        return "Connection closed by server.".into();
                    }
                },
            }
        }
    }

    /// Put the next queued packet on the wire unless one is already awaiting
    /// its response.
    async fn transmit(&mut self, transport: &mut dyn Transport) -> std::result::Result<(), String> {
        loop {
            let Some(encoded) = self.dispatcher.begin_next().map(encode_packet) else {
                return Ok(());
            };
            match encoded {
                Ok(frame) => {
                    return transport.send(frame).await.map_err(|e| {
                        error!("transport send error: {e}");
                        format!("Connection lost: {e}")
                    });
                }
                Err(e) => {
                    error!("dropping unencodable packet: {e}");
                    if let Some(Reply::Sync) = self.dispatcher.abandon_in_flight() {
                        self.engine.forget(1);
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send {
                packet,
                reply,
                do_next,
                sync_after,
            } => {
                let enters_game = MetaCommand::parse(&packet.message)
                    .is_some_and(MetaCommand::changes_game);
                self.dispatcher
                    .enqueue(packet, Reply::Caller(reply), do_next);
                if sync_after && (self.in_game || enters_game) {
                    let check = self.engine.check();
                    self.dispatcher.enqueue(check, Reply::Sync, false);
                }
            }
            Command::CheckUpdate => {
                if self.in_game {
                    let check = self.engine.check();
                    self.dispatcher.enqueue(check, Reply::Sync, true);
                }
            }
            Command::Heartbeat => {
                if self.in_game {
                    if let Some(check) = self.engine.tick() {
                        self.dispatcher.enqueue(check, Reply::Sync, true);
                    }
                }
            }
            Command::Flush => {
                let dropped = self.dispatcher.flush();
                let checks = dropped
                    .iter()
                    .filter(|reply| matches!(reply, Reply::Sync))
                    .count();
                self.engine.forget(checks);
            }
        }
    }

    async fn handle_response(&mut self, response: Response) {
        match self.dispatcher.resolve(response) {
            Resolution::Matched(pending, response) => match pending.reply {
                Reply::Sync => self.apply_sync(&response).await,
                Reply::Caller(reply) => {
                    let changes_game = MetaCommand::parse(&pending.packet.message)
                        .is_some_and(MetaCommand::changes_game);
                    if changes_game && response.status.is_ok() {
                        let game = response
                            .payload
                            .get("game")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        self.enter_game(game).await;
                    }
                    if reply.send(response).is_err() {
                        debug!(message = %pending.packet.message, "caller dropped its response");
                    }
                }
            },
            Resolution::Stale(response) => {
                debug!(message = %response.message, "discarding reply to flushed request");
            }
            Resolution::Unsolicited(response) => {
                warn!(message = %response.message, "discarding unsolicited response");
            }
        }
    }

    async fn apply_sync(&mut self, response: &Response) {
        if self.engine.apply(response) != SyncOutcome::Replaced
            || !self.client.is_current(self.generation)
        {
            return;
        }
        let state = self.engine.game_state().clone();
        *self.client.state.game_state.lock().await = state.clone();
        self.client.emit(ClientEvent::StateChanged(state)).await;
    }

    async fn enter_game(&mut self, game: Option<String>) {
        self.in_game = game.is_some();
        self.engine.reset();
        if !self.client.is_current(self.generation) {
            return;
        }
        *self.client.state.game_state.lock().await = GameState::default();

        let previous = std::mem::replace(&mut *self.client.state.game.lock().await, game.clone());
        if previous != game {
            info!(game = ?game, "game changed");
            self.client.emit(ClientEvent::Game(game)).await;
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::Status;
    use crate::session::Session;
    use async_trait::async_trait;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    /// Never finishes connecting.
    struct Hang;

    #[async_trait]
    impl Connector for Hang {
        async fn connect(&self) -> Result<(Box<dyn Transport>, Session)> {
            std::future::pending().await
        }

        fn describe(&self) -> String {
            "nowhere".into()
        }
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new();
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_clamps() {
        let config = ClientConfig::new()
            .with_event_channel_capacity(0)
            .with_heartbeat_interval(Duration::ZERO);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.heartbeat_interval, MIN_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn pending_response_resolves_once_answered() {
        let (tx, rx) = oneshot::channel();
        let mut pending = task::spawn(PendingResponse::new(rx));
        assert_pending!(pending.poll());

        let response = Response::new("done");
        tx.send(response.clone()).unwrap();
        assert!(pending.is_woken());
        assert_ready_eq!(pending.poll(), Some(response));
    }

    #[test]
    fn pending_response_resolves_to_none_when_dropped() {
        let (tx, rx) = oneshot::channel::<Response>();
        let mut pending = task::spawn(PendingResponse::new(rx));
        drop(tx);
        assert_ready_eq!(pending.poll(), None);
    }

    #[tokio::test]
    async fn requests_while_disconnected_are_unexpected() {
        let (client, _events) = Client::new(Hang, ClientConfig::new());
        let mut reply = client.create_game("room1", None);
        let response = reply.try_recv().unwrap();
        assert_eq!(response.status, Status::Unexpected);
        assert_eq!(response.message, "Not connected.");

        assert!(matches!(client.check_update(), Err(ClientError::NotConnected)));
        assert!(matches!(client.flush_queue(), Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn close_cancels_connection_attempt() {
        let (client, mut events) = Client::new(Hang, ClientConfig::new());
        let client = Arc::new(client);
        let runner = Arc::clone(&client);
        let attempt = tokio::spawn(async move { runner.async_connect().await });

        let mut watcher = client.watch_connection();
        watcher
            .wait_for(|state| *state == ConnectionState::Connecting)
            .await
            .unwrap();
        assert!(matches!(
            client.async_connect().await,
            Err(ClientError::AlreadyConnected)
        ));

        client.close().await;
        assert!(matches!(
            attempt.await.unwrap(),
            Err(ClientError::Cancelled)
        ));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            statuses.push(event);
        }
        assert_eq!(
            statuses,
            vec![
                ClientEvent::Status("Connecting to nowhere...".into()),
                ClientEvent::Status("Closing connection.".into()),
                ClientEvent::Status("Failed to connect: connection attempt cancelled".into()),
            ]
        );
    }

    #[tokio::test]
    async fn connect_timeout_is_reported() {
        let config = ClientConfig::new().with_connect_timeout(Duration::from_millis(10));
        let (client, _events) = Client::new(Hang, config);
        assert!(matches!(
            client.async_connect().await,
            Err(ClientError::Timeout)
        ));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn close_while_disconnected_is_a_no_op() {
        let (client, mut events) = Client::new(Hang, ClientConfig::new());
        client.close().await;
        client.close().await;
        assert!(events.try_recv().is_err());
    }
}
