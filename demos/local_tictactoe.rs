//! # Local Tic-Tac-Toe Example
//!
//! Plays a full single-player game against the built-in bot on an in-process
//! server, picking the first free square on every turn:
//!
//! 1. Host a [`LocalServer`] running [`TicTacToe`]
//! 2. Connect a client through a [`LocalConnector`]
//! 3. Create a game and start single player mode
//! 4. React to state snapshots pushed by the heartbeat until the game ends
//!
//! ## Running
//!
//! ```sh
//! cargo run --example local_tictactoe
//!
//! # Watch the sync traffic:
//! RUST_LOG=pgnet_client=debug cargo run --example local_tictactoe
//! ```

use std::sync::Arc;
use std::time::Duration;

use pgnet_client::games::TicTacToe;
use pgnet_client::{
    Client, ClientConfig, ClientEvent, GameState, LocalConnector, LocalServer, Packet,
};
use serde_json::Value;

fn render(state: &GameState) -> String {
    let squares: Vec<&str> = state
        .get("board")
        .and_then(Value::as_array)
        .map(|board| {
            board
                .iter()
                .map(|square| match square.as_str() {
                    Some("") | None => ".",
                    Some(mark) => mark,
                })
                .collect()
        })
        .unwrap_or_default();
    squares
        .chunks(3)
        .map(|row| row.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_free_square(state: &GameState) -> Option<usize> {
    state
        .get("board")?
        .as_array()?
        .iter()
        .position(|square| square.as_str() == Some(""))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Server and client ───────────────────────────────────────────
    let server = LocalServer::new(TicTacToe::factory_with_bot_delay(Duration::from_millis(300)));
    let config = ClientConfig::new().with_heartbeat_interval(Duration::from_millis(100));
    let (client, mut events) = Client::new(LocalConnector::new(server, "player"), config);
    let client = Arc::new(client);

    let runner = Arc::clone(&client);
    let connection = tokio::spawn(async move { runner.async_connect().await });

    // ── Event loop ──────────────────────────────────────────────────
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Status(status) => tracing::info!("{status}"),
            ClientEvent::Connection(true) => {
                let created = client.create_game("demo", None).await;
                tracing::info!("create_game: {created:?}");
                let started = client.send(Packet::new("single_player")).await;
                tracing::info!("single_player: {started:?}");
            }
            ClientEvent::Connection(false) => break,
            ClientEvent::Game(game) => tracing::info!("game: {game:?}"),
            ClientEvent::StateChanged(state) => {
                println!("{}\n", render(&state));
                if let Some(info) = state.get("info").and_then(Value::as_str) {
                    println!("{info}");
                }
                let seated = state
                    .get("players")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                if seated >= 2 && state.get("in_progress") == Some(&Value::Bool(false)) {
                    client.close().await;
                    continue;
                }
                if state.get("your_turn") == Some(&Value::Bool(true)) {
                    if let Some(square) = first_free_square(&state) {
                        let played = client
                            .send_and_sync(Packet::new("play_square").with_field("square", square))
                            .await;
                        tracing::debug!("play_square {square}: {played:?}");
                    }
                }
            }
        }
    }

    connection.await??;
    Ok(())
}
