//! # Remote Lobby Example
//!
//! Connects to a pgnet server over WebSocket and chats in a room:
//!
//! 1. Load the last-used connection settings (created on first run)
//! 2. Connect and authenticate, optionally verifying the server key
//! 3. List the game directory, then join or create the `lobby-demo` room
//! 4. Post a message and print chat snapshots until Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start a pgnet chat server on localhost:38929, then:
//! cargo run --example remote_lobby
//!
//! # Override the settings file and password:
//! PGNET_SETTINGS=/tmp/pgnet.json PGNET_PASSWORD=secret cargo run --example remote_lobby
//! ```

use std::sync::Arc;

use pgnet_client::{
    Client, ClientConfig, ClientEvent, ConnectionSettings, GameDirectory, Packet,
    RemoteConnector,
};
use serde_json::Value;

/// Settings file used when `PGNET_SETTINGS` is not set.
const DEFAULT_SETTINGS_PATH: &str = "pgnet_settings.json";

/// Room joined (or created) by this example.
const ROOM: &str = "lobby-demo";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let settings_path =
        std::env::var("PGNET_SETTINGS").unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    let settings = ConnectionSettings::load_from_disk(&settings_path)?;
    let password = std::env::var("PGNET_PASSWORD").ok();
    let credentials = settings.credentials(password.as_deref());

    let connector = RemoteConnector::new(settings.address.clone(), settings.port, credentials);
    tracing::info!("Connecting to {}", connector.url());
    let (client, mut events) = Client::new(connector, ClientConfig::new());
    let client = Arc::new(client);

    let runner = Arc::clone(&client);
    let connection = tokio::spawn(async move { runner.async_connect().await });

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ClientEvent::Status(status) => tracing::info!("{status}"),

                    ClientEvent::Connection(true) => {
                        let saved = ConnectionSettings { online: true, ..settings.clone() };
                        if let Err(e) = saved.save_to_disk(&settings_path) {
                            tracing::warn!("could not save settings: {e}");
                        }

                        let Some(reply) = client.get_game_dir().await else { continue };
                        let directory = GameDirectory::from_response(&reply)?;
                        for (name, info) in &directory.games {
                            tracing::info!(
                                "game {name}: {} users{}",
                                info.user_count,
                                if info.password_protected { ", password protected" } else { "" },
                            );
                        }

                        let entered = if directory.games.contains_key(ROOM) {
                            client.join_game(ROOM, None).await
                        } else {
                            client.create_game(ROOM, None).await
                        };
                        tracing::info!("{entered:?}");
                    }

                    ClientEvent::Game(Some(game)) => {
                        tracing::info!("Entered {game}");
                        let _ = client
                            .send_and_sync(Packet::new("message").with_field("text", "hello from Rust"))
                            .await;
                    }
                    ClientEvent::Game(None) => tracing::info!("Left the game"),

                    ClientEvent::StateChanged(state) => {
                        let messages = state.get("messages").and_then(Value::as_array);
                        for message in messages.into_iter().flatten() {
                            println!(
                                "{} > {}",
                                message.get("username").and_then(Value::as_str).unwrap_or("?"),
                                message.get("text").and_then(Value::as_str).unwrap_or(""),
                            );
                        }
                    }

                    ClientEvent::Connection(false) => break,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, closing");
                client.close().await;
            }
        }
    }

    connection.await??;
    Ok(())
}
