use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, info};

use super::{Game, GameFactory};
use crate::protocol::{GameDirectory, GameInfo, MetaCommand, Packet, Response, CHECK_UPDATE};

struct HostedGame {
    game: Box<dyn Game>,
    password: Option<String>,
    users: BTreeSet<String>,
}

/// Directory of hosted games and the users connected to them.
pub struct Lobby {
    factory: GameFactory,
    games: BTreeMap<String, HostedGame>,
    /// Connected users and the game each one is in.
    users: HashMap<String, Option<String>>,
}

impl std::fmt::Debug for Lobby {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lobby")
            .field("games", &self.games.keys().collect::<Vec<_>>())
            .field("users", &self.users)
            .finish()
    }
}

fn game_reply(message: &str, game: Option<&str>) -> Response {
    Response::new(message).with_field("game", game.map_or(Value::Null, Value::from))
}

fn string_field<'a>(packet: &'a Packet, key: &str) -> Option<&'a str> {
    packet
        .payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

impl Lobby {
    /// Create an empty lobby building games with `factory`.
    pub fn new(factory: GameFactory) -> Self {
        Self {
            factory,
            games: BTreeMap::new(),
            users: HashMap::new(),
        }
    }

    /// Register a connected user. Local lobbies have no accounts, so only
    /// duplicate and empty usernames are refused.
    pub fn login(&mut self, username: &str) -> Response {
        if username.is_empty() {
            return Response::unexpected("A username is required.");
        }
        if self.users.contains_key(username) {
            return Response::unexpected("Username is already connected.");
        }
        self.users.insert(username.to_string(), None);
        info!(username, "user connected");
        Response::new("Logged in.")
    }

    /// Remove a user, leaving their game first.
    pub fn logout(&mut self, username: &str) {
        self.leave_current(username);
        if self.users.remove(username).is_some() {
            info!(username, "user disconnected");
        }
    }

    /// The directory of joinable games.
    pub fn game_dir(&self) -> GameDirectory {
        let games = self
            .games
            .iter()
            .map(|(name, hosted)| {
                let info = GameInfo {
                    user_count: hosted.users.len(),
                    password_protected: hosted.password.is_some(),
                };
                (name.clone(), info)
            })
            .collect();
        GameDirectory { games }
    }

    /// The game `username` is in.
    pub fn game_of(&self, username: &str) -> Option<&str> {
        self.users.get(username).and_then(Option::as_deref)
    }

    /// Answer a packet from a logged-in user.
    pub fn handle_packet(&mut self, packet: &Packet) -> Response {
        if !self.users.contains_key(&packet.username) {
            return Response::bad("Not logged in.");
        }
        if packet.is_meta() {
            return match MetaCommand::parse(&packet.message) {
                Some(command) => self.handle_meta(command, packet),
                None => Response::unexpected(format!("Unknown request: {}", packet.message)),
            };
        }

        let Some(name) = self.game_of(&packet.username).map(str::to_string) else {
            return Response::unexpected("Not in a game.");
        };
        let Some(hosted) = self.games.get_mut(&name) else {
            return Response::bad("Game no longer exists.");
        };
        if packet.message == CHECK_UPDATE {
            hosted.game.update();
            hosted.game.handle_heartbeat(packet)
        } else {
            hosted.game.handle_game_packet(packet)
        }
    }

    fn handle_meta(&mut self, command: MetaCommand, packet: &Packet) -> Response {
        match command {
            MetaCommand::GetGameDir => {
                self.prune_expired();
                Response::new("Games directory.").with_payload(self.game_dir().to_payload())
            }
            MetaCommand::CreateGame => self.create_game(packet),
            MetaCommand::JoinGame => self.join_game(packet),
            MetaCommand::LeaveGame => {
                self.leave_current(&packet.username);
                game_reply("Left game.", None)
            }
            MetaCommand::Help => {
                let commands: Vec<Value> = MetaCommand::all()
                    .map(|command| Value::from(command.as_str()))
                    .collect();
                Response::new("Available requests.").with_field("requests", commands)
            }
        }
    }

    fn create_game(&mut self, packet: &Packet) -> Response {
        let Some(name) = string_field(packet, "name") else {
            return Response::unexpected("A game name is required.");
        };
        self.prune_expired();
        if self.games.contains_key(name) {
            return Response::unexpected("Game name already exists.");
        }
        if self.game_of(&packet.username).is_some() {
            return Response::unexpected("Must leave the current game first.");
        }
        let hosted = HostedGame {
            game: (self.factory)(name),
            password: string_field(packet, "password").map(str::to_string),
            users: BTreeSet::new(),
        };
        info!(game = name, creator = %packet.username, "game created");
        self.games.insert(name.to_string(), hosted);
        self.enter(&packet.username, name);
        game_reply("Created game.", Some(name))
    }

    fn join_game(&mut self, packet: &Packet) -> Response {
        let Some(name) = string_field(packet, "name") else {
            return Response::unexpected("A game name is required.");
        };
        let Some(hosted) = self.games.get(name) else {
            return Response::unexpected("No such game.");
        };
        if let Some(password) = &hosted.password {
            if string_field(packet, "password") != Some(password.as_str()) {
                return Response::unexpected("Incorrect password.");
            }
        }
        if self.game_of(&packet.username).is_some() {
            return Response::unexpected("Must leave the current game first.");
        }
        self.enter(&packet.username, name);
        game_reply("Joined game.", Some(name))
    }

    fn enter(&mut self, username: &str, name: &str) {
        if let Some(hosted) = self.games.get_mut(name) {
            hosted.users.insert(username.to_string());
            hosted.game.user_joined(username);
        }
        self.users
            .insert(username.to_string(), Some(name.to_string()));
        debug!(username, game = name, "user entered game");
    }

    fn leave_current(&mut self, username: &str) {
        let Some(name) = self.users.get_mut(username).and_then(Option::take) else {
            return;
        };
        let Some(hosted) = self.games.get_mut(&name) else {
            return;
        };
        hosted.users.remove(username);
        hosted.game.user_left(username);
        debug!(username, game = %name, "user left game");
        if hosted.users.is_empty() && !hosted.game.persistent() {
            self.games.remove(&name);
            info!(game = %name, "game removed");
        }
    }

    /// Drop empty games that stopped being persistent while nobody was in
    /// them.
    fn prune_expired(&mut self) {
        self.games.retain(|name, hosted| {
            let keep = !hosted.users.is_empty() || hosted.game.persistent();
            if !keep {
                info!(game = %name, "expired game removed");
            }
            keep
        });
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
    use crate::protocol::Status;
    use crate::state::fingerprint;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Counts joins; the fingerprint covers the member list.
    #[derive(Default)]
    struct Roster {
        members: Vec<String>,
    }

    impl Game for Roster {
        fn user_joined(&mut self, username: &str) {
            self.members.push(username.to_string());
        }

        fn user_left(&mut self, username: &str) {
            self.members.retain(|m| m != username);
        }

        fn handle_heartbeat(&mut self, _packet: &Packet) -> Response {
            Response::new("State.")
                .with_field("state_hash", fingerprint(&self.members))
                .with_field("members", self.members.clone())
        }

        fn handle_game_packet(&mut self, packet: &Packet) -> Response {
            Response::new(format!("echo {}", packet.message))
        }
    }

    fn lobby() -> Lobby {
        let mut lobby = Lobby::new(Arc::new(|_: &str| Box::new(Roster::default()) as Box<dyn Game>));
        assert!(lobby.login("alice").status.is_ok());
        assert!(lobby.login("bob").status.is_ok());
        lobby
    }

    fn meta(command: MetaCommand, user: &str) -> Packet {
        command.packet().from_user(user)
    }

    #[test]
    fn duplicate_login_is_refused() {
        let mut lobby = lobby();
        assert_eq!(lobby.login("alice").status, Status::Unexpected);
        assert_eq!(lobby.login("").status, Status::Unexpected);
    }

    #[test]
    fn create_join_and_list() {
        let mut lobby = lobby();
        let created = lobby.handle_packet(
            &meta(MetaCommand::CreateGame, "alice")
                .with_field("name", "room1")
                .with_field("password", "pw"),
        );
        assert!(created.status.is_ok());
        assert_eq!(created.payload["game"], "room1");

        let wrong = lobby.handle_packet(
            &meta(MetaCommand::JoinGame, "bob")
                .with_field("name", "room1")
                .with_field("password", "nope"),
        );
        assert_eq!(wrong.status, Status::Unexpected);

        let joined = lobby.handle_packet(
            &meta(MetaCommand::JoinGame, "bob")
                .with_field("name", "room1")
                .with_field("password", "pw"),
        );
        assert!(joined.status.is_ok());

        let dir = lobby.handle_packet(&meta(MetaCommand::GetGameDir, "bob"));
        let dir = GameDirectory::from_response(&dir).unwrap();
        assert_eq!(dir.games["room1"].user_count, 2);
        assert!(dir.games["room1"].password_protected);
    }

    #[test]
    fn duplicate_game_name_is_refused() {
        let mut lobby = lobby();
        lobby.handle_packet(&meta(MetaCommand::CreateGame, "alice").with_field("name", "g"));
        let again =
            lobby.handle_packet(&meta(MetaCommand::CreateGame, "bob").with_field("name", "g"));
        assert_eq!(again.status, Status::Unexpected);
    }

    #[test]
    fn empty_game_is_removed_on_leave() {
        let mut lobby = lobby();
        lobby.handle_packet(&meta(MetaCommand::CreateGame, "alice").with_field("name", "g"));
        let left = lobby.handle_packet(&meta(MetaCommand::LeaveGame, "alice"));
        assert_eq!(left.payload["game"], Value::Null);
        assert!(lobby.game_dir().games.is_empty());
        assert_eq!(lobby.game_of("alice"), None);
    }

    /// Persistent for as long as the shared flag is set.
    struct Fading(Arc<AtomicBool>);

    impl Game for Fading {
        fn user_joined(&mut self, _username: &str) {}

        fn user_left(&mut self, _username: &str) {}

        fn handle_heartbeat(&mut self, _packet: &Packet) -> Response {
            Response::new("State.").with_field("state_hash", "h")
        }

        fn handle_game_packet(&mut self, _packet: &Packet) -> Response {
            Response::new("ok")
        }

        fn persistent(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn empty_game_is_removed_once_it_expires() {
        let keep = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&keep);
        let mut lobby = Lobby::new(Arc::new(move |_: &str| {
            Box::new(Fading(Arc::clone(&flag))) as Box<dyn Game>
        }));
        lobby.login("alice");
        lobby.handle_packet(&meta(MetaCommand::CreateGame, "alice").with_field("name", "g"));
        lobby.handle_packet(&meta(MetaCommand::LeaveGame, "alice"));
        assert_eq!(lobby.game_dir().games["g"].user_count, 0);

        keep.store(false, Ordering::SeqCst);
        let dir = lobby.handle_packet(&meta(MetaCommand::GetGameDir, "alice"));
        assert!(GameDirectory::from_response(&dir).unwrap().games.is_empty());
        let created =
            lobby.handle_packet(&meta(MetaCommand::CreateGame, "alice").with_field("name", "g"));
        assert!(created.status.is_ok());
    }

    #[test]
    fn logout_leaves_game() {
        let mut lobby = lobby();
        lobby.handle_packet(&meta(MetaCommand::CreateGame, "alice").with_field("name", "g"));
        lobby.handle_packet(&meta(MetaCommand::JoinGame, "bob").with_field("name", "g"));
        lobby.logout("alice");
        assert_eq!(lobby.game_dir().games["g"].user_count, 1);
        assert_eq!(lobby.login("alice").status, Status::Ok);
    }

    #[test]
    fn game_commands_need_a_game() {
        let mut lobby = lobby();
        let response = lobby.handle_packet(&Packet::new("play").from_user("alice"));
        assert_eq!(response.status, Status::Unexpected);

        lobby.handle_packet(&meta(MetaCommand::CreateGame, "alice").with_field("name", "g"));
        let response = lobby.handle_packet(&Packet::new("play").from_user("alice"));
        assert_eq!(response.message, "echo play");
    }

    #[test]
    fn check_update_routes_to_heartbeat() {
        let mut lobby = lobby();
        lobby.handle_packet(&meta(MetaCommand::CreateGame, "alice").with_field("name", "g"));
        let response = lobby.handle_packet(
            &Packet::check_update(Value::Null).from_user("alice"),
        );
        assert_eq!(response.payload["members"], serde_json::json!(["alice"]));
    }

    #[test]
    fn unknown_meta_and_unknown_user() {
        let mut lobby = lobby();
        let response = lobby.handle_packet(&Packet::new("__pgnet__.shutdown").from_user("alice"));
        assert_eq!(response.status, Status::Unexpected);
        let response = lobby.handle_packet(&Packet::new("x").from_user("mallory"));
        assert_eq!(response.status, Status::Bad);
    }

    #[test]
    fn help_lists_meta_commands() {
        let mut lobby = lobby();
        let response = lobby.handle_packet(&meta(MetaCommand::Help, "alice"));
        let requests = response.payload["requests"].as_array().unwrap();
        assert_eq!(requests.len(), MetaCommand::all().count());
    }
}
