//! Tic-tac-toe with an optional single-player bot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::protocol::{Packet, Response, STATE_HASH_KEY};
use crate::server::{Game, GameFactory};
use crate::state::fingerprint;

/// Name the bot plays under.
pub const BOT_NAME: &str = "Tictactoe Bot";

const BOT_THINK_TIME: Duration = Duration::from_secs(1);

const WINNING_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// A player's mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    /// Plays first.
    X,
    /// Plays second.
    O,
}

impl Mark {
    fn as_str(self) -> &'static str {
        match self {
            Mark::X => "X",
            Mark::O => "O",
        }
    }
}

type Board = [Option<Mark>; 9];

fn winning_line(board: &Board) -> Option<[usize; 3]> {
    let mark_at = |square: usize| board.get(square).copied().flatten();
    WINNING_LINES.into_iter().find(|&[a, b, c]| {
        let first = mark_at(a);
        first.is_some() && first == mark_at(b) && first == mark_at(c)
    })
}

/// Tic-tac-toe game state.
///
/// The first two users to join play; later users spectate. The second
/// player holds X and moves first.
#[derive(Debug)]
pub struct TicTacToe {
    board: Board,
    players: Vec<String>,
    x_turn: bool,
    in_progress: bool,
    outcome: String,
    bot_delay: Duration,
    next_bot_turn: Instant,
}

impl Default for TicTacToe {
    fn default() -> Self {
        Self::new()
    }
}

impl TicTacToe {
    /// Create a game waiting for players.
    pub fn new() -> Self {
        Self {
            board: [None; 9],
            players: Vec::new(),
            x_turn: true,
            in_progress: false,
            outcome: "Waiting for players.".into(),
            bot_delay: BOT_THINK_TIME,
            next_bot_turn: Instant::now(),
        }
    }

    /// Set how long the bot waits before moving.
    #[must_use]
    pub fn with_bot_delay(mut self, delay: Duration) -> Self {
        self.bot_delay = delay;
        self
    }

    /// Factory for [`LocalServer`](crate::server::LocalServer).
    pub fn factory() -> GameFactory {
        Arc::new(|_: &str| Box::new(TicTacToe::new()) as Box<dyn Game>)
    }

    /// Factory whose games use the given bot delay.
    pub fn factory_with_bot_delay(delay: Duration) -> GameFactory {
        Arc::new(move |_: &str| Box::new(TicTacToe::new().with_bot_delay(delay)) as Box<dyn Game>)
    }

    fn state_hash(&self) -> String {
        fingerprint(&(&self.board, &self.players, self.x_turn))
    }

    fn current_username(&self) -> Option<&str> {
        if !self.in_progress {
            return None;
        }
        self.players.get(usize::from(self.x_turn)).map(String::as_str)
    }

    fn mark_of(&self, username: &str) -> Option<Mark> {
        match self.players.iter().position(|p| p == username) {
            Some(0) => Some(Mark::O),
            Some(1) => Some(Mark::X),
            _ => None,
        }
    }

    fn username_of(&self, mark: Mark) -> &str {
        let index = match mark {
            Mark::O => 0,
            Mark::X => 1,
        };
        self.players.get(index).map_or("", String::as_str)
    }

    fn play(&mut self, square: usize, mark: Mark) {
        if let Some(slot) = self.board.get_mut(square) {
            *slot = Some(mark);
        }
        self.x_turn = !self.x_turn;
        self.check_progress();
        self.next_bot_turn = Instant::now() + self.bot_delay;
    }

    fn check_progress(&mut self) {
        if let Some([first, ..]) = winning_line(&self.board) {
            if let Some(Some(mark)) = self.board.get(first).copied() {
                self.in_progress = false;
                self.outcome = format!(
                    "{} playing as {} wins!",
                    self.username_of(mark),
                    mark.as_str()
                );
            }
            return;
        }
        if self.board.iter().all(Option::is_some) {
            self.in_progress = false;
            self.outcome = "Draw.".into();
        }
    }

    fn user_info(&self, username: &str) -> String {
        let Some(current) = self.current_username() else {
            return self.outcome.clone();
        };
        let current_mark = self.mark_of(current).map_or("", Mark::as_str);
        match self.mark_of(username) {
            Some(mark) => {
                let turn = if username == current {
                    "Your turn"
                } else {
                    "Awaiting turn"
                };
                format!("{turn}, playing as: {}", mark.as_str())
            }
            None => format!(
                "{}\nSpectating {current}'s turn as {current_mark}",
                self.outcome
            ),
        }
    }

    fn bot_move(&mut self) {
        if self.current_username() != Some(BOT_NAME) || Instant::now() < self.next_bot_turn {
            return;
        }
        let Some(mine) = self.mark_of(BOT_NAME) else {
            return;
        };
        let theirs = match mine {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        };
        let empty: Vec<usize> = (0..9)
            .filter(|&square| matches!(self.board.get(square), Some(None)))
            .collect();
        let completes_line = |mark: Mark, square: usize| {
            let mut board = self.board;
            if let Some(slot) = board.get_mut(square) {
                *slot = Some(mark);
            }
            winning_line(&board).is_some()
        };
        let choice = empty
            .iter()
            .copied()
            .find(|&square| completes_line(mine, square))
            .or_else(|| {
                empty
                    .iter()
                    .copied()
                    .find(|&square| completes_line(theirs, square))
            })
            .or_else(|| empty.first().copied());
        if let Some(square) = choice {
            self.play(square, mine);
        }
    }

    fn single_player(&mut self) -> Response {
        if self.players.len() >= 2 {
            return Response::unexpected("Game has already started.");
        }
        self.user_joined(BOT_NAME);
        self.next_bot_turn = Instant::now() + self.bot_delay;
        Response::new("Started single player mode.")
    }

    fn play_square(&mut self, packet: &Packet) -> Response {
        let Some(current) = self.current_username() else {
            return Response::unexpected("Game is not in progress.");
        };
        if packet.username != current || current == BOT_NAME {
            return Response::unexpected("Not your turn.");
        }
        let Some(square) = packet
            .payload
            .get("square")
            .and_then(Value::as_u64)
            .and_then(|s| usize::try_from(s).ok())
            .filter(|&s| s < 9)
        else {
            return Response::unexpected("Expected a square between 0 and 8.");
        };
        if matches!(self.board.get(square), Some(Some(_))) {
            return Response::unexpected("Square is already marked.");
        }
        let Some(mark) = self.mark_of(&packet.username) else {
            return Response::bad("Player has no mark.");
        };
        self.play(square, mark);
        Response::new("Marked square.")
    }
}

impl Game for TicTacToe {
    fn user_joined(&mut self, username: &str) {
        if !self.players.iter().any(|p| p == username) {
            self.players.push(username.to_string());
        }
        if self.players.len() == 2 {
            self.in_progress = true;
            self.outcome = "In progress.".into();
        }
    }

    fn user_left(&mut self, username: &str) {
        // Seated players keep their seat; spectators are forgotten.
        if let Some(index) = self.players.iter().position(|p| p == username) {
            if index >= 2 {
                self.players.remove(index);
            }
        }
    }

    fn handle_heartbeat(&mut self, packet: &Packet) -> Response {
        let state_hash = self.state_hash();
        if packet.payload.get(STATE_HASH_KEY).and_then(Value::as_str) == Some(state_hash.as_str()) {
            return Response::new("Up to date.").with_field(STATE_HASH_KEY, state_hash);
        }
        let board: Vec<&str> = self
            .board
            .iter()
            .map(|square| square.map_or("", Mark::as_str))
            .collect();
        Response::new("Updated state.")
            .with_field(STATE_HASH_KEY, state_hash)
            .with_field("players", self.players.clone())
            .with_field("board", board)
            .with_field(
                "your_turn",
                self.current_username() == Some(packet.username.as_str()),
            )
            .with_field("info", self.user_info(&packet.username))
            .with_field("in_progress", self.in_progress)
            .with_field(
                "winning_line",
                winning_line(&self.board).map_or(Value::Null, |line| Value::from(line.to_vec())),
            )
    }

    fn handle_game_packet(&mut self, packet: &Packet) -> Response {
        match packet.message.as_str() {
            "play_square" => self.play_square(packet),
            "single_player" => self.single_player(),
            _ => Response::unexpected("No such command."),
        }
    }

    fn update(&mut self) {
        self.bot_move();
    }

    fn persistent(&self) -> bool {
        self.in_progress
            && self.board.iter().any(Option::is_some)
            && !self.players.iter().any(|p| p == BOT_NAME)
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
    use serde_json::json;

    fn started() -> TicTacToe {
        let mut game = TicTacToe::new();
        game.user_joined("olive");
        game.user_joined("xavier");
        game
    }

    fn play(game: &mut TicTacToe, user: &str, square: usize) -> Response {
        game.handle_game_packet(
            &Packet::new("play_square")
                .with_field("square", square)
                .from_user(user),
        )
    }

    fn snapshot(game: &mut TicTacToe, user: &str, hash: Value) -> Response {
        game.handle_heartbeat(&Packet::check_update(hash).from_user(user))
    }

    #[test]
    fn second_player_moves_first_as_x() {
        let mut game = started();
        assert_eq!(play(&mut game, "olive", 0).status, Status::Unexpected);
        assert!(play(&mut game, "xavier", 0).status.is_ok());
        assert!(play(&mut game, "olive", 1).status.is_ok());
        assert_eq!(
            play(&mut game, "xavier", 1).message,
            "Square is already marked."
        );
    }

    #[test]
    fn invalid_square_is_rejected() {
        let mut game = started();
        assert_eq!(play(&mut game, "xavier", 9).status, Status::Unexpected);
    }

    #[test]
    fn fingerprint_is_stable_without_mutation() {
        let mut game = started();
        let first = snapshot(&mut game, "olive", Value::Null);
        let second = snapshot(&mut game, "olive", Value::Null);
        assert_eq!(first.payload["state_hash"], second.payload["state_hash"]);
    }

    #[test]
    fn matching_hash_gets_minimal_reply() {
        let mut game = started();
        let full = snapshot(&mut game, "olive", Value::Null);
        let hash = full.payload["state_hash"].clone();
        assert!(full.payload.contains_key("board"));

        let minimal = snapshot(&mut game, "olive", hash.clone());
        assert_eq!(minimal.payload.len(), 1);
        assert_eq!(minimal.payload["state_hash"], hash);
    }

    #[test]
    fn mutation_changes_fingerprint_and_sends_full_state() {
        let mut game = started();
        let before = snapshot(&mut game, "olive", Value::Null).payload["state_hash"].clone();
        play(&mut game, "xavier", 4);
        let after = snapshot(&mut game, "olive", before.clone());
        assert_ne!(after.payload["state_hash"], before);
        assert_eq!(after.payload["board"][4], json!("X"));
        assert_eq!(after.payload["your_turn"], json!(true));
    }

    #[test]
    fn win_is_detected_and_reported() {
        let mut game = started();
        for (user, square) in [("xavier", 0), ("olive", 3), ("xavier", 1), ("olive", 4), ("xavier", 2)] {
            assert!(play(&mut game, user, square).status.is_ok());
        }
        let state = snapshot(&mut game, "olive", Value::Null);
        assert_eq!(state.payload["winning_line"], json!([0, 1, 2]));
        assert_eq!(state.payload["info"], json!("xavier playing as X wins!"));
        assert_eq!(state.payload["in_progress"], json!(false));
        assert_eq!(play(&mut game, "olive", 8).status, Status::Unexpected);
    }

    #[test]
    fn full_board_without_line_is_a_draw() {
        let mut game = started();
        // X O X / X O O / O X X
        for (user, square) in [
            ("xavier", 0),
            ("olive", 1),
            ("xavier", 2),
            ("olive", 4),
            ("xavier", 3),
            ("olive", 5),
            ("xavier", 7),
            ("olive", 6),
            ("xavier", 8),
        ] {
            assert!(play(&mut game, user, square).status.is_ok(), "{user} {square}");
        }
        let state = snapshot(&mut game, "olive", Value::Null);
        assert_eq!(state.payload["info"], json!("Draw."));
        assert_eq!(state.payload["winning_line"], Value::Null);
    }

    #[test]
    fn spectators_see_whose_turn_it_is() {
        let mut game = started();
        game.user_joined("sam");
        let state = snapshot(&mut game, "sam", Value::Null);
        assert_eq!(
            state.payload["info"],
            json!("In progress.\nSpectating xavier's turn as X")
        );
        game.user_left("sam");
        game.user_left("olive");
        assert_eq!(game.players, vec!["olive", "xavier"]);
    }

    #[test]
    fn bot_blocks_and_wins() {
        let mut game = TicTacToe::new().with_bot_delay(Duration::ZERO);
        game.user_joined("olive");
        assert!(game.handle_game_packet(&Packet::new("single_player")).status.is_ok());
        // The bot joined second and plays X first.
        game.update();
        assert_eq!(game.board.iter().filter(|s| s.is_some()).count(), 1);
        assert_eq!(game.board[0], Some(Mark::X));

        assert!(play(&mut game, "olive", 4).status.is_ok());
        game.update();
        assert_eq!(game.board[1], Some(Mark::X));

        assert!(play(&mut game, "olive", 2).status.is_ok());
        // Olive threatens 2-4-6; the bot must block square 6.
        game.update();
        assert_eq!(game.board[6], Some(Mark::X));

        assert!(play(&mut game, "olive", 8).status.is_ok());
        // The bot now completes 0-3-6 rather than blocking 2-5-8.
        game.update();
        assert_eq!(game.board[3], Some(Mark::X));
        assert!(!game.in_progress);
        assert_eq!(game.outcome, "Tictactoe Bot playing as X wins!");
    }

    #[test]
    fn bot_waits_for_its_think_time() {
        let mut game = TicTacToe::new().with_bot_delay(Duration::from_secs(60));
        game.user_joined("olive");
        game.handle_game_packet(&Packet::new("single_player"));
        game.update();
        assert!(game.board.iter().all(Option::is_none));
    }

    #[test]
    fn single_player_refused_once_started() {
        let mut game = started();
        let response = game.handle_game_packet(&Packet::new("single_player"));
        assert_eq!(response.status, Status::Unexpected);
    }

    #[test]
    fn persistence_excludes_bot_games() {
        let mut game = started();
        assert!(!game.persistent());
        play(&mut game, "xavier", 0);
        assert!(game.persistent());

        let mut solo = TicTacToe::new().with_bot_delay(Duration::ZERO);
        solo.user_joined("olive");
        solo.handle_game_packet(&Packet::new("single_player"));
        solo.update();
        assert!(!solo.persistent());
    }
}
