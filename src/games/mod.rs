//! Games that can be hosted by a [`LocalServer`](crate::server::LocalServer).

mod chat;
mod tictactoe;

pub use chat::{ChatMessage, ChatRoom, HISTORY_LEN};
pub use tictactoe::{Mark, TicTacToe, BOT_NAME};
