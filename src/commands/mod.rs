use serde::{Deserialize, Serialize};

pub mod dice;
pub mod dispatch;

pub use dice::{DeltaSource, UniformDelta};
pub use dispatch::{Dispatcher, LeaderboardEntry, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Random,
    Top,
    Profile,
    Help,
    Reset,
    Unknown,
}

impl Command {
    pub const ALL: &'static [&'static str] =
        &["/start", "/random", "/top", "/profile", "/help", "/reset"];

    /// Reads the command from the first word of a message.
    ///
    /// Accepts a trailing `@botname` (`/top@some_bot`) and ignores anything after the first word.
    pub fn parse(text: &str) -> Self {
        let Some(word) = text.split_whitespace().next() else {
            return Command::Unknown;
        };

        let Some(name) = word.strip_prefix('/') else {
            return Command::Unknown;
        };

        let name = name.split('@').next().unwrap_or_default();
        match name.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "random" => Command::Random,
            "top" => Command::Top,
            "profile" => Command::Profile,
            "help" => Command::Help,
            "reset" => Command::Reset,
            _ => Command::Unknown,
        }
    }
}

/// Where a command was sent from; group and supergroup chats both map to `Group`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chat {
    Group { id: i64, title: String },
    Private { id: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    pub chat: Chat,
    pub user_id: i64,
    pub display_name: String,
}
