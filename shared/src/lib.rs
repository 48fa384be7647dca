//! Wire types shared by the chat server and its clients.
//!
//! Everything that crosses the socket lives here: the [`Message`] value,
//! the control vocabulary in [`Tokens`], and the length-prefixed frame
//! codec in [`codec`].

pub mod codec;

use serde::{Deserialize, Serialize};

pub use codec::{encode, read_frame, write_frame, ProtocolError, WireError, MAX_FRAME_LEN};

/// Default TCP port the server listens on
pub const DEFAULT_PORT: u16 = 8888;
/// Default address clients connect to and the server binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// One logical message on the wire.
///
/// The same shape carries chat text and control signaling: a login
/// handshake sets `command` and `user`, a chat line sets `text` and `user`,
/// a server notice usually sets only `text`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub text: Option<String>,
    pub command: Option<String>,
    pub user: Option<String>,
}

impl Message {
    /// A message carrying only text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// A chat line typed by `user`
    pub fn chat(text: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            command: None,
            user: Some(user.into()),
        }
    }

    /// A control message carrying only a command token
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn text_str(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn command_str(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn user_str(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// True if the command field equals `token`
    pub fn has_command(&self, token: &str) -> bool {
        self.command_str() == Some(token)
    }
}

/// Control vocabulary exchanged as `command` values.
///
/// Both ends must agree on these; [`Tokens::default`] is the standard set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    /// Sent by a client with its desired login in `user`
    pub login_check: String,
    pub login_is_free: String,
    pub login_is_not_free: String,
    /// Sent by the server in reply to a quit request
    pub session_stopped: String,

    pub help: String,
    pub rename: String,
    pub users: String,
    pub direct_to: String,
    pub quit: String,

    /// Server console only, never sent over the wire
    pub stop: String,
}

impl Default for Tokens {
    fn default() -> Self {
        Self {
            login_check: "<login:?>".to_string(),
            login_is_free: "1".to_string(),
            login_is_not_free: "0".to_string(),
            session_stopped: "<SESSION STOPPED!!!>".to_string(),
            help: "/HELP".to_string(),
            rename: "/RENAME".to_string(),
            users: "/USERS".to_string(),
            direct_to: "/DIRECTTO".to_string(),
            quit: "/QUIT".to_string(),
            stop: "/STOP".to_string(),
        }
    }
}

impl Tokens {
    /// Commands a logged-in user may type
    pub fn user_commands(&self) -> [&str; 5] {
        [
            self.help.as_str(),
            self.rename.as_str(),
            self.users.as_str(),
            self.direct_to.as_str(),
            self.quit.as_str(),
        ]
    }

    /// True if the first word of `text` is a user command
    pub fn is_user_command(&self, text: &str) -> bool {
        let word = text.split(' ').next().unwrap_or(text);
        self.user_commands().contains(&word)
    }
}
