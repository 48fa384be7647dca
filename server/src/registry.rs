//! Login registry and broadcast engine
//!
//! The [`Registry`] maps logins to sessions and implements every operation
//! that touches shared chat state: the login handshake, chat fan-out,
//! direct messages, renames and presence notices. It is plain synchronous
//! state; the hub task owns the only instance, so each call runs to
//! completion before the next request is looked at. That makes every
//! check-and-insert (join, rename) atomic without any locking.
//!
//! Deliveries never touch a socket. Each session registers an [`Outbox`],
//! the sender half of a bounded queue drained by that session's writer
//! task, and the registry only ever `try_send`s into it.

use crate::commands::CommandTable;
use crate::config::ServerConfig;
use crate::error::{ChatError, ChatResult};
use crate::history::HistoryBuffer;
use log::{debug, info, warn};
use shared::{Message, Tokens};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

/// Sender half of a session's outbound frame queue.
///
/// Bounded by `ServerConfig::outbox_capacity`. The registry never waits on
/// it: once a slow reader lets the queue fill up, further frames for that
/// session are dropped and reported as [`ChatError::Delivery`]. Backpressure
/// from the socket stays inside the session's writer task.
pub type Outbox = mpsc::Sender<Message>;

/// Server-assigned identity of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What the registry knows about a connected session
#[derive(Debug)]
struct SessionEntry {
    login: Option<String>,
    outbox: Outbox,
}

pub struct Registry {
    /// Authenticated logins, at most one session each
    users: HashMap<String, SessionId>,
    /// Every connected session, logged in or not
    sessions: HashMap<SessionId, SessionEntry>,
    history: HistoryBuffer,
    commands: CommandTable,
    tokens: Tokens,
}

impl Registry {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            users: HashMap::new(),
            sessions: HashMap::new(),
            history: HistoryBuffer::new(config.history_capacity),
            commands: CommandTable::standard(&config.tokens),
            tokens: config.tokens.clone(),
        }
    }

    /// A connection was accepted; remember where to send its frames
    pub fn on_start_socket(&mut self, session: SessionId, outbox: Outbox) {
        self.sessions.insert(
            session,
            SessionEntry {
                login: None,
                outbox,
            },
        );
        info!("{}: started.", session);
    }

    pub fn is_login_free(&self, login: &str) -> bool {
        !self.users.contains_key(login)
    }

    /// Claims `login` for `session` unless another session holds it
    pub fn try_register(&mut self, session: SessionId, login: &str) -> bool {
        if !self.is_login_free(login) {
            return false;
        }
        let Some(entry) = self.sessions.get_mut(&session) else {
            return false;
        };

        entry.login = Some(login.to_string());
        self.users.insert(login.to_string(), session);
        true
    }

    /// Drops the session's login mapping, returning the login it held.
    /// Safe to call repeatedly or for a session that never logged in.
    pub fn remove(&mut self, session: SessionId) -> Option<String> {
        let login = self.sessions.get(&session)?.login.clone()?;
        if self.users.get(&login) == Some(&session) {
            self.users.remove(&login);
            Some(login)
        } else {
            None
        }
    }

    /// Handles one handshake message from a session that is not logged in yet
    pub fn on_logged_client(&mut self, session: SessionId, message: &Message) -> bool {
        if !message.has_command(&self.tokens.login_check) {
            debug!("{}: ignoring message before login", session);
            return false;
        }

        let login = message.user_str().unwrap_or_default().to_string();
        let logged = !login.is_empty() && self.try_register(session, &login);

        let reply_token = if logged {
            &self.tokens.login_is_free
        } else {
            &self.tokens.login_is_not_free
        };
        let mut answer = Message::command(reply_token.clone());
        answer.user = message.user.clone();

        if let Err(e) = self.deliver(session, answer) {
            self.on_exception(session, &e);
        }

        if !logged {
            debug!(
                "{}: {}",
                session,
                ChatError::RegistryConflict { login }
            );
            return false;
        }

        if let Err(e) = self.send_last_messages(session) {
            self.on_exception(session, &e);
        }
        let notice = format!("USER '{}' JOIN THE CHAT.", login);
        info!("{}: {}", session, notice);
        if let Err(e) = self.announce(session, Message::text(notice)) {
            self.on_exception(session, &e);
        }
        true
    }

    /// Handles one message from a logged-in session: a command or a chat line
    pub fn on_receive_message(&mut self, session: SessionId, mut message: Message) {
        if let Some(handler) = self.commands.resolve(&mut message) {
            if let Err(e) = handler(self, session, &message) {
                self.on_exception(session, &e);
            }
            return;
        }

        let Some(login) = self.login_of(session).map(str::to_string) else {
            warn!("{}: chat line from a session that is not logged in", session);
            return;
        };
        let Some(text) = message.text_str() else {
            debug!("{}: ignoring message without text", session);
            return;
        };

        let line = Message::chat(format!("{}: {}", login, text), login);
        if let Err(e) = self.broadcast(session, line) {
            self.on_exception(session, &e);
        }
    }

    /// Sends `message` to every logged-in session except `from` and records
    /// it in the history, unless it is a direct message.
    ///
    /// Returns the number of recipients reached. A failed delivery does not
    /// stop the fan-out; failures are reported once it has finished.
    pub fn broadcast(&mut self, from: SessionId, message: Message) -> ChatResult<usize> {
        let result = self.fan_out(from, &message);

        if !message.has_command(&self.tokens.direct_to) {
            if let Some(text) = message.text {
                self.history.push(text);
            }
        }
        result
    }

    /// Join notices reach everyone but are not recorded, so a user who
    /// joins a room where nobody has spoken yet gets an empty replay.
    fn announce(&mut self, from: SessionId, message: Message) -> ChatResult<usize> {
        self.fan_out(from, &message)
    }

    fn fan_out(&self, from: SessionId, message: &Message) -> ChatResult<usize> {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (login, &session) in &self.users {
            if session == from {
                continue;
            }
            match self.deliver(session, message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(login.as_str()),
            }
        }

        if failed.is_empty() {
            Ok(delivered)
        } else {
            failed.sort_unstable();
            Err(ChatError::Delivery {
                recipient: failed.join(", "),
            })
        }
    }

    /// Replays the history to `session` as one message, if there is any.
    /// Returns whether a message was sent.
    pub fn send_last_messages(&self, session: SessionId) -> ChatResult<bool> {
        match self.history.render() {
            Some(text) => {
                self.deliver(session, Message::text(text))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `/RENAME <new login>`
    pub fn change_login(&mut self, session: SessionId, message: &Message) -> ChatResult<()> {
        let command = self.tokens.rename.clone();
        let new_login = message
            .text_str()
            .and_then(|text| text.strip_prefix(command.as_str()))
            .and_then(|rest| rest.strip_prefix(' '))
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if new_login.is_empty() {
            return Err(ChatError::command(&command, "no new login given"));
        }

        let previous = self
            .login_of(session)
            .map(str::to_string)
            .ok_or_else(|| ChatError::command(&command, "session is not logged in"))?;

        if !self.is_login_free(&new_login) {
            debug!(
                "{}: {}",
                session,
                ChatError::RegistryConflict {
                    login: new_login.clone()
                }
            );
            return self.deliver(
                session,
                Message::text(format!("LOGIN '{}' IS BUSY.", new_login)),
            );
        }

        if let Some(entry) = self.sessions.get_mut(&session) {
            entry.login = Some(new_login.clone());
        }
        self.users.remove(&previous);
        self.users.insert(new_login.clone(), session);

        self.deliver(
            session,
            Message::text(format!(
                "YOUR LOGIN WAS SUCCESSFULLY CHANGED TO '{}'",
                new_login
            )),
        )?;

        let notice = format!("USER '{}' CHANGED NAME TO '{}'.", previous, new_login);
        info!("{}: {}", session, notice);
        self.broadcast(session, Message::text(notice))?;
        Ok(())
    }

    /// `/DIRECTTO :<target> <body>`
    ///
    /// Returns `Ok(true)` only when the body was queued for the target.
    pub fn send_direct(&mut self, from: SessionId, message: &Message) -> ChatResult<bool> {
        let command = &self.tokens.direct_to;
        let Some(rest) = message
            .text_str()
            .and_then(|text| text.strip_prefix(command.as_str()))
            .and_then(|rest| rest.strip_prefix(" :"))
        else {
            return Ok(false);
        };

        let (target, body) = match rest.split_once(' ') {
            Some((target, body)) => (target, body),
            None => (rest, ""),
        };
        if target.is_empty() {
            return Ok(false);
        }

        let Some(&target_session) = self.users.get(target) else {
            self.deliver(
                from,
                Message::text(format!("USER '{}' IS NOT IN THIS CHAT.", target)),
            )?;
            return Ok(false);
        };
        if body.trim().is_empty() {
            return Ok(false);
        }

        let sender = self
            .login_of(from)
            .ok_or_else(|| ChatError::command(command, "session is not logged in"))?;
        let direct = Message::text(format!("DIRECT MESSAGE FROM {}: {}", sender, body))
            .with_command(command.clone());

        self.deliver(target_session, direct)?;
        Ok(true)
    }

    /// The connection is gone. Forgets the session and tells everyone else
    /// if it had logged in. Never fails.
    pub fn on_stop_socket(&mut self, session: SessionId) {
        let login = self.remove(session);
        self.sessions.remove(&session);

        let Some(login) = login else {
            info!("{}: stopped before logging in.", session);
            return;
        };

        let notice = format!("USER '{}' QUIT THE CHAT.", login);
        info!("{}: {}", session, notice);
        if let Err(e) = self.broadcast(session, Message::text(notice)) {
            debug!("{}: departure notice incomplete: {}", session, e);
        }
    }

    /// `/USERS`
    pub fn get_online_users(&self, session: SessionId) -> ChatResult<()> {
        let mut logins: Vec<&str> = self.users.keys().map(String::as_str).collect();
        logins.sort_unstable();

        let mut text = String::from("ONLINE USERS:\n");
        for login in logins {
            text.push_str(login);
            text.push('\n');
        }
        self.deliver(session, Message::text(text))
    }

    /// `/HELP`
    pub fn help(&self, session: SessionId) -> ChatResult<()> {
        let text = self.commands.describe(&self.tokens.help);
        self.deliver(session, Message::text(text))
    }

    /// `/QUIT`: the client closes the connection once it sees the reply
    pub fn quit(&self, session: SessionId) -> ChatResult<()> {
        self.deliver(session, Message::command(self.tokens.session_stopped.clone()))
    }

    pub fn on_exception(&self, session: SessionId, error: &ChatError) {
        match self.login_of(session) {
            Some(login) => warn!("{} ({}): {}", session, login, error),
            None => warn!("{}: {}", session, error),
        }
    }

    /// Queues one frame for `session` without waiting
    pub fn deliver(&self, session: SessionId, message: Message) -> ChatResult<()> {
        let entry = self.sessions.get(&session).ok_or_else(|| ChatError::Delivery {
            recipient: session.to_string(),
        })?;

        entry.outbox.try_send(message).map_err(|_| ChatError::Delivery {
            recipient: entry
                .login
                .clone()
                .unwrap_or_else(|| session.to_string()),
        })
    }

    pub fn login_of(&self, session: SessionId) -> Option<&str> {
        self.sessions.get(&session)?.login.as_deref()
    }

    pub fn session_of(&self, login: &str) -> Option<SessionId> {
        self.users.get(login).copied()
    }

    pub fn contains_login(&self, login: &str) -> bool {
        self.users.contains_key(login)
    }

    pub fn logins(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }
}
