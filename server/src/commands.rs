//! User command dispatch table
//!
//! Built once at startup by [`CommandTable::standard`] and read-only while
//! serving. A command is selected by the first space-separated token of a
//! chat line, e.g. `/RENAME bob`.

use crate::error::ChatResult;
use crate::registry::{Registry, SessionId};
use log::debug;
use shared::{Message, Tokens};
use std::collections::BTreeMap;

/// A command handler runs inside the hub with the originating session as context
pub type CommandHandler = fn(&mut Registry, SessionId, &Message) -> ChatResult<()>;

#[derive(Clone)]
pub struct CommandEntry {
    pub handler: CommandHandler,
    pub description: String,
}

#[derive(Clone, Default)]
pub struct CommandTable {
    entries: BTreeMap<String, CommandEntry>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user commands every server offers
    pub fn standard(tokens: &Tokens) -> Self {
        let mut table = Self::new();

        table.register(
            &tokens.help,
            "get available user commands",
            |registry, session, _| registry.help(session),
        );
        table.register(
            &tokens.rename,
            format!("to rename your login type {} newLogin in your chat.", tokens.rename),
            |registry, session, message| registry.change_login(session, message),
        );
        table.register(
            &tokens.users,
            format!("to see users online type {} in your chat.", tokens.users),
            |registry, session, _| registry.get_online_users(session),
        );
        table.register(
            &tokens.direct_to,
            format!(
                "to send direct message to the user type {} :user_name 'your sentence' .",
                tokens.direct_to
            ),
            |registry, session, message| {
                if !registry.send_direct(session, message)? {
                    debug!("{}: direct message was not delivered", session);
                }
                Ok(())
            },
        );
        table.register(
            &tokens.quit,
            format!("to quit the chat type {}", tokens.quit),
            |registry, session, _| registry.quit(session),
        );

        table
    }

    pub fn register(
        &mut self,
        token: impl Into<String>,
        description: impl Into<String>,
        handler: CommandHandler,
    ) {
        self.entries.insert(
            token.into(),
            CommandEntry {
                handler,
                description: description.into(),
            },
        );
    }

    /// Looks up the first token of the message text.
    ///
    /// On a hit the message's command field is set to the token and the
    /// bound handler is returned; `None` means an ordinary chat line.
    pub fn resolve(&self, message: &mut Message) -> Option<CommandHandler> {
        let text = message.text.as_deref()?;
        let token = text.split(' ').next().unwrap_or(text);
        let entry = self.entries.get(token)?;

        message.command = Some(token.to_string());
        Some(entry.handler)
    }

    /// One `token - description` line per command, skipping `exclude`
    pub fn describe(&self, exclude: &str) -> String {
        let mut out = String::from("AVAILABLE USER COMMANDS:\n");
        for (token, entry) in &self.entries {
            if token == exclude {
                continue;
            }
            out.push_str(token);
            out.push_str(" - ");
            out.push_str(&entry.description);
            out.push('\n');
        }
        out
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }
}
