//! Chat command registry and dispatch.
//!
//! Handlers are registered once at startup in a [`CommandTable`]; the chat
//! host feeds each incoming message to [`CommandTable::dispatch`] and sends
//! back the replies.

pub mod accounts;
pub mod builtin;
pub mod check;
pub mod lab;

pub use builtin::builtin_commands;

use futures::future::BoxFuture;
use regex::Regex;
use tracing::{debug, info};

use crate::context::BotContext;

/// Reply sent to non-admins who invoke an admin-only command.
pub const ADMIN_REQUIRED: &str = "You must be an admin to perform this action.";

/// A collaborator lookup (directory, lab stats) failed.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error("Lookup failed: {0}")]
    Failed(String),
}

/// A line said in chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub nick: String,
    pub channel: String,
    pub text: String,
}

impl IncomingMessage {
    pub fn new(nick: impl Into<String>, channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            channel: channel.into(),
            text: text.into(),
        }
    }
}

/// A line to send back to where the message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Address the reply to the invoking nick.
    pub ping: bool,
}

impl Reply {
    pub fn ping(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ping: true,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ping: false,
        }
    }

    /// The line as it appears in chat.
    pub fn render(&self, nick: &str) -> String {
        if self.ping {
            format!("{nick}: {}", self.text)
        } else {
            self.text.clone()
        }
    }
}

/// What makes an entry fire.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// `"{prefix}{word}"`, optionally followed by whitespace and arguments.
    Command(String),
    /// A pattern matched at the start of the message.
    Rule(Regex),
}

/// A matched message, as seen by a handler.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub nick: String,
    pub channel: String,
    /// Text after the command word, trimmed. Empty for rules.
    pub args: String,
    /// Capture groups of a rule match, from group 1.
    pub groups: Vec<Option<String>>,
}

impl Invocation {
    /// The first whitespace-separated argument.
    pub fn first_arg(&self) -> Option<&str> {
        self.args.split_whitespace().next()
    }

    /// Capture group `n` (1-based) of a rule match.
    pub fn group(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .and_then(Option::as_deref)
    }
}

pub type Handler = for<'a> fn(&'a BotContext, &'a Invocation) -> BoxFuture<'a, Vec<Reply>>;

/// A single entry in the command table.
#[derive(Clone)]
pub struct CommandEntry {
    pub name: String,
    pub description: String,
    pub trigger: Trigger,
    pub admin_only: bool,
    pub handler: Handler,
}

impl std::fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("admin_only", &self.admin_only)
            .finish_non_exhaustive()
    }
}

impl CommandEntry {
    /// An entry fired by `"{prefix}{name}"`.
    pub fn command(name: &str, description: &str, handler: Handler) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            trigger: Trigger::Command(name.to_string()),
            admin_only: false,
            handler,
        }
    }

    /// An entry fired by a pattern at the start of any message.
    pub fn rule(name: &str, description: &str, pattern: Regex, handler: Handler) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            trigger: Trigger::Rule(pattern),
            admin_only: false,
            handler,
        }
    }

    /// Restrict this entry to configured admins.
    #[must_use]
    pub const fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    /// Match a message against this entry's trigger.
    pub fn matches(&self, prefix: &str, message: &IncomingMessage) -> Option<Invocation> {
        let (args, groups) = match &self.trigger {
            Trigger::Command(word) => {
                let rest = message.text.strip_prefix(prefix)?;
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                let (head, tail) = rest.split_at(end);
                if !head.eq_ignore_ascii_case(word) {
                    return None;
                }
                (tail.trim().to_string(), Vec::new())
            }
            Trigger::Rule(pattern) => {
                let captures = pattern
                    .captures(&message.text)
                    .filter(|c| c.get(0).is_some_and(|m| m.start() == 0))?;
                let groups = captures
                    .iter()
                    .skip(1)
                    .map(|g| g.map(|m| m.as_str().to_string()))
                    .collect();
                (String::new(), groups)
            }
        };
        Some(Invocation {
            nick: message.nick.clone(),
            channel: message.channel.clone(),
            args,
            groups,
        })
    }
}

/// The registered commands, in dispatch order.
#[derive(Debug, Clone)]
pub struct CommandTable {
    prefix: String,
    entries: Vec<CommandEntry>,
}

impl CommandTable {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Vec::new(),
        }
    }

    /// A table holding every built-in command.
    pub fn with_builtins(prefix: impl Into<String>) -> Result<Self, regex::Error> {
        let mut table = Self::new(prefix);
        for entry in builtin_commands()? {
            table.register(entry);
        }
        Ok(table)
    }

    pub fn register(&mut self, entry: CommandEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Run every entry matching `message`, in table order, and collect the
    /// replies.
    pub async fn dispatch(&self, ctx: &BotContext, message: &IncomingMessage) -> Vec<Reply> {
        let mut replies = Vec::new();
        for entry in &self.entries {
            let Some(invocation) = entry.matches(&self.prefix, message) else {
                continue;
            };
            if entry.admin_only && !ctx.config.commands.is_admin(&message.nick) {
                info!(command = %entry.name, nick = %message.nick, "Refused admin command");
                replies.push(Reply::ping(ADMIN_REQUIRED));
                continue;
            }
            debug!(command = %entry.name, nick = %message.nick, channel = %message.channel, "Dispatching");
            replies.extend((entry.handler)(ctx, &invocation).await);
        }
        replies
    }
}
