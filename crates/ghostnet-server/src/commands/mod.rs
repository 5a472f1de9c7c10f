//! Chat commands.
//!
//! A chat line starting with the configured prefix is looked up in the
//! [`CommandRegistry`] by its first word and run with the rest of the line
//! as arguments. Handlers get a [`CommandEnv`] giving them the server state
//! and the caller's id; an error is reported back to the caller as a chat
//! line.

mod standard;

use std::collections::HashMap;
use std::sync::Arc;

use ghostnet_net::Connection;
use ghostnet_proto::{Chat, Frame, PlayerStatus};

use crate::state::{PlayerState, ServerState};

pub use standard::standard_commands;

/// Player id with operator rights.
pub const OP_ID: u32 = 0;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// How a command splits the text after its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgParser {
    /// One argument per whitespace-separated word.
    #[default]
    Whitespace,
    /// The whole remainder as a single argument.
    Everything,
}

impl ArgParser {
    pub fn parse(self, input: &str) -> Vec<CommandArg> {
        let input = input.trim();
        match self {
            ArgParser::Whitespace => input.split_whitespace().map(CommandArg::new).collect(),
            ArgParser::Everything if input.is_empty() => Vec::new(),
            ArgParser::Everything => vec![CommandArg::new(input)],
        }
    }
}

/// One command argument, kept raw and parsed as an integer where possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArg {
    raw: String,
    int: Option<i64>,
}

impl CommandArg {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let int = raw.parse().ok();
        Self { raw, int }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn as_int(&self) -> Option<i64> {
        self.int
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a command failed. The display text is what the caller sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Command {0} not found!")]
    UnknownCommand(String),

    #[error("You're not OP!")]
    NotOp,

    #[error("Exactly {n} argument{s} required!", n = .0, s = plural(.0))]
    ArgumentCount(usize),

    #[error("{0} is not a player id!")]
    NotAnId(String),

    #[error("Player #{0} not found!")]
    InvalidConnection(i64),

    #[error("Player #{0} hasn't joined yet!")]
    UnknownPlayer(u32),

    #[error("Page out of range!")]
    PageOutOfRange { page: i64, pages: usize },

    #[error("Player #{0} didn't respond in time!")]
    QueryTimedOut(u32),

    #[error("Player #{0} left before responding!")]
    QueryFailed(u32),

    #[error("{0}")]
    Failed(String),
}

fn plural(count: &usize) -> &'static str {
    if *count == 1 { "" } else { "s" }
}

impl CommandError {
    pub fn failed(message: impl Into<String>) -> Self {
        CommandError::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// What a command runs against.
pub struct CommandEnv<'a> {
    pub server: &'a mut ServerState,
    /// Id of the player who ran the command.
    pub sender: u32,
    /// The frame the command line arrived in.
    pub frame: &'a Frame,
}

impl<'a> CommandEnv<'a> {
    pub fn new(server: &'a mut ServerState, sender: u32, frame: &'a Frame) -> Self {
        Self {
            server,
            sender,
            frame,
        }
    }

    pub fn is_op(&self) -> bool {
        self.sender == OP_ID
    }

    pub fn require_op(&self) -> Result<(), CommandError> {
        if self.is_op() {
            Ok(())
        } else {
            Err(CommandError::NotOp)
        }
    }

    /// Sends a server chat line to the caller.
    pub fn send(&mut self, text: impl Into<String>) -> Chat {
        self.server.send_chat(self.sender, text)
    }

    /// Re-sends an edited chat line to the caller.
    pub fn resend(&mut self, chat: &Chat) {
        self.server.resend_chat(self.sender, chat);
    }

    /// The caller's last status, or a blank one named after its id.
    pub fn caller_status(&self) -> PlayerStatus {
        self.server
            .player(self.sender)
            .map(|player| player.status.clone())
            .unwrap_or_else(|| PlayerStatus {
                name: format!("#{}", self.sender),
                ..Default::default()
            })
    }

    /// The live connection an id argument names.
    pub fn connection(
        &self,
        arg: &CommandArg,
    ) -> Result<(u32, Arc<dyn Connection>), CommandError> {
        let id = arg
            .as_int()
            .ok_or_else(|| CommandError::NotAnId(arg.as_str().to_string()))?;
        u32::try_from(id)
            .ok()
            .and_then(|id| self.server.connection(id).map(|conn| (id, Arc::clone(conn))))
            .ok_or(CommandError::InvalidConnection(id))
    }

    /// The player an id argument names. The player must have sent a status.
    pub fn player(&self, arg: &CommandArg) -> Result<(u32, PlayerState), CommandError> {
        let (id, _) = self.connection(arg)?;
        self.server
            .player(id)
            .cloned()
            .map(|player| (id, player))
            .ok_or(CommandError::UnknownPlayer(id))
    }
}

/// Trait for command handlers.
pub trait CommandHandler: Send + Sync {
    fn run(&self, env: &mut CommandEnv<'_>, args: &[CommandArg]) -> Result<(), CommandError>;
}

/// Blanket implementation for closures and functions.
impl<F> CommandHandler for F
where
    F: Fn(&mut CommandEnv<'_>, &[CommandArg]) -> Result<(), CommandError> + Send + Sync,
{
    fn run(&self, env: &mut CommandEnv<'_>, args: &[CommandArg]) -> Result<(), CommandError> {
        self(env, args)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A named command with its usage text.
pub struct Command {
    pub name: &'static str,
    /// Argument synopsis, e.g. `<id>`.
    pub args: &'static str,
    pub help: &'static str,
    pub parser: ArgParser,
    handler: Box<dyn CommandHandler>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn new<F>(name: &'static str, args: &'static str, help: &'static str, handler: F) -> Self
    where
        F: Fn(&mut CommandEnv<'_>, &[CommandArg]) -> Result<(), CommandError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            args,
            help,
            parser: ArgParser::Whitespace,
            handler: Box::new(handler),
        }
    }

    pub fn with_parser(mut self, parser: ArgParser) -> Self {
        self.parser = parser;
        self
    }

    /// One-line usage, e.g. `/tp <id>`.
    pub fn usage(&self, prefix: &str) -> String {
        format!("{prefix}{} {}", self.name, self.args)
            .trim_end()
            .to_string()
    }

    pub fn run(&self, env: &mut CommandEnv<'_>, input: &str) -> Result<(), CommandError> {
        let args = self.parser.parse(input);
        self.handler.run(env, &args)
    }
}

/// Commands in registration order, looked up by lowercase name.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<Command>,
    by_name: HashMap<&'static str, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in commands.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for command in standard_commands() {
            registry.register(command);
        }
        registry
    }

    /// Adds a command, replacing any command with the same name.
    pub fn register(&mut self, command: Command) {
        match self.by_name.get(command.name) {
            Some(&index) => self.commands[index] = command,
            None => {
                self.by_name.insert(command.name, self.commands.len());
                self.commands.push(command);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.by_name
            .get(name.to_lowercase().as_str())
            .map(|&index| &self.commands[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Runs a command line with the prefix already stripped.
    pub fn execute(&self, env: &mut CommandEnv<'_>, line: &str) -> Result<(), CommandError> {
        let line = line.trim_start();
        let (name, rest) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));
        let command = self
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        command.run(env, rest)
    }
}
