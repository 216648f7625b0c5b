//! Command handlers
//!
//! Handlers are registered by command name in a [`HandlerRegistry`]. The
//! router looks a parsed command up here and runs the handler on the worker
//! pool with a [`ReplySink`] for answering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use meshgate_core::ClassifiedPacket;
use tracing::debug;

use crate::command::ParsedCommand;
use crate::error::HandlerError;
use crate::reply::{ReplyOptions, ReplySink};

/// Result type for handler invocations
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Catalog entry describing one registered command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    /// Canonical command name
    pub name: String,
    /// One-line description
    pub description: String,
    /// Allowed to run from a broadcast
    pub broadcast_safe: bool,
}

/// Everything a handler gets to know about one invocation
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Classified packet that carried the command
    pub packet: ClassifiedPacket,
    /// Parsed command
    pub command: ParsedCommand,
    /// All registered commands
    pub catalog: Arc<Vec<CommandInfo>>,
}

impl CommandRequest {
    /// Human label for the requester
    pub fn sender_label(&self) -> String {
        self.packet.sender_label()
    }

    /// Whether the request arrived as a broadcast
    pub fn is_broadcast(&self) -> bool {
        self.packet.is_broadcast
    }
}

/// A command implementation
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command
    async fn handle(&self, request: &CommandRequest, reply: &ReplySink) -> HandlerResult;

    /// One-line description for `help`
    fn description(&self) -> &str {
        ""
    }
}

/// Handlers keyed by command name
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn CommandHandler>>,
    aliases: HashMap<String, String>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn register(&mut self, name: &str, handler: impl CommandHandler + 'static) -> &mut Self {
        let name = name.to_lowercase();
        debug!(command = %name, "Registered command handler");
        self.handlers.insert(name, Arc::new(handler));
        self
    }

    /// Make `alias` resolve to the registered command `target`
    pub fn alias(&mut self, alias: &str, target: &str) -> &mut Self {
        self.aliases.insert(alias.to_lowercase(), target.to_lowercase());
        self
    }

    /// Resolve a token (or alias) to its canonical name and handler
    pub fn get(&self, token: &str) -> Option<(&str, Arc<dyn CommandHandler>)> {
        let name = self.aliases.get(token).map(String::as_str).unwrap_or(token);
        self.handlers
            .get_key_value(name)
            .map(|(name, handler)| (name.as_str(), handler.clone()))
    }

    /// Whether `token` resolves to a handler
    pub fn contains(&self, token: &str) -> bool {
        self.get(token).is_some()
    }

    /// Canonical command names, sorted
    pub fn commands(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Describe every command, marking the broadcast-safe ones
    pub fn catalog(&self, broadcast_safe: &HashSet<String>) -> Vec<CommandInfo> {
        self.handlers
            .iter()
            .map(|(name, handler)| CommandInfo {
                name: name.clone(),
                description: handler.description().to_string(),
                broadcast_safe: broadcast_safe.contains(name),
            })
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("commands", &self.commands())
            .field("aliases", &self.aliases)
            .finish()
    }
}

/// Register `echo`, `ping` and `help`
///
/// `status` needs engine state and is added by the engine at startup.
pub fn register_builtin_handlers(registry: &mut HandlerRegistry) {
    registry
        .register("echo", EchoHandler)
        .register("ping", PingHandler)
        .register("help", HelpHandler);
}

/// Repeats its arguments
#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn handle(&self, request: &CommandRequest, reply: &ReplySink) -> HandlerResult {
        if request.command.args.is_empty() {
            return Err(HandlerError::InvalidArguments("nothing to echo".to_string()));
        }
        reply.reply(&request.command.args).await?;
        Ok(())
    }

    fn description(&self) -> &str {
        "repeat the given text"
    }
}

/// Liveness check
#[derive(Debug, Default)]
pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(&self, request: &CommandRequest, reply: &ReplySink) -> HandlerResult {
        let text = match &request.packet.resolved_sender_name {
            Some(name) if request.is_broadcast() => format!("pong @{}", name),
            _ => "pong".to_string(),
        };
        reply.reply(&text).await?;
        Ok(())
    }

    fn description(&self) -> &str {
        "check that the bot is alive"
    }
}

/// Lists the registered commands
#[derive(Debug, Default)]
pub struct HelpHandler;

impl HelpHandler {
    fn render(request: &CommandRequest) -> String {
        let prefix = request
            .command
            .text
            .chars()
            .next()
            .unwrap_or(meshgate_core::DEFAULT_COMMAND_PREFIX);

        // On a channel only the commands that work there are listed
        let entries: Vec<String> = request
            .catalog
            .iter()
            .filter(|info| info.broadcast_safe || !request.is_broadcast())
            .map(|info| {
                let marker = if info.broadcast_safe { "*" } else { "" };
                if info.description.is_empty() {
                    format!("{}{}{}", prefix, info.name, marker)
                } else {
                    format!("{}{}{} - {}", prefix, info.name, marker, info.description)
                }
            })
            .collect();

        if entries.is_empty() {
            return "No commands available".to_string();
        }
        format!("Commands (* = channel ok):\n{}", entries.join("\n"))
    }
}

#[async_trait]
impl CommandHandler for HelpHandler {
    async fn handle(&self, request: &CommandRequest, reply: &ReplySink) -> HandlerResult {
        reply.reply(&Self::render(request)).await?;
        Ok(())
    }

    fn description(&self) -> &str {
        "list commands"
    }
}

/// Produces the status text on demand
pub type StatusFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Reports bridge mode and adapter health
pub struct StatusHandler {
    status: StatusFn,
}

impl StatusHandler {
    /// Create a status handler backed by `status`
    pub fn new(status: StatusFn) -> Self {
        Self { status }
    }
}

#[async_trait]
impl CommandHandler for StatusHandler {
    async fn handle(&self, _request: &CommandRequest, reply: &ReplySink) -> HandlerResult {
        let text = (self.status)();
        // Status can leak node details; keep it off the channel
        reply.reply_with(&text, ReplyOptions::direct()).await?;
        Ok(())
    }

    fn description(&self) -> &str {
        "bridge mode and radio health"
    }
}

impl std::fmt::Debug for StatusHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusHandler").finish_non_exhaustive()
    }
}
