//! Command router
//!
//! Takes classified packets and decides, in a fixed order, whether they
//! reach a handler:
//!
//! 1. direct messages our node addressed to itself are dropped
//! 2. broadcasts matching one of our recent transmissions are dropped
//! 3. texts that are not a known command are dropped
//! 4. broadcasts of commands outside the broadcast-safe set are dropped
//! 5. senders inside their throttle window are dropped
//! 6. everything else is admitted to its network's handler backlog
//!
//! The self/broadcast flags come from the classifier and are never
//! recomputed here. Routing never waits: a command either gets a backlog
//! slot at once or is dropped as busy. Admitted commands wait for a worker
//! on their own task, so a full worker pool cannot hold up the inbound
//! pipeline, and one network flooding its backlog leaves the other's
//! untouched. A handler that fails or panics is logged and counted and
//! affects nothing else.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use meshgate_core::{format_node_id, ClassifiedPacket, NetworkSource, PayloadKind, RouterConfig};
use serde::Serialize;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, error, info, trace, warn};

use crate::command::ParsedCommand;
use crate::echo::EchoSuppressor;
use crate::handler::{CommandInfo, CommandRequest, HandlerRegistry};
use crate::reply::ReplySink;
use crate::throttle::{SenderThrottle, ThrottleKey};
use crate::transmit::Transmitter;

/// What the router did with a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to a handler
    Dispatched {
        /// Canonical command name
        command: String,
    },
    /// Direct message from our own node to itself
    SelfDirect,
    /// Echo of our own broadcast
    Echo,
    /// Not text, or text without a command
    NotCommand,
    /// Command with no registered handler
    UnknownCommand {
        /// Token as received
        token: String,
    },
    /// Direct-only command received as broadcast
    NotBroadcastSafe {
        /// Canonical command name
        command: String,
    },
    /// Sender is inside its throttle window
    Throttled,
    /// The network's handler backlog is full
    Busy {
        /// Canonical command name
        command: String,
    },
    /// Worker pool closed for shutdown
    ShuttingDown,
}

impl RouteOutcome {
    /// Whether a handler was started
    pub fn is_dispatched(&self) -> bool {
        matches!(self, RouteOutcome::Dispatched { .. })
    }
}

/// Router counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Handler invocations started
    pub dispatched: u64,
    /// Self-addressed direct messages dropped
    pub self_direct_dropped: u64,
    /// Broadcast echoes dropped
    pub echoes_suppressed: u64,
    /// Dispatches refused by the throttle
    pub throttled: u64,
    /// Direct-only commands received as broadcast
    pub not_broadcast_safe: u64,
    /// Commands dropped because the handler backlog was full
    pub busy: u64,
    /// Commands with no handler
    pub unknown_command: u64,
    /// Packets that carried no command
    pub not_command: u64,
    /// Handlers that returned an error or panicked
    pub handler_failures: u64,
    /// Handlers that panicked
    pub handler_panics: u64,
}

#[derive(Debug, Default)]
struct RouterCounters {
    dispatched: AtomicU64,
    self_direct_dropped: AtomicU64,
    echoes_suppressed: AtomicU64,
    throttled: AtomicU64,
    not_broadcast_safe: AtomicU64,
    busy: AtomicU64,
    unknown_command: AtomicU64,
    not_command: AtomicU64,
    handler_failures: AtomicU64,
    handler_panics: AtomicU64,
}

impl RouterCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RouterStats {
        RouterStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            self_direct_dropped: self.self_direct_dropped.load(Ordering::Relaxed),
            echoes_suppressed: self.echoes_suppressed.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            not_broadcast_safe: self.not_broadcast_safe.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            unknown_command: self.unknown_command.load(Ordering::Relaxed),
            not_command: self.not_command.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

/// Dispatches commands to handlers
pub struct Router {
    prefix: char,
    registry: HandlerRegistry,
    broadcast_safe: HashSet<String>,
    catalog: Arc<Vec<CommandInfo>>,
    echo: Arc<EchoSuppressor>,
    throttle: SenderThrottle,
    transmitter: Arc<Transmitter>,
    workers: Arc<Semaphore>,
    /// Per-network slots for commands running or waiting for a worker
    admission: HashMap<NetworkSource, Arc<Semaphore>>,
    admission_slots: u32,
    counters: Arc<RouterCounters>,
}

impl Router {
    /// Create a router
    pub fn new(
        config: &RouterConfig,
        registry: HandlerRegistry,
        echo: Arc<EchoSuppressor>,
        transmitter: Arc<Transmitter>,
    ) -> Self {
        let broadcast_safe: HashSet<String> = config
            .broadcast_safe
            .iter()
            .map(|c| c.trim().to_lowercase())
            .collect();
        let catalog = Arc::new(registry.catalog(&broadcast_safe));
        let max_workers = config.max_concurrent_handlers.clamp(1, 1024) as u32;
        let admission_slots = max_workers + config.handler_backlog.min(65_536) as u32;
        let admission = [
            NetworkSource::NetworkA,
            NetworkSource::NetworkB,
            NetworkSource::Unknown,
        ]
        .into_iter()
        .map(|source| (source, Arc::new(Semaphore::new(admission_slots as usize))))
        .collect();

        info!(
            commands = ?registry.commands(),
            broadcast_safe = ?broadcast_safe,
            throttle_ms = config.throttle_window.as_millis() as u64,
            workers = max_workers,
            backlog = config.handler_backlog,
            "Command router ready"
        );

        Self {
            prefix: config.command_prefix,
            registry,
            broadcast_safe,
            catalog,
            echo,
            throttle: SenderThrottle::new(config.throttle_window, config.throttle_capacity),
            transmitter,
            workers: Arc::new(Semaphore::new(max_workers as usize)),
            admission,
            admission_slots,
            counters: Arc::new(RouterCounters::default()),
        }
    }

    /// Route one classified packet
    ///
    /// Never waits on handlers: the handler waits for a worker and runs on
    /// a spawned task.
    pub async fn route(&self, cp: ClassifiedPacket) -> RouteOutcome {
        let source = cp.source();
        let sender = format_node_id(cp.packet.sender_id());

        if cp.is_self_direct() {
            RouterCounters::bump(&self.counters.self_direct_dropped);
            debug!(source = %source, sender = %sender, "Dropping self-addressed direct message");
            return RouteOutcome::SelfDirect;
        }

        if cp.is_broadcast && self.is_echo(&cp) {
            RouterCounters::bump(&self.counters.echoes_suppressed);
            debug!(source = %source, "Dropping echo of our own broadcast");
            return RouteOutcome::Echo;
        }

        let command = match cp.packet.payload_kind() {
            PayloadKind::Text => cp
                .command_text()
                .and_then(|text| ParsedCommand::parse(text, self.prefix)),
            _ => None,
        };
        let Some(command) = command else {
            RouterCounters::bump(&self.counters.not_command);
            trace!(source = %source, sender = %sender, "No command in packet");
            return RouteOutcome::NotCommand;
        };

        let Some((name, handler)) = self.registry.get(&command.token) else {
            RouterCounters::bump(&self.counters.unknown_command);
            debug!(source = %source, token = %command.token, "Unknown command");
            return RouteOutcome::UnknownCommand {
                token: command.token,
            };
        };
        let name = name.to_string();

        if cp.is_broadcast && !self.is_broadcast_safe(&name, &command.token) {
            RouterCounters::bump(&self.counters.not_broadcast_safe);
            info!(
                source = %source,
                command = %name,
                sender = %cp.sender_label(),
                "Ignoring direct-only command received on a channel"
            );
            return RouteOutcome::NotBroadcastSafe { command: name };
        }

        if !self.throttle.allow(&ThrottleKey::for_packet(&cp)) {
            RouterCounters::bump(&self.counters.throttled);
            return RouteOutcome::Throttled;
        }

        let Some(admission) = self.admission.get(&source) else {
            return RouteOutcome::ShuttingDown;
        };
        let slot = match admission.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => {
                RouterCounters::bump(&self.counters.busy);
                warn!(
                    source = %source,
                    command = %name,
                    sender = %cp.sender_label(),
                    "Handler backlog full, dropping command"
                );
                return RouteOutcome::Busy { command: name };
            }
            Err(TryAcquireError::Closed) => {
                warn!(command = %name, "Worker pool closed, dropping command");
                return RouteOutcome::ShuttingDown;
            }
        };

        info!(
            source = %source,
            command = %name,
            sender = %cp.sender_label(),
            broadcast = cp.is_broadcast,
            from_self = cp.is_from_self,
            "Dispatching command"
        );
        RouterCounters::bump(&self.counters.dispatched);

        let sink = ReplySink::for_packet(self.transmitter.clone(), &cp);
        let request = CommandRequest {
            packet: cp,
            command,
            catalog: self.catalog.clone(),
        };
        let counters = self.counters.clone();
        let workers = self.workers.clone();
        let command_name = name.clone();

        tokio::spawn(async move {
            let _slot = slot;
            let Ok(_permit) = workers.acquire_owned().await else {
                debug!(command = %command_name, "Worker pool closed before the handler started");
                return;
            };
            let outcome = AssertUnwindSafe(handler.handle(&request, &sink))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    trace!(command = %command_name, "Handler finished");
                }
                Ok(Err(e)) => {
                    RouterCounters::bump(&counters.handler_failures);
                    warn!(
                        command = %command_name,
                        text = %request.command.text,
                        source = %request.packet.source(),
                        sender = %request.sender_label(),
                        code = e.error_code(),
                        error = %e,
                        "Command handler failed"
                    );
                }
                Err(panic) => {
                    RouterCounters::bump(&counters.handler_failures);
                    RouterCounters::bump(&counters.handler_panics);
                    error!(
                        command = %command_name,
                        text = %request.command.text,
                        source = %request.packet.source(),
                        sender = %request.sender_label(),
                        panic = %panic_message(panic.as_ref()),
                        "Command handler panicked"
                    );
                }
            }
        });

        RouteOutcome::Dispatched { command: name }
    }

    fn is_echo(&self, cp: &ClassifiedPacket) -> bool {
        let Some(text) = cp.packet.text_body() else {
            return false;
        };
        if self.echo.is_echo(text) {
            return true;
        }
        // Network B relays channel text as "Name: text"
        match cp.effective_text.as_deref() {
            Some(effective) if effective != text => self.echo.is_echo(effective),
            _ => false,
        }
    }

    fn is_broadcast_safe(&self, name: &str, token: &str) -> bool {
        self.broadcast_safe.contains(name) || self.broadcast_safe.contains(token)
    }

    /// Counter snapshot
    pub fn stats(&self) -> RouterStats {
        self.counters.snapshot()
    }

    /// Handlers running or waiting for a worker
    pub fn in_flight(&self) -> usize {
        self.admission
            .values()
            .map(|admission| self.admission_slots as usize - admission.available_permits())
            .sum()
    }

    /// Registered command catalog
    pub fn catalog(&self) -> Arc<Vec<CommandInfo>> {
        self.catalog.clone()
    }

    /// Wait for running handlers to finish, then refuse new ones
    ///
    /// Returns `false` if handlers were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let idle = async {
            // Held until every network is idle so none can refill meanwhile
            let mut held = Vec::with_capacity(self.admission.len());
            for admission in self.admission.values() {
                if let Ok(permits) = admission.acquire_many(self.admission_slots).await {
                    held.push(permits);
                }
            }
            held.len()
        };
        let drained = tokio::time::timeout(timeout, idle).await.is_ok();

        for admission in self.admission.values() {
            admission.close();
        }
        self.workers.close();
        if !drained {
            warn!(in_flight = self.in_flight(), "Handlers still running at shutdown");
        }
        drained
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("prefix", &self.prefix)
            .field("registry", &self.registry)
            .field("broadcast_safe", &self.broadcast_safe)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
