//! # Command Queue
//!
//! The only channel between broker callbacks and the session task.
//!
//! ```text
//! ┌───────────────────────┐                         ┌───────────────────────┐
//! │  broker callback(s)   │                         │     session task      │
//! │                       │   CommandSender         │                       │
//! │  TopicRouter::parse ──┼──► enqueue ──► [ FIFO ] ┼──► CommandQueue       │
//! │  (any thread)         │   never blocks          │    try_next           │
//! └───────────────────────┘                         └───────────────────────┘
//! ```
//!
//! Enqueue preserves per-producer order and does not wait on the consumer.
//! Dropping the [`CommandQueue`] makes every later enqueue fail.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use screentime_core::{Command, RouteError, TopicRouter};

use crate::error::{BridgeError, BridgeResult};

/// Creates a connected sender/queue pair.
pub fn command_queue() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, CommandQueue { rx })
}

/// Producer half. Cheap to clone, usable from any thread.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    pub fn enqueue(&self, command: Command) -> BridgeResult<()> {
        self.tx
            .send(command)
            .map_err(|e| BridgeError::ChannelError(format!("command queue closed, dropped {}", e.0)))
    }
}

/// Consumer half, owned by the session task.
#[derive(Debug)]
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandQueue {
    /// Next queued command without waiting.
    pub fn try_next(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }

    /// Stops accepting commands. Already queued commands stay readable.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

// =============================================================================
// Ingress
// =============================================================================

/// Broker-side entry point: parse, then enqueue.
#[derive(Debug, Clone)]
pub struct CommandIngress {
    router: TopicRouter,
    sender: CommandSender,
}

impl CommandIngress {
    pub fn new(router: TopicRouter, sender: CommandSender) -> Self {
        CommandIngress { router, sender }
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Routes one inbound message. Returns true if a command was queued.
    pub fn route(&self, topic: &str, payload: &[u8]) -> bool {
        match self.router.parse(topic, payload) {
            Ok(command) => {
                debug!(kind = command.kind(), %command, "Command queued");
                match self.sender.enqueue(command) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(%e, topic, "Dropping command");
                        false
                    }
                }
            }
            Err(e @ RouteError::Malformed { .. }) => {
                warn!(%e, "Malformed command dropped");
                false
            }
            Err(e) => {
                debug!(%e, "Ignoring topic");
                false
            }
        }
    }
}
