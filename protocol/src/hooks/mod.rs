//! # Hook Manager
//!
//! A hook is a capability that claims a `message_type` and knows how to
//! validate and process messages of that type. Hooks are registered once
//! at startup; registration order is iteration order.
//!
//! Dispatch semantics:
//!
//! - A message whose type no hook claims is refused outright — the node
//!   does not relay traffic it cannot vouch for.
//! - Across claiming hooks, validation is a permissive OR: hooks are
//!   specialists for disjoint types in practice, and where they overlap
//!   any acceptance wins.
//! - A failing `handle` is logged and never aborts the other hooks.

mod chain;
mod debug;

use std::fmt;

use thiserror::Error;
use tracing::{error, info};

use crate::model::GossipMessage;

pub use chain::ChainHook;
pub use debug::DebugHook;

/// Stage at which a message is being examined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Recovered from disk or fetched during anti-entropy sync.
    Loaded,
    /// Received from a peer over the network.
    Pull,
    /// About to be sent to peers.
    Push,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Loaded => "loaded",
            Phase::Pull => "pull",
            Phase::Push => "push",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by a hook's `handle` step.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A typed message-processing capability.
pub trait Hook: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this hook handles messages of the given type.
    fn should_handle(&self, message_type: &str) -> bool;

    /// Whether the message is acceptable at this phase.
    fn validate(&self, message: &GossipMessage, phase: Phase) -> bool;

    /// Apply the message's side effects.
    fn handle(&self, message: &GossipMessage, phase: Phase) -> Result<(), HookError>;
}

/// Ordered registry of hooks with type-dispatched validation and processing.
#[derive(Default)]
pub struct HookManager {
    hooks: Vec<Box<dyn Hook>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook. Call order at startup fixes dispatch order.
    pub fn register(&mut self, hook: Box<dyn Hook>) {
        self.hooks.push(hook);
    }

    /// Whether at least one claiming hook accepts the message.
    ///
    /// Returns `false` when no registered hook claims the message type.
    pub fn validate_message(&self, message: &GossipMessage, phase: Phase) -> bool {
        let mut claimed = false;
        for hook in &self.hooks {
            if !hook.should_handle(&message.message_type) {
                continue;
            }
            claimed = true;
            if hook.validate(message, phase) {
                return true;
            }
        }

        if !claimed {
            info!(
                message_id = %message.message_id,
                message_type = %message.message_type,
                "no hook claims message type"
            );
        }
        false
    }

    /// Run `handle` on every claiming hook that validates the message.
    ///
    /// Handle failures are logged and do not stop the remaining hooks.
    /// Returns `true` iff at least one hook validated.
    pub fn process_message(&self, message: &GossipMessage, phase: Phase) -> bool {
        let mut claimed = false;
        let mut validated = false;
        for hook in &self.hooks {
            if !hook.should_handle(&message.message_type) {
                continue;
            }
            claimed = true;
            if !hook.validate(message, phase) {
                continue;
            }
            validated = true;
            if let Err(err) = hook.handle(message, phase) {
                error!(
                    hook = hook.name(),
                    message_id = %message.message_id,
                    error = %err,
                    "hook failed to handle message"
                );
            }
        }

        if !claimed {
            info!(
                message_id = %message.message_id,
                message_type = %message.message_type,
                "no hook claims message type"
            );
        }
        validated
    }
}
