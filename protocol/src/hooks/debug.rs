//! The permissive hook for arbitrary application payloads.

use tracing::info;

use super::{Hook, HookError, Phase};
use crate::model::GossipMessage;

/// Claims `user_message`, accepts everything, and logs what it sees.
///
/// This is the reference path for untyped application traffic and the
/// smallest possible hook implementation.
#[derive(Debug, Default)]
pub struct DebugHook;

impl DebugHook {
    pub fn new() -> Self {
        Self
    }
}

impl Hook for DebugHook {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn should_handle(&self, message_type: &str) -> bool {
        message_type == "user_message"
    }

    fn validate(&self, _message: &GossipMessage, _phase: Phase) -> bool {
        true
    }

    fn handle(&self, message: &GossipMessage, phase: Phase) -> Result<(), HookError> {
        info!(
            message_id = %message.message_id,
            origin = %message.origin_id,
            %phase,
            payload = %message.payload,
            "user message received"
        );
        Ok(())
    }
}
