//! Directive dispatch for the agent
//!
//! This module handles:
//! - Routing decoded directives to their handlers
//! - Holding at most one pending directive per radio
//! - Requesting radio changes over the best available channel
//! - Confirmation timeouts and post-confirmation settle delays

mod dispatcher;
pub mod handlers;
mod pending;

pub use dispatcher::{
    CommandDispatcher, DispatchConfig, DispatchTimer, RadioPlaneState, RequestChannel,
    SecondaryTransition,
};
pub use pending::{PendingDirective, PendingDirectives};

use fieldlink_shared::RadioRequest;

/// Side effect a handler asks the dispatcher to carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start control-plane link operations
    ActivateLink,
    /// Leave the secondary network
    LeaveNetwork,
    /// Join a named secondary network
    JoinNetwork { name: String, secret: String },
    /// Ask the peer for a radio change without waiting for confirmation
    RequestRadio(RadioRequest),
}

/// Result of handling a directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Directive handled; effects are applied in order
    Completed { message: String, effects: Vec<Effect> },
    /// Directive dropped (malformed or not applicable)
    Rejected { message: String },
    /// A radio must come up first; the directive waits for its confirmation
    AwaitRadio { request: RadioRequest },
}

impl CommandResult {
    pub fn done(message: impl Into<String>) -> Self {
        CommandResult::Completed {
            message: message.into(),
            effects: Vec::new(),
        }
    }

    /// Append an effect to a completed result
    pub fn with(self, effect: Effect) -> Self {
        match self {
            CommandResult::Completed {
                message,
                mut effects,
            } => {
                effects.push(effect);
                CommandResult::Completed { message, effects }
            }
            other => other,
        }
    }
}
