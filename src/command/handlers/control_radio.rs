//! Control radio preparation

use super::HandlerContext;
use crate::command::{CommandResult, Effect};
use fieldlink_shared::RadioRequest;

/// Handle PREPARE_BT
///
/// With the control radio already on, this only wakes the link. Otherwise
/// the directive waits for the radio to be confirmed.
pub fn handle_prepare_control_radio(ctx: &HandlerContext) -> CommandResult {
    if ctx.radios.is_primary_radio_enabled() {
        return CommandResult::done("control radio on, activating link").with(Effect::ActivateLink);
    }

    CommandResult::AwaitRadio {
        request: RadioRequest::EnableControlRadio,
    }
}
