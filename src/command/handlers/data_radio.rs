//! Data radio power handlers

use super::HandlerContext;
use crate::command::{CommandResult, Effect};
use fieldlink_shared::RadioRequest;

/// Handle PREPARE_WIFI
pub fn handle_enable_data_radio(ctx: &HandlerContext) -> CommandResult {
    if ctx.radios.is_secondary_radio_enabled() {
        return CommandResult::done("data radio already on");
    }
    CommandResult::AwaitRadio {
        request: RadioRequest::EnableDataRadio,
    }
}

/// Handle DISABLE_WIFI
pub fn handle_disable_data_radio(ctx: &HandlerContext) -> CommandResult {
    let mut result = CommandResult::done("data radio released");
    if ctx.radios.is_secondary_network_joined() {
        result = result.with(Effect::LeaveNetwork);
    }
    if ctx.radios.is_secondary_radio_enabled() {
        result = result.with(Effect::RequestRadio(RadioRequest::DisableDataRadio));
    }
    result
}
