//! Release handler
//!
//! Gives the data radio back. The control radio is never released here:
//! turning it off would cut the channel the next directive arrives on.

use super::HandlerContext;
use crate::command::{CommandResult, Effect};
use fieldlink_shared::RadioRequest;

/// Handle RELEASE
pub fn handle_release(ctx: &HandlerContext) -> CommandResult {
    let mut result = CommandResult::done("released").with(Effect::LeaveNetwork);
    if ctx.radios.is_secondary_radio_enabled() {
        result = result.with(Effect::RequestRadio(RadioRequest::DisableDataRadio));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::test_support::ctx;
    use crate::radio::test_support::FakeRadioPlane;
    use fieldlink_shared::{Directive, DirectiveKind};

    #[test]
    fn test_release_never_touches_control_radio() {
        for primary in [false, true] {
            for secondary in [false, true] {
                let radios = FakeRadioPlane::new(primary, secondary);
                let directive = Directive::new("s", DirectiveKind::ReleaseAll);
                let effects = match handle_release(&ctx(&radios, &directive)) {
                    CommandResult::Completed { effects, .. } => effects,
                    other => panic!("unexpected {:?}", other),
                };

                assert_eq!(effects[0], Effect::LeaveNetwork);
                let requests: Vec<_> = effects
                    .iter()
                    .filter_map(|e| match e {
                        Effect::RequestRadio(r) => Some(*r),
                        _ => None,
                    })
                    .collect();
                assert!(requests.iter().all(|r| r.radio() != fieldlink_shared::RadioKind::Control));
                assert_eq!(requests.len(), usize::from(secondary));
            }
        }
    }
}
