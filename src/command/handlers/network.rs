//! Secondary network join handler

use super::HandlerContext;
use crate::command::{CommandResult, Effect};
use fieldlink_shared::RadioRequest;

/// Handle SWITCH_WIFI
pub fn handle_join_network(ctx: &HandlerContext) -> CommandResult {
    let (name, secret) = match ctx.directive.credentials() {
        Some(credentials) => credentials,
        None => {
            return CommandResult::Rejected {
                message: "missing network name or secret".into(),
            };
        }
    };

    if !ctx.radios.is_secondary_radio_enabled() {
        return CommandResult::AwaitRadio {
            request: RadioRequest::EnableDataRadio,
        };
    }

    CommandResult::done(format!("joining {}", name)).with(Effect::JoinNetwork {
        name: name.to_string(),
        secret: secret.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::test_support::ctx;
    use crate::radio::test_support::FakeRadioPlane;
    use fieldlink_shared::{Directive, DirectiveKind};

    #[test]
    fn test_missing_credentials_rejected() {
        let radios = FakeRadioPlane::new(true, true);
        let directive = Directive::new("s", DirectiveKind::JoinNetwork);
        assert!(matches!(
            handle_join_network(&ctx(&radios, &directive)),
            CommandResult::Rejected { .. }
        ));
    }

    #[test]
    fn test_join_when_radio_on() {
        let radios = FakeRadioPlane::new(true, true);
        let directive = Directive::new("s", DirectiveKind::JoinNetwork).with_network("X", "Y");
        match handle_join_network(&ctx(&radios, &directive)) {
            CommandResult::Completed { effects, .. } => assert_eq!(
                effects,
                vec![Effect::JoinNetwork {
                    name: "X".into(),
                    secret: "Y".into()
                }]
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_join_waits_for_radio() {
        let radios = FakeRadioPlane::new(true, false);
        let directive = Directive::new("s", DirectiveKind::JoinNetwork).with_network("X", "Y");
        assert_eq!(
            handle_join_network(&ctx(&radios, &directive)),
            CommandResult::AwaitRadio {
                request: RadioRequest::EnableDataRadio
            }
        );
    }
}
