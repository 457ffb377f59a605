//! Command dispatcher - routes directives and tracks radio confirmations

use super::handlers::{self, HandlerContext};
use super::pending::PendingDirectives;
use super::{CommandResult, Effect};
use crate::connection::ControlLink;
use crate::radio::{JoinOutcome, RadioPlane, UserPrompt};
use crate::timer::{EventSink, Fired, Scheduler, Timers};
use crate::transport::FallbackTransport;
use fieldlink_shared::{timing, Directive, DirectiveKind, RadioKind, RadioRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dispatcher timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a radio request may go unconfirmed
    pub confirm_timeout_ms: u64,
    /// Settle delay after the control radio is confirmed
    pub control_settle_ms: u64,
    /// Settle delay after the data radio is confirmed
    pub data_settle_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            confirm_timeout_ms: timing::RADIO_CONFIRM_TIMEOUT_MS,
            control_settle_ms: timing::CONTROL_RADIO_SETTLE_MS,
            data_settle_ms: timing::DATA_RADIO_SETTLE_MS,
        }
    }
}

impl DispatchConfig {
    fn settle(&self, kind: RadioKind) -> Duration {
        Duration::from_millis(match kind {
            RadioKind::Control => self.control_settle_ms,
            RadioKind::Data => self.data_settle_ms,
        })
    }
}

/// Deferred steps of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchTimer {
    /// A radio request went unconfirmed
    Confirm(RadioKind),
    /// Settle delay after a ready confirmation elapsed
    Settle(RadioKind),
}

/// Channel a radio request went out on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestChannel {
    Link,
    Fallback,
    None,
}

/// Last secondary-network action taken by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecondaryTransition {
    #[default]
    Idle,
    JoinRequested,
    Joined,
    JoinFailed,
    Left,
}

/// Which radios are carrying traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioPlaneState {
    Idle,
    PrimaryActive,
    SecondaryActive,
    Both,
}

impl fmt::Display for RadioPlaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioPlaneState::Idle => "idle",
            RadioPlaneState::PrimaryActive => "primary-active",
            RadioPlaneState::SecondaryActive => "secondary-active",
            RadioPlaneState::Both => "both",
        };
        f.write_str(name)
    }
}

/// Routes directives to handlers and owns everything that outlives one
pub struct CommandDispatcher<D> {
    config: DispatchConfig,
    session_id: String,
    radios: Arc<dyn RadioPlane>,
    fallback: Option<Arc<dyn FallbackTransport>>,
    prompt: Arc<dyn UserPrompt>,
    on_join: EventSink<JoinOutcome>,
    timers: Timers<DispatchTimer, D>,
    pending: PendingDirectives,
    /// Ready confirmations waiting out their settle delay
    confirmations: HashMap<RadioKind, Directive>,
    /// Channel the outstanding request for each radio went out on
    requested_via: HashMap<RadioKind, RequestChannel>,
    last_transition: SecondaryTransition,
}

impl<D: Scheduler<DispatchTimer>> CommandDispatcher<D> {
    /// `on_join` receives network join outcomes; feed them back through `on_network_result`
    pub fn new(
        config: DispatchConfig,
        session_id: String,
        radios: Arc<dyn RadioPlane>,
        fallback: Option<Arc<dyn FallbackTransport>>,
        prompt: Arc<dyn UserPrompt>,
        on_join: EventSink<JoinOutcome>,
        scheduler: D,
    ) -> Self {
        Self {
            config,
            session_id,
            radios,
            fallback,
            prompt,
            on_join,
            timers: Timers::new(scheduler),
            pending: PendingDirectives::new(),
            confirmations: HashMap::new(),
            requested_via: HashMap::new(),
            last_transition: SecondaryTransition::Idle,
        }
    }

    pub fn pending(&self, kind: RadioKind) -> Option<&Directive> {
        self.pending.get(kind).map(|p| &p.directive)
    }

    #[cfg(test)]
    pub fn last_transition(&self) -> SecondaryTransition {
        self.last_transition
    }

    #[cfg(test)]
    pub fn requested_via(&self, kind: RadioKind) -> Option<RequestChannel> {
        self.requested_via.get(&kind).copied()
    }

    pub fn radio_plane_state(&self) -> RadioPlaneState {
        let primary = self.radios.is_primary_radio_enabled();
        let secondary = self.radios.is_secondary_network_joined()
            || matches!(
                self.last_transition,
                SecondaryTransition::JoinRequested | SecondaryTransition::Joined
            );

        match (primary, secondary) {
            (true, true) => RadioPlaneState::Both,
            (true, false) => RadioPlaneState::PrimaryActive,
            (false, true) => RadioPlaneState::SecondaryActive,
            (false, false) => RadioPlaneState::Idle,
        }
    }

    /// Handle one decoded directive
    pub fn handle(&mut self, directive: Directive, link: &mut dyn ControlLink) {
        info!(
            "[DISPATCH] {} (session {})",
            directive.kind.action(),
            directive.correlation_id
        );

        let kind = directive.kind;
        match kind {
            DirectiveKind::ControlRadioReady => self.on_radio_ready(RadioKind::Control, directive),
            DirectiveKind::DataRadioReady => self.on_radio_ready(RadioKind::Data, directive),
            DirectiveKind::ControlRadioOff => self.on_radio_off(RadioKind::Control),
            DirectiveKind::DataRadioOff => self.on_radio_off(RadioKind::Data),
            DirectiveKind::ReleaseAll => {
                self.drop_pending(RadioKind::Data);
                let result = self.run_handler(&directive);
                self.apply(&directive, result, link, false);
            }
            _ => {
                let result = self.run_handler(&directive);
                self.apply(&directive, result, link, false);
            }
        }
    }

    /// Timer callbacks; expirations of cancelled or replaced timers are ignored
    pub fn on_timer(&mut self, fired: Fired<DispatchTimer>, link: &mut dyn ControlLink) {
        if !self.timers.accept(&fired) {
            debug!("[DISPATCH] Ignoring stale {:?} timer", fired.kind);
            return;
        }

        match fired.kind {
            DispatchTimer::Confirm(kind) => self.on_confirm_timeout(kind),
            DispatchTimer::Settle(kind) => self.on_settled(kind, link),
        }
    }

    /// Outcome of a join started by this dispatcher
    pub fn on_network_result(&mut self, outcome: JoinOutcome) {
        match &outcome {
            JoinOutcome::Joined { .. } => {
                info!("[DISPATCH] Joined network {}", outcome.network());
                self.last_transition = SecondaryTransition::Joined;
            }
            JoinOutcome::Failed { reason, .. } => {
                warn!("[DISPATCH] Could not join {}: {}", outcome.network(), reason);
                self.last_transition = SecondaryTransition::JoinFailed;
            }
        }
    }

    fn run_handler(&self, directive: &Directive) -> CommandResult {
        let ctx = HandlerContext {
            radios: self.radios.as_ref(),
            directive,
        };

        match directive.kind {
            DirectiveKind::PrepareControlRadio => handlers::handle_prepare_control_radio(&ctx),
            DirectiveKind::EnableDataRadio => handlers::handle_enable_data_radio(&ctx),
            DirectiveKind::DisableDataRadio => handlers::handle_disable_data_radio(&ctx),
            DirectiveKind::JoinNetwork => handlers::handle_join_network(&ctx),
            DirectiveKind::ReleaseAll => handlers::handle_release(&ctx),
            DirectiveKind::ControlRadioReady
            | DirectiveKind::ControlRadioOff
            | DirectiveKind::DataRadioReady
            | DirectiveKind::DataRadioOff => CommandResult::Rejected {
                message: "confirmations are not re-executed".into(),
            },
        }
    }

    /// Carry out a handler result; true if it started a network join
    fn apply(
        &mut self,
        directive: &Directive,
        result: CommandResult,
        link: &mut dyn ControlLink,
        retry: bool,
    ) -> bool {
        let action = directive.kind.action();
        match result {
            CommandResult::Completed { message, effects } => {
                info!("[DISPATCH] {} completed: {}", action, message);
                let mut joined = false;
                for effect in effects {
                    match effect {
                        Effect::ActivateLink => link.activate(),
                        Effect::LeaveNetwork => {
                            self.radios.leave_network();
                            self.last_transition = SecondaryTransition::Left;
                        }
                        Effect::JoinNetwork { name, secret } => {
                            self.join(&name, &secret);
                            joined = true;
                        }
                        Effect::RequestRadio(request) => {
                            let channel = self.send_request(request, &reason_for(directive), link);
                            self.requested_via.insert(request.radio(), channel);
                        }
                    }
                }
                joined
            }
            CommandResult::Rejected { message } => {
                warn!("[DISPATCH] Dropping {}: {}", action, message);
                false
            }
            CommandResult::AwaitRadio { request } => {
                let kind = request.radio();
                if let Some(old) = self.pending.store(kind, directive.clone()) {
                    info!(
                        "[DISPATCH] {} replaces pending {} for the {} radio",
                        action,
                        old.kind.action(),
                        kind
                    );
                }

                if retry {
                    warn!("[DISPATCH] {} radio still not on after confirmation, waiting", kind);
                } else {
                    let channel = self.send_request(request, &reason_for(directive), link);
                    self.requested_via.insert(kind, channel);
                }
                self.timers.arm(
                    DispatchTimer::Confirm(kind),
                    Duration::from_millis(self.config.confirm_timeout_ms),
                );
                false
            }
        }
    }

    /// Send a radio request: control link first, then fallback
    fn send_request(
        &mut self,
        request: RadioRequest,
        reason: &str,
        link: &mut dyn ControlLink,
    ) -> RequestChannel {
        let action = request.action();

        if link.is_ready() && link.send(&request.to_json(&self.session_id, reason)) {
            info!("[DISPATCH] Requested {} over the control link", action);
            return RequestChannel::Link;
        }

        if let Some(fallback) = &self.fallback {
            if fallback.is_available() && fallback.publish(action, reason) {
                info!("[DISPATCH] Requested {} over the fallback transport", action);
                return RequestChannel::Fallback;
            }
        }

        warn!("[DISPATCH] No channel available for {}", action);
        if request.radio() == RadioKind::Control {
            self.prompt.prompt_enable_control_radio(reason);
        }
        RequestChannel::None
    }

    fn join(&mut self, name: &str, secret: &str) {
        info!("[DISPATCH] Joining network {}", name);
        self.last_transition = SecondaryTransition::JoinRequested;
        let on_join = self.on_join.clone();
        self.radios
            .join_network(name, secret, Box::new(move |outcome: JoinOutcome| on_join(outcome)));
    }

    fn on_radio_ready(&mut self, kind: RadioKind, confirmation: Directive) {
        self.timers.disarm(DispatchTimer::Confirm(kind));
        let settle = self.config.settle(kind);
        info!(
            "[DISPATCH] {} radio confirmed ready, settling for {} ms",
            kind,
            settle.as_millis()
        );
        self.confirmations.insert(kind, confirmation);
        self.timers.arm(DispatchTimer::Settle(kind), settle);
    }

    fn on_settled(&mut self, kind: RadioKind, link: &mut dyn ControlLink) {
        let confirmation = self.confirmations.remove(&kind);

        let mut joined = false;
        let mut waiting = false;
        if let Some(pending) = self.pending.take(kind) {
            debug!(
                "[DISPATCH] Re-validating {} after {} ms",
                pending.directive.kind.action(),
                pending.age_ms()
            );
            let result = self.run_handler(&pending.directive);
            waiting = matches!(result, CommandResult::AwaitRadio { .. });
            joined = self.apply(&pending.directive, result, link, true);
        }

        if waiting || joined {
            return;
        }
        if let Some((name, secret)) = confirmation.as_ref().and_then(|c| c.credentials()) {
            let (name, secret) = (name.to_string(), secret.to_string());
            self.join(&name, &secret);
        }
    }

    fn on_confirm_timeout(&mut self, kind: RadioKind) {
        let pending = self.pending(kind).map(|d| d.kind.action()).unwrap_or("nothing");
        let via = self.requested_via.get(&kind).copied().unwrap_or(RequestChannel::None);
        match kind {
            RadioKind::Control => {
                warn!(
                    "[DISPATCH] Control radio not confirmed in time ({} pending, requested via {:?})",
                    pending, via
                );
                self.prompt
                    .prompt_enable_control_radio("no confirmation for the control radio");
            }
            RadioKind::Data => {
                warn!(
                    "[DISPATCH] Data radio not confirmed in time, {} left pending (requested via {:?})",
                    pending, via
                );
            }
        }
    }

    fn on_radio_off(&mut self, kind: RadioKind) {
        info!("[DISPATCH] {} radio confirmed off", kind);
        self.drop_pending(kind);
        if kind == RadioKind::Data {
            self.last_transition = SecondaryTransition::Left;
        }
    }

    fn drop_pending(&mut self, kind: RadioKind) {
        self.timers.disarm(DispatchTimer::Confirm(kind));
        self.timers.disarm(DispatchTimer::Settle(kind));
        self.confirmations.remove(&kind);
        self.requested_via.remove(&kind);
        if let Some(dropped) = self.pending.take(kind) {
            info!(
                "[DISPATCH] Dropped pending {} for the {} radio",
                dropped.directive.kind.action(),
                kind
            );
        }
    }
}

fn reason_for(directive: &Directive) -> String {
    directive
        .reason
        .clone()
        .unwrap_or_else(|| format!("{} requested", directive.kind.action()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::radio::test_support::{FakeRadioPlane, RecordingPrompt};
    use crate::timer::manual::ManualScheduler;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeLink {
        pub ready: bool,
        pub sent: Vec<Vec<u8>>,
        pub activations: usize,
    }

    impl FakeLink {
        pub fn actions(&self) -> Vec<String> {
            self.sent
                .iter()
                .map(|raw| {
                    let json: serde_json::Value = serde_json::from_slice(raw).unwrap();
                    json["action"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    impl ControlLink for FakeLink {
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn send(&mut self, payload: &[u8]) -> bool {
            if !self.ready {
                return false;
            }
            self.sent.push(payload.to_vec());
            true
        }
        fn activate(&mut self) {
            self.activations += 1;
        }
    }

    #[derive(Default)]
    pub struct FakeFallback {
        pub available: bool,
        pub published: Mutex<Vec<(String, String)>>,
    }

    impl FallbackTransport for FakeFallback {
        fn is_available(&self) -> bool {
            self.available
        }
        fn publish(&self, action: &str, reason: &str) -> bool {
            self.published
                .lock()
                .unwrap()
                .push((action.to_string(), reason.to_string()));
            true
        }
    }

    struct Harness {
        dispatcher: CommandDispatcher<ManualScheduler<DispatchTimer>>,
        scheduler: ManualScheduler<DispatchTimer>,
        radios: Arc<FakeRadioPlane>,
        fallback: Arc<FakeFallback>,
        prompt: Arc<RecordingPrompt>,
        joins: Arc<Mutex<Vec<JoinOutcome>>>,
        link: FakeLink,
    }

    impl Harness {
        fn new(primary: bool, secondary: bool, link_ready: bool, fallback: bool) -> Self {
            let scheduler = ManualScheduler::new();
            let radios = Arc::new(FakeRadioPlane::new(primary, secondary));
            let fallback = Arc::new(FakeFallback {
                available: fallback,
                ..Default::default()
            });
            let prompt = Arc::new(RecordingPrompt::default());
            let joins = Arc::new(Mutex::new(Vec::new()));
            let sink_joins = joins.clone();

            let dispatcher = CommandDispatcher::new(
                DispatchConfig::default(),
                "agent-1".into(),
                radios.clone(),
                Some(fallback.clone()),
                prompt.clone(),
                Arc::new(move |outcome: JoinOutcome| sink_joins.lock().unwrap().push(outcome)),
                scheduler.clone(),
            );

            Self {
                dispatcher,
                scheduler,
                radios,
                fallback,
                prompt,
                joins,
                link: FakeLink {
                    ready: link_ready,
                    ..Default::default()
                },
            }
        }

        fn handle(&mut self, directive: Directive) {
            self.dispatcher.handle(directive, &mut self.link);
        }

        fn fire(&mut self, kind: DispatchTimer) {
            let fired = self
                .scheduler
                .take(kind)
                .unwrap_or_else(|| panic!("{:?} not pending", kind));
            self.dispatcher.on_timer(fired, &mut self.link);
        }

        fn published(&self) -> Vec<String> {
            self.fallback
                .published
                .lock()
                .unwrap()
                .iter()
                .map(|(a, _)| a.clone())
                .collect()
        }
    }

    fn join_directive() -> Directive {
        Directive::new("s-1", DirectiveKind::JoinNetwork).with_network("X", "Y")
    }

    #[test]
    fn test_prepare_control_radio_when_on_activates_link() {
        let mut h = Harness::new(true, false, false, false);
        h.handle(Directive::new("s", DirectiveKind::PrepareControlRadio));
        assert_eq!(h.link.activations, 1);
        assert!(h.dispatcher.pending(RadioKind::Control).is_none());
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[test]
    fn test_fallback_used_exactly_once_when_link_not_ready() {
        let mut h = Harness::new(false, false, false, true);
        h.handle(Directive::new("s", DirectiveKind::PrepareControlRadio));

        assert_eq!(h.published(), vec!["enable_bt".to_string()]);
        assert!(h.link.sent.is_empty());
        assert_eq!(h.prompt.count(), 0);
        assert!(h.dispatcher.pending(RadioKind::Control).is_some());
        assert_eq!(
            h.scheduler.delay_of(DispatchTimer::Confirm(RadioKind::Control)),
            Some(Duration::from_millis(timing::RADIO_CONFIRM_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_fallback_used_exactly_once_for_data_radio() {
        for directive in [
            Directive::new("s", DirectiveKind::EnableDataRadio),
            join_directive(),
        ] {
            let mut h = Harness::new(true, false, false, true);
            h.handle(directive);

            assert_eq!(h.published(), vec!["enable_wifi".to_string()]);
            assert!(h.link.sent.is_empty());
            assert_eq!(h.prompt.count(), 0);
            assert!(h.dispatcher.pending(RadioKind::Data).is_some());
            assert_eq!(
                h.dispatcher.requested_via(RadioKind::Data),
                Some(RequestChannel::Fallback)
            );
        }
    }

    #[test]
    fn test_link_preferred_over_fallback() {
        let mut h = Harness::new(true, false, true, true);
        h.handle(join_directive());
        assert_eq!(h.link.actions(), vec!["enable_wifi".to_string()]);
        assert!(h.published().is_empty());
        assert_eq!(
            h.dispatcher.requested_via(RadioKind::Data),
            Some(RequestChannel::Link)
        );

        let json: serde_json::Value = serde_json::from_slice(&h.link.sent[0]).unwrap();
        assert_eq!(json["sessionId"], "agent-1");
        assert_eq!(json["reason"], "SWITCH_WIFI requested");
    }

    #[test]
    fn test_no_channel_prompts_for_control_radio_only() {
        let mut h = Harness::new(false, false, false, false);
        h.handle(Directive::new("s", DirectiveKind::PrepareControlRadio));
        assert_eq!(h.prompt.count(), 1);

        h.handle(Directive::new("s", DirectiveKind::EnableDataRadio));
        assert_eq!(h.prompt.count(), 1);
        assert!(h.dispatcher.pending(RadioKind::Data).is_some());
    }

    #[test]
    fn test_one_pending_directive_per_radio() {
        let mut h = Harness::new(true, false, true, false);
        h.handle(Directive::new("a", DirectiveKind::EnableDataRadio));
        h.handle(join_directive());

        assert_eq!(h.dispatcher.pending(RadioKind::Data).unwrap().correlation_id, "s-1");
        assert!(h.dispatcher.pending(RadioKind::Control).is_none());
        // Re-arming replaced the first timeout
        assert_eq!(h.scheduler.pending_count(), 1);
    }

    #[test]
    fn test_confirm_timeouts() {
        let mut h = Harness::new(false, false, false, true);
        h.handle(Directive::new("s", DirectiveKind::PrepareControlRadio));
        h.handle(Directive::new("s", DirectiveKind::EnableDataRadio));

        h.fire(DispatchTimer::Confirm(RadioKind::Data));
        assert_eq!(h.prompt.count(), 0);
        assert!(h.dispatcher.pending(RadioKind::Data).is_some());

        h.fire(DispatchTimer::Confirm(RadioKind::Control));
        assert_eq!(h.prompt.count(), 1);
    }

    #[test]
    fn test_ready_confirmation_settles_then_joins_once() {
        let mut h = Harness::new(true, false, true, false);
        h.handle(join_directive());
        assert!(h.radios.joins().is_empty());

        h.radios.set_secondary(true);
        h.handle(Directive::new("s-1", DirectiveKind::DataRadioReady).with_network("X", "Y"));
        assert!(!h.scheduler.is_pending(DispatchTimer::Confirm(RadioKind::Data)));
        assert_eq!(
            h.scheduler.delay_of(DispatchTimer::Settle(RadioKind::Data)),
            Some(Duration::from_millis(timing::DATA_RADIO_SETTLE_MS))
        );
        assert!(h.radios.joins().is_empty());

        h.fire(DispatchTimer::Settle(RadioKind::Data));
        assert_eq!(h.radios.joins(), vec![("X".to_string(), "Y".to_string())]);
        assert!(h.dispatcher.pending(RadioKind::Data).is_none());
        assert_eq!(h.dispatcher.last_transition(), SecondaryTransition::JoinRequested);

        h.radios.complete_join();
        let outcome = h.joins.lock().unwrap().pop().unwrap();
        h.dispatcher.on_network_result(outcome);
        assert_eq!(h.dispatcher.last_transition(), SecondaryTransition::Joined);
        assert_eq!(h.dispatcher.radio_plane_state(), RadioPlaneState::Both);
    }

    #[test]
    fn test_ready_with_credentials_and_nothing_pending() {
        let mut h = Harness::new(true, true, true, false);
        h.handle(Directive::new("s", DirectiveKind::DataRadioReady).with_network("Field", "pw"));
        h.fire(DispatchTimer::Settle(RadioKind::Data));
        assert_eq!(h.radios.joins(), vec![("Field".to_string(), "pw".to_string())]);
    }

    #[test]
    fn test_settle_revalidation_still_off_rearms_without_new_request() {
        let mut h = Harness::new(true, false, true, false);
        h.handle(join_directive());
        assert_eq!(h.link.sent.len(), 1);

        // Confirmation arrives but the radio plane still reports the radio off
        h.handle(Directive::new("s", DirectiveKind::DataRadioReady));
        h.fire(DispatchTimer::Settle(RadioKind::Data));

        assert_eq!(h.link.sent.len(), 1);
        assert!(h.radios.joins().is_empty());
        assert!(h.dispatcher.pending(RadioKind::Data).is_some());
        assert!(h.scheduler.is_pending(DispatchTimer::Confirm(RadioKind::Data)));
    }

    #[test]
    fn test_off_confirmation_drops_pending() {
        let mut h = Harness::new(true, false, true, false);
        h.handle(Directive::new("s", DirectiveKind::EnableDataRadio));
        h.handle(Directive::new("s", DirectiveKind::DataRadioOff));

        assert!(h.dispatcher.pending(RadioKind::Data).is_none());
        assert_eq!(h.scheduler.pending_count(), 0);
    }

    #[test]
    fn test_malformed_join_is_dropped() {
        let mut h = Harness::new(true, true, true, false);
        h.handle(Directive::new("s", DirectiveKind::JoinNetwork));
        assert!(h.radios.joins().is_empty());
        assert!(h.dispatcher.pending(RadioKind::Data).is_none());
        assert!(h.link.sent.is_empty());
    }

    #[test]
    fn test_release_never_disables_control_radio() {
        for primary in [false, true] {
            for secondary in [false, true] {
                for link_ready in [false, true] {
                    let mut h = Harness::new(primary, secondary, link_ready, true);
                    h.handle(Directive::new("a", DirectiveKind::EnableDataRadio));
                    h.handle(Directive::new("r", DirectiveKind::ReleaseAll));

                    let mut actions = h.link.actions();
                    actions.extend(h.published());
                    assert!(actions.iter().all(|a| a != "disable_bt"));
                    assert!(actions
                        .iter()
                        .all(|a| a == "enable_wifi" || a == "disable_wifi"));
                    assert_eq!(
                        actions.iter().filter(|a| *a == "disable_wifi").count(),
                        usize::from(secondary)
                    );
                    assert!(h.dispatcher.pending(RadioKind::Data).is_none());
                    assert_eq!(h.radios.leaves(), 1);
                }
            }
        }
    }

    #[test]
    fn test_radio_plane_state() {
        let mut h = Harness::new(false, true, false, false);
        assert_eq!(h.dispatcher.radio_plane_state(), RadioPlaneState::Idle);

        h.handle(join_directive());
        assert_eq!(h.dispatcher.radio_plane_state(), RadioPlaneState::SecondaryActive);

        h.radios.set_primary(true);
        assert_eq!(h.dispatcher.radio_plane_state(), RadioPlaneState::Both);

        h.handle(Directive::new("r", DirectiveKind::ReleaseAll));
        assert_eq!(h.dispatcher.radio_plane_state(), RadioPlaneState::PrimaryActive);
    }
}
