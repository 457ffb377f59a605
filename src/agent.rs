//! Agent event loop
//!
//! A single task owns the link session manager and the command dispatcher.
//! Radio-stack callbacks, timer expirations, fallback directives and network
//! join results all arrive as `AgentEvent`s on one channel and are processed
//! to completion, one at a time.

use crate::command::{CommandDispatcher, DispatchTimer, RadioPlaneState};
use crate::connection::{InboundMessage, LinkSessionManager, LinkTimer};
use crate::radio::JoinOutcome;
use crate::timer::{EventSink, Fired, Scheduler};
use crate::transport::{RadioEvent, RadioStack};
use bluer::Address;
use bytes::Bytes;
use fieldlink_shared::{Directive, LinkState};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Messages queued while the link is down are capped
const OUTBOX_CAPACITY: usize = 32;

/// Everything the agent loop reacts to
#[derive(Debug)]
pub enum AgentEvent {
    Radio(RadioEvent),
    LinkTimer(Fired<LinkTimer>),
    DispatchTimer(Fired<DispatchTimer>),
    /// Directive received over the fallback transport
    Fallback(Directive),
    NetworkResult(JoinOutcome),
    /// Raw message to send to the peer once the link is ready
    Outbound(Bytes),
    Shutdown,
}

/// Build a sink that wraps values into agent events
pub fn sink<T: 'static>(
    tx: &mpsc::UnboundedSender<AgentEvent>,
    wrap: fn(T) -> AgentEvent,
) -> EventSink<T> {
    let tx = tx.clone();
    Arc::new(move |value: T| {
        let _ = tx.send(wrap(value));
    })
}

pub struct Agent<S, T, D> {
    link: LinkSessionManager<S, T>,
    dispatcher: CommandDispatcher<D>,
    outbox: VecDeque<Bytes>,
    sent_notify: Option<EventSink<usize>>,
    last_state: LinkState,
    last_plane: RadioPlaneState,
}

impl<S, T, D> Agent<S, T, D>
where
    S: RadioStack,
    T: Scheduler<LinkTimer>,
    D: Scheduler<DispatchTimer>,
{
    pub fn new(link: LinkSessionManager<S, T>, dispatcher: CommandDispatcher<D>) -> Self {
        let last_state = link.state();
        let last_plane = dispatcher.radio_plane_state();
        Self {
            link,
            dispatcher,
            outbox: VecDeque::new(),
            sent_notify: None,
            last_state,
            last_plane,
        }
    }

    /// Called with the byte count of every outbound message handed to the link
    pub fn set_send_notifier(&mut self, notify: EventSink<usize>) {
        self.sent_notify = Some(notify);
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.link.set_auto_reconnect(enabled);
    }

    pub fn link(&self) -> &LinkSessionManager<S, T> {
        &self.link
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<D> {
        &self.dispatcher
    }

    /// Begin: connect straight to `direct`, or scan for the peer
    pub fn start(&mut self, direct: Option<Address>) {
        match direct {
            Some(address) => self.link.connect_to_fixed_peer(address),
            None => self.link.discover_and_connect(),
        }
        self.after_event();
    }

    /// Process one event to completion; false once shut down
    pub fn route(&mut self, event: AgentEvent) -> bool {
        match event {
            AgentEvent::Radio(event) => {
                if let Some(message) = self.link.handle_event(event) {
                    self.on_inbound(message);
                }
            }
            AgentEvent::LinkTimer(fired) => self.link.on_timer(fired),
            AgentEvent::DispatchTimer(fired) => self.dispatcher.on_timer(fired, &mut self.link),
            AgentEvent::Fallback(directive) => {
                info!("[MAIN] Directive via fallback");
                self.dispatcher.handle(directive, &mut self.link);
            }
            AgentEvent::NetworkResult(outcome) => self.dispatcher.on_network_result(outcome),
            AgentEvent::Outbound(payload) => self.queue_outbound(payload),
            AgentEvent::Shutdown => {
                info!("[MAIN] Shutting down");
                self.link.teardown_everything();
                return false;
            }
        }
        self.after_event();
        true
    }

    /// Drive the agent until shutdown or until every sender is gone
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AgentEvent>) -> Self {
        while let Some(event) = rx.recv().await {
            if !self.route(event) {
                break;
            }
        }
        info!("[MAIN] Agent loop stopped");
        self
    }

    pub fn into_link(self) -> LinkSessionManager<S, T> {
        self.link
    }

    fn on_inbound(&mut self, message: InboundMessage) {
        match Directive::parse(&message.payload) {
            Ok(directive) => {
                info!("[MAIN] {}", inbound_summary(&message, &directive));
                self.dispatcher.handle(directive, &mut self.link);
            }
            Err(e) => warn!(
                "[MAIN] Dropping {} byte message on {}: {}",
                message.payload.len(),
                message.endpoint,
                e
            ),
        }
    }

    fn queue_outbound(&mut self, payload: Bytes) {
        if self.outbox.len() >= OUTBOX_CAPACITY {
            warn!("[MAIN] Outbox full, dropping oldest message");
            self.outbox.pop_front();
        }
        self.outbox.push_back(payload);
        self.flush_outbox();
    }

    fn flush_outbox(&mut self) {
        if self.link.state() != LinkState::Ready {
            debug!("[MAIN] {} message(s) waiting for the link", self.outbox.len());
            return;
        }
        while let Some(payload) = self.outbox.pop_front() {
            if !self.link.send(&payload) {
                self.outbox.push_front(payload);
                break;
            }
            if let Some(notify) = &self.sent_notify {
                notify(payload.len());
            }
        }
    }

    fn after_event(&mut self) {
        let state = self.link.state();
        if state != self.last_state {
            self.last_state = state;
            if state == LinkState::Ready && !self.outbox.is_empty() {
                self.flush_outbox();
            }
        }

        let plane = self.dispatcher.radio_plane_state();
        if plane != self.last_plane {
            info!("[MAIN] Radio plane {} -> {}", self.last_plane, plane);
            self.last_plane = plane;
        }
    }
}

/// Log line for an inbound directive; never includes the raw payload
fn inbound_summary(message: &InboundMessage, directive: &Directive) -> String {
    format!(
        "Received {} bytes on {}: {:?}",
        message.payload.len(),
        message.endpoint,
        directive
    )
}
