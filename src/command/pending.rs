//! Directives waiting for a radio confirmation

use fieldlink_shared::{now_ms, Directive, RadioKind};
use std::collections::HashMap;

/// A directive parked until its radio is confirmed ready
#[derive(Debug, Clone)]
pub struct PendingDirective {
    pub directive: Directive,
    pub stored_at_ms: u64,
}

impl PendingDirective {
    pub fn age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.stored_at_ms)
    }
}

/// At most one pending directive per radio kind; a newer one replaces the older
#[derive(Debug, Default)]
pub struct PendingDirectives {
    slots: HashMap<RadioKind, PendingDirective>,
}

impl PendingDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a directive, returning the one it replaced
    pub fn store(&mut self, kind: RadioKind, directive: Directive) -> Option<Directive> {
        let entry = PendingDirective {
            directive,
            stored_at_ms: now_ms(),
        };
        self.slots.insert(kind, entry).map(|old| old.directive)
    }

    pub fn get(&self, kind: RadioKind) -> Option<&PendingDirective> {
        self.slots.get(&kind)
    }

    pub fn take(&mut self, kind: RadioKind) -> Option<PendingDirective> {
        self.slots.remove(&kind)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
