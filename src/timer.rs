//! Cancellable deferred callbacks
//!
//! Settle delays, retry backoff and directive timeouts are never awaited
//! inline. A component arms a timer of some kind; when it expires, a
//! `Fired` event is pushed into the agent event loop and handed back to the
//! component. Each kind has at most one armed timer: arming again cancels the
//! previous one, and a `Fired` whose token is no longer armed is ignored, so
//! a stale timer cannot act on superseded state.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Callback used by radio stacks, transports and timers to feed the event loop
pub type EventSink<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Identifies one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// A timer expiration delivered back to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired<K> {
    pub kind: K,
    pub token: TimerToken,
}

/// Backend that delivers a `Fired` event after a delay
pub trait Scheduler<K>: Send {
    fn schedule(&mut self, kind: K, delay: Duration) -> TimerToken;
    fn cancel(&mut self, token: TimerToken);
}

/// One armed timer per kind on top of a scheduler
pub struct Timers<K, S> {
    scheduler: S,
    armed: HashMap<K, TimerToken>,
}

impl<K, S> Timers<K, S>
where
    K: Copy + Eq + Hash + Debug,
    S: Scheduler<K>,
{
    pub fn new(scheduler: S) -> Self {
        Self {
            scheduler,
            armed: HashMap::new(),
        }
    }

    /// Arm a timer, cancelling any timer of the same kind first
    pub fn arm(&mut self, kind: K, delay: Duration) {
        self.disarm(kind);
        let token = self.scheduler.schedule(kind, delay);
        self.armed.insert(kind, token);
    }

    /// Cancel the timer of this kind, if armed
    pub fn disarm(&mut self, kind: K) -> bool {
        match self.armed.remove(&kind) {
            Some(token) => {
                self.scheduler.cancel(token);
                true
            }
            None => false,
        }
    }

    /// Cancel every armed timer
    pub fn disarm_all(&mut self) {
        for (_, token) in self.armed.drain() {
            self.scheduler.cancel(token);
        }
    }

    /// Consume an expiration; false if it belongs to a cancelled or replaced timer
    pub fn accept(&mut self, fired: &Fired<K>) -> bool {
        if self.armed.get(&fired.kind) == Some(&fired.token) {
            self.armed.remove(&fired.kind);
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self, kind: K) -> bool {
        self.armed.contains_key(&kind)
    }
}

/// Scheduler backed by one sleeping tokio task per timer
pub struct TokioScheduler<K> {
    sink: EventSink<Fired<K>>,
    tasks: HashMap<TimerToken, JoinHandle<()>>,
    next_token: u64,
}

impl<K> TokioScheduler<K> {
    pub fn new(sink: EventSink<Fired<K>>) -> Self {
        Self {
            sink,
            tasks: HashMap::new(),
            next_token: 0,
        }
    }
}

impl<K: Send + 'static> Scheduler<K> for TokioScheduler<K> {
    fn schedule(&mut self, kind: K, delay: Duration) -> TimerToken {
        self.tasks.retain(|_, handle| !handle.is_finished());

        self.next_token += 1;
        let token = TimerToken(self.next_token);
        let sink = self.sink.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink(Fired { kind, token });
        });
        self.tasks.insert(token, handle);

        token
    }

    fn cancel(&mut self, token: TimerToken) {
        if let Some(handle) = self.tasks.remove(&token) {
            handle.abort();
        }
    }
}

impl<K> Drop for TokioScheduler<K> {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::manual::ManualScheduler;
    use super::*;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Settle,
        Retry,
    }

    #[test]
    fn test_rearm_cancels_previous() {
        let scheduler = ManualScheduler::new();
        let mut timers = Timers::new(scheduler.clone());

        timers.arm(Kind::Settle, Duration::from_millis(100));
        let stale = scheduler.take(Kind::Settle).unwrap();

        timers.arm(Kind::Settle, Duration::from_millis(200));
        assert_eq!(scheduler.pending_count(), 1);

        // The first expiration raced the re-arm and must be ignored
        assert!(!timers.accept(&stale));
        let fresh = scheduler.take(Kind::Settle).unwrap();
        assert!(timers.accept(&fresh));
        assert!(!timers.is_armed(Kind::Settle));
    }

    #[test]
    fn test_disarm_all() {
        let scheduler = ManualScheduler::new();
        let mut timers = Timers::new(scheduler.clone());

        timers.arm(Kind::Settle, Duration::from_millis(100));
        timers.arm(Kind::Retry, Duration::from_millis(100));
        assert_eq!(scheduler.pending_count(), 2);

        timers.disarm_all();
        assert_eq!(scheduler.pending_count(), 0);
        assert!(!timers.disarm(Kind::Retry));
    }

    #[tokio::test]
    async fn test_tokio_scheduler_fires_and_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Fired<Kind>>();
        let sink: EventSink<Fired<Kind>> = Arc::new(move |fired| {
            let _ = tx.send(fired);
        });
        let mut timers = Timers::new(TokioScheduler::new(sink));

        timers.arm(Kind::Retry, Duration::from_millis(5));
        timers.arm(Kind::Settle, Duration::from_secs(60));
        timers.disarm(Kind::Settle);

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer did not fire")
            .expect("sink closed");
        assert_eq!(fired.kind, Kind::Retry);
        assert!(timers.accept(&fired));

        // The cancelled timer never arrives
        let nothing = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(nothing.is_err());
    }
}
