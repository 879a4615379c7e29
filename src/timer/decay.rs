//! Linger countdowns that revert channels to their quiescent state
//!
//! Every slot holds at most one pending countdown. A countdown is a
//! spawned task that sleeps for the full duration and then reports back
//! over a channel; the owner applies the transition after `claim`
//! confirms the expiry is still current.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Identifies one independent countdown
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    Voice,
    Mouse,
    /// One slot per movement key
    Key(String),
}

impl std::fmt::Display for TimerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerSlot::Voice => write!(f, "voice"),
            TimerSlot::Mouse => write!(f, "mouse"),
            TimerSlot::Key(code) => write!(f, "key:{}", code),
        }
    }
}

/// Reported when a countdown runs to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub slot: TimerSlot,
    pub generation: u64,
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owns every pending countdown
pub struct DecayTimers {
    slots: HashMap<TimerSlot, Armed>,
    next_generation: u64,
    expired_tx: mpsc::UnboundedSender<Expired>,
}

impl DecayTimers {
    /// Create the manager together with the receiver for expiries
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expired>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let timers = Self {
            slots: HashMap::new(),
            next_generation: 0,
            expired_tx,
        };
        (timers, expired_rx)
    }

    /// Start a countdown, replacing any pending one in the same slot
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, slot: TimerSlot, after: Duration) {
        self.cancel(&slot);

        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.expired_tx.clone();
        let expired = Expired {
            slot: slot.clone(),
            generation,
        };

        let deadline = Instant::now() + after;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(expired);
        });

        debug!(%slot, generation, after_ms = after.as_millis() as u64, "decay armed");
        self.slots.insert(slot, Armed { generation, handle });
    }

    /// Cancel the pending countdown of a slot, if any
    pub fn cancel(&mut self, slot: &TimerSlot) -> bool {
        match self.slots.remove(slot) {
            Some(armed) => {
                armed.handle.abort();
                debug!(%slot, generation = armed.generation, "decay cancelled");
                true
            }
            None => false,
        }
    }

    /// Accept an expiry if it belongs to the countdown currently armed
    ///
    /// An expiry that was already queued when its slot got cancelled or
    /// re-armed carries an outdated generation and is rejected.
    pub fn claim(&mut self, expired: &Expired) -> bool {
        match self.slots.get(&expired.slot) {
            Some(armed) if armed.generation == expired.generation => {
                self.slots.remove(&expired.slot);
                true
            }
            _ => {
                debug!(
                    slot = %expired.slot,
                    generation = expired.generation,
                    "stale expiry ignored"
                );
                false
            }
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, slot: &TimerSlot) -> bool {
        self.slots.contains_key(slot)
    }

    /// Number of pending countdowns
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for DecayTimers {
    fn drop(&mut self) {
        for (_, armed) in self.slots.drain() {
            armed.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_after_full_duration() {
        let (mut timers, mut rx) = DecayTimers::new();
        timers.arm(TimerSlot::Mouse, Duration::from_millis(150));

        tokio::time::sleep(Duration::from_millis(149)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let expired = rx.try_recv().unwrap();
        assert_eq!(expired.slot, TimerSlot::Mouse);
        assert!(timers.claim(&expired));
        assert!(!timers.is_armed(&TimerSlot::Mouse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_restarts_full_duration() {
        let (mut timers, mut rx) = DecayTimers::new();
        timers.arm(TimerSlot::Voice, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(80)).await;
        timers.arm(TimerSlot::Voice, Duration::from_millis(100));

        // the first countdown would have fired at 100ms
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let expired = rx.try_recv().unwrap();
        assert!(timers.claim(&expired));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry() {
        let (mut timers, mut rx) = DecayTimers::new();
        let slot = TimerSlot::Key("KeyW".to_string());
        timers.arm(slot.clone(), Duration::from_millis(50));
        assert!(timers.cancel(&slot));
        assert!(!timers.cancel(&slot));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test]
    async fn test_stale_generation_rejected() {
        let (mut timers, _rx) = DecayTimers::new();
        timers.arm(TimerSlot::Mouse, Duration::from_secs(60));
        timers.arm(TimerSlot::Mouse, Duration::from_secs(60));

        let stale = Expired {
            slot: TimerSlot::Mouse,
            generation: 1,
        };
        assert!(!timers.claim(&stale));
        assert!(timers.is_armed(&TimerSlot::Mouse));

        let current = Expired {
            slot: TimerSlot::Mouse,
            generation: 2,
        };
        assert!(timers.claim(&current));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_slots_are_independent() {
        let (mut timers, mut rx) = DecayTimers::new();
        timers.arm(TimerSlot::Key("KeyA".into()), Duration::from_millis(10));
        timers.arm(TimerSlot::Key("KeyD".into()), Duration::from_millis(30));
        timers.cancel(&TimerSlot::Key("KeyA".into()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let expired = rx.try_recv().unwrap();
        assert_eq!(expired.slot, TimerSlot::Key("KeyD".into()));
        assert!(rx.try_recv().is_err());
    }
}
