//! Keyed one-shot timers with cancel-and-replace semantics.
//!
//! Both neighbor liveness and packet retransmission need "one timer per
//! entity": arming a key that is already armed replaces the old deadline,
//! and cancelling must win against a timer that is firing at the same
//! moment.
//!
//! [`Timers`] gives every arm a fresh generation number.  A sleeping task per
//! armed key sends an [`Expired`] event carrying that generation into the
//! owner's channel.  The owner calls [`Timers::claim`] before acting on the
//! event; a cancelled or re-armed key no longer has a matching generation,
//! so late events are discarded.  Because the owner both cancels and claims
//! on the same task, a timer can never act after its entity was cancelled.
//!
//! ```ignore
//! let (mut timers, mut expired) = Timers::new();
//! timers.arm(seq, rto);
//! loop {
//!     tokio::select! {
//!         Some(e) = expired.recv() => if timers.claim(&e) { resend(e.key) },
//!         ack = acks.recv() => { timers.cancel(&ack_seq); }
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Event delivered when an armed timer's deadline passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired<K> {
    pub key: K,
    generation: u64,
}

struct Armed {
    generation: u64,
    task: JoinHandle<()>,
}

/// A set of one-shot timers, one per key.
pub struct Timers<K> {
    armed: HashMap<K, Armed>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<Expired<K>>,
}

impl<K> Timers<K>
where
    K: Hash + Eq + Clone + Send + 'static,
{
    /// Create an empty timer set and the channel its expiries arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expired<K>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timers = Self {
            armed: HashMap::new(),
            next_generation: 0,
            tx,
        };
        (timers, rx)
    }

    /// Arm `key` to expire after `after`, replacing any pending timer for it.
    pub fn arm(&mut self, key: K, after: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let event = Expired {
            key: key.clone(),
            generation,
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // The receiver is gone only when the owner shut down.
            let _ = tx.send(event);
        });
        if let Some(old) = self.armed.insert(key, Armed { generation, task }) {
            old.task.abort();
        }
    }

    /// Cancel the timer for `key`.  Returns `true` if one was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.armed.remove(key) {
            Some(armed) => {
                armed.task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.task.abort();
        }
    }

    /// Accept an expiry event.
    ///
    /// Returns `true` (and disarms the key) only if the event belongs to the
    /// key's current arming.  Stale events from cancelled or replaced timers
    /// return `false`.
    pub fn claim(&mut self, expired: &Expired<K>) -> bool {
        match self.armed.get(&expired.key) {
            Some(armed) if armed.generation == expired.generation => {
                self.armed.remove(&expired.key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.armed.contains_key(key)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl<K> Drop for Timers<K> {
    fn drop(&mut self) {
        for armed in self.armed.values() {
            armed.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_once() {
        let (mut timers, mut rx) = Timers::new();
        timers.arm("a", TICK);
        assert!(timers.is_armed(&"a"));

        let e = rx.recv().await.unwrap();
        assert_eq!(e.key, "a");
        assert!(timers.claim(&e));
        assert!(!timers.claim(&e), "second claim of the same event fails");
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (mut timers, mut rx) = Timers::new();
        timers.arm(1u32, TICK);
        assert!(timers.cancel(&1));
        assert!(!timers.cancel(&1));

        tokio::time::sleep(TICK * 5).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_deadline() {
        let (mut timers, mut rx) = Timers::new();
        let start = tokio::time::Instant::now();
        timers.arm(7u32, TICK);
        tokio::time::sleep(TICK / 2).await;
        timers.arm(7u32, TICK);

        let e = rx.recv().await.unwrap();
        assert!(timers.claim(&e));
        assert!(start.elapsed() >= TICK + TICK / 2);
        assert_eq!(timers.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_event_is_not_claimed() {
        let (mut timers, mut rx) = Timers::new();
        timers.arm(3u32, TICK);
        let stale = rx.recv().await.unwrap();

        // Re-armed before the owner got round to the first expiry.
        timers.arm(3u32, TICK);
        assert!(!timers.claim(&stale));
        assert!(timers.is_armed(&3));

        let fresh = rx.recv().await.unwrap();
        assert!(timers.claim(&fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn independent_keys_fire_independently() {
        let (mut timers, mut rx) = Timers::new();
        timers.arm(1u32, TICK);
        timers.arm(2u32, TICK * 2);
        timers.cancel(&1);

        let e = rx.recv().await.unwrap();
        assert_eq!(e.key, 2);
        assert!(timers.claim(&e));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_everything() {
        let (mut timers, mut rx) = Timers::new();
        for k in 0..4u32 {
            timers.arm(k, TICK);
        }
        timers.cancel_all();
        assert!(timers.is_empty());
        tokio::time::sleep(TICK * 3).await;
        assert!(rx.try_recv().is_err());
    }
}
