//! Neighbor liveness.
//!
//! Every rover heard directly gets a timer that is pushed back each time one
//! of its advertisements arrives.  If a neighbor stays silent for the whole
//! timeout, [`Liveness::expire`] hands it back to the router, which poisons
//! every route through it and advertises immediately.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::addr::RoverId;
use crate::timer::{Expired, Timers};

/// A neighbor whose liveness timer ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Silent {
    pub rover_id: RoverId,
    pub addr: Ipv4Addr,
}

/// One liveness timer per neighbor interface address.
pub struct Liveness {
    timeout: Duration,
    timers: Timers<Ipv4Addr>,
    neighbors: HashMap<Ipv4Addr, RoverId>,
}

impl Liveness {
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<Expired<Ipv4Addr>>) {
        let (timers, expired) = Timers::new();
        let liveness = Self {
            timeout,
            timers,
            neighbors: HashMap::new(),
        };
        (liveness, expired)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Restart the neighbor's timer from now.
    pub fn touch(&mut self, addr: Ipv4Addr, rover_id: RoverId) {
        self.neighbors.insert(addr, rover_id);
        self.timers.arm(addr, self.timeout);
    }

    /// Resolve an expiry event.
    ///
    /// Returns the neighbor that went silent, or `None` for a stale event
    /// (the neighbor was heard from again after the timer fired).
    pub fn expire(&mut self, expired: &Expired<Ipv4Addr>) -> Option<Silent> {
        if !self.timers.claim(expired) {
            return None;
        }
        self.neighbors.get(&expired.key).map(|&rover_id| Silent {
            rover_id,
            addr: expired.key,
        })
    }

    /// Stop tracking a neighbor without poisoning it.
    pub fn forget(&mut self, addr: Ipv4Addr) {
        self.timers.cancel(&addr);
        self.neighbors.remove(&addr);
    }

    /// Neighbors whose timer is currently running.
    pub fn live_neighbors(&self) -> impl Iterator<Item = (Ipv4Addr, RoverId)> + '_ {
        self.neighbors
            .iter()
            .filter(|(addr, _)| self.timers.is_armed(addr))
            .map(|(&addr, &id)| (addr, id))
    }
}
