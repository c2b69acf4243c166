//! Distance-vector relaxation over the shared routing table.
//!
//! [`DistanceVector`] owns the rules that keep the [`RoutingTable`]
//! consistent with what neighbors advertise.  It performs no I/O and keeps
//! no timers: the [`crate::router`] feeds it received advertisements and
//! liveness expiries and sends an advertisement whenever an operation
//! reports a change.
//!
//! # Relaxation rules
//!
//! For every advertised `(destination, next_hop, cost)` with `destination`
//! other than ourselves, where `sender` is the interface address the
//! advertisement arrived from and `new = min(cost + 1, INFINITY)`:
//!
//! 1. `next_hop` is our own interface address → discard (split horizon
//!    with poisoned reverse: never accept a route that leads back through us).
//! 2. unknown destination → add it via `sender` at `new`.
//! 3. `new < current` → switch to `sender` at `new`.
//! 4. `sender` is the current next hop and `new != current` → take `new`,
//!    even if it is worse.
//! 5. otherwise → ignore.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::addr::{self, RoverId, DEFAULT_MASK};
use crate::advert::Advertisement;
use crate::table::{RoutingEntry, RoutingTable, INFINITY};

/// Routing engine of one rover.
#[derive(Debug, Clone)]
pub struct DistanceVector {
    rover_id: RoverId,
    /// Interface address neighbors use as our next hop.
    local_addr: Ipv4Addr,
    table: Arc<RoutingTable>,
}

impl DistanceVector {
    pub fn new(rover_id: RoverId, local_addr: Ipv4Addr) -> Self {
        Self {
            rover_id,
            local_addr,
            table: Arc::new(RoutingTable::new(addr::private_addr(rover_id))),
        }
    }

    pub fn rover_id(&self) -> RoverId {
        self.rover_id
    }

    pub fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    /// Shared handle on the table for read-only users such as the transport.
    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Record that `sender_id` was heard directly from `sender_addr`.
    ///
    /// The neighbor is one hop away through itself.  Returns `true` if the
    /// table changed.
    pub fn on_direct_neighbor(&self, sender_id: RoverId, sender_addr: Ipv4Addr) -> bool {
        if sender_id == self.rover_id {
            return false;
        }
        let destination = addr::private_addr(sender_id);
        self.table.update(|routes| match routes.get_mut(destination) {
            Some(entry) if entry.cost == 1 => false,
            Some(entry) => {
                entry.cost = 1;
                entry.next_hop = sender_addr;
                true
            }
            None => {
                routes.insert(RoutingEntry::new(destination, DEFAULT_MASK, sender_addr, 1));
                true
            }
        })
    }

    /// Relax the table against `entries` advertised by the rover at
    /// `sender_addr`.  Returns `true` if any entry changed.
    pub fn on_advertisement(&self, sender_addr: Ipv4Addr, entries: &[RoutingEntry]) -> bool {
        let local = self.table.local();
        self.table.update(|routes| {
            let mut changed = false;
            for adv in entries.iter().filter(|e| e.destination != local) {
                if adv.next_hop == self.local_addr {
                    continue;
                }
                let cost = adv.cost.saturating_add(1).min(INFINITY);

                let Some(entry) = routes.get_mut(adv.destination) else {
                    routes.insert(RoutingEntry::new(adv.destination, adv.mask, sender_addr, cost));
                    changed = true;
                    continue;
                };

                if cost < entry.cost {
                    entry.cost = cost;
                    entry.next_hop = sender_addr;
                    changed = true;
                } else if entry.next_hop == sender_addr && entry.cost != cost {
                    entry.cost = cost;
                    changed = true;
                }
            }
            changed
        })
    }

    /// Poison a neighbor that stopped advertising: its own entry and every
    /// route through it go to [`INFINITY`].  Returns how many entries changed.
    pub fn on_neighbor_timeout(&self, neighbor_id: RoverId, neighbor_addr: Ipv4Addr) -> usize {
        let destination = addr::private_addr(neighbor_id);
        self.table
            .poison(|e| e.destination == destination || e.next_hop == neighbor_addr)
    }

    /// Current table as an advertisement from this rover.
    pub fn advertisement(&self) -> Advertisement {
        Advertisement::new(self.rover_id, self.table.snapshot())
    }

    /// Route towards `destination`, if any (reachable or not).
    pub fn lookup_next_hop(&self, destination: Ipv4Addr) -> Option<RoutingEntry> {
        self.table.lookup(destination)
    }
}
