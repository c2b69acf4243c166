//! The routing table shared by the router and the transport.
//!
//! [`RoutingTable`] is the only state shared across tasks.  Every mutation
//! and every forwarding lookup goes through its mutex, so advertisement
//! processing, liveness poisoning and next-hop resolution never interleave.
//!
//! Entries are never removed.  A destination that becomes unreachable stays
//! in the table at [`INFINITY`] so that neighbors hear about it.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Hop count meaning "unreachable".
pub const INFINITY: u8 = 16;

/// Reachability of one destination network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingEntry {
    /// Private address of the destination rover (`10.0.<id>.0`).
    pub destination: Ipv4Addr,
    /// Prefix length.
    pub mask: u8,
    /// Interface address of the adjacent rover traffic is forwarded through.
    pub next_hop: Ipv4Addr,
    /// Hop count, `1..=INFINITY`.
    pub cost: u8,
}

impl RoutingEntry {
    pub fn new(destination: Ipv4Addr, mask: u8, next_hop: Ipv4Addr, cost: u8) -> Self {
        Self {
            destination,
            mask,
            next_hop,
            cost: cost.min(INFINITY),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.cost < INFINITY
    }
}

// ---------------------------------------------------------------------------
// Routes (the data behind the lock)
// ---------------------------------------------------------------------------

/// Entries keyed by destination.  Only reachable through
/// [`RoutingTable::update`], i.e. while the table lock is held.
#[derive(Debug, Default)]
pub struct Routes {
    map: BTreeMap<Ipv4Addr, RoutingEntry>,
}

impl Routes {
    pub fn get(&self, destination: Ipv4Addr) -> Option<&RoutingEntry> {
        self.map.get(&destination)
    }

    pub fn get_mut(&mut self, destination: Ipv4Addr) -> Option<&mut RoutingEntry> {
        self.map.get_mut(&destination)
    }

    pub fn insert(&mut self, entry: RoutingEntry) {
        self.map.insert(entry.destination, entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.map.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RoutingEntry> {
        self.map.values_mut()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RoutingTable
// ---------------------------------------------------------------------------

/// Thread-safe routing table owned by one rover.
#[derive(Debug)]
pub struct RoutingTable {
    /// Private address of the owning rover; never stored as a destination.
    local: Ipv4Addr,
    routes: Mutex<Routes>,
}

impl RoutingTable {
    pub fn new(local: Ipv4Addr) -> Self {
        Self {
            local,
            routes: Mutex::new(Routes::default()),
        }
    }

    /// Private address of the rover that owns this table.
    pub fn local(&self) -> Ipv4Addr {
        self.local
    }

    // A panic while the lock was held cannot leave an entry half-written
    // (every field is Copy), so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` as one critical section over the routes.
    pub fn update<R>(&self, f: impl FnOnce(&mut Routes) -> R) -> R {
        f(&mut self.lock())
    }

    /// Exact-match lookup.
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<RoutingEntry> {
        self.lock().get(destination).copied()
    }

    /// Insert or replace the entry for `entry.destination`.
    ///
    /// Returns `true` if the table changed.  Routes to the local rover are
    /// refused.
    pub fn upsert(&self, entry: RoutingEntry) -> bool {
        if entry.destination == self.local {
            return false;
        }
        let mut routes = self.lock();
        if routes.get(entry.destination) == Some(&entry) {
            return false;
        }
        routes.insert(entry);
        true
    }

    /// Set every entry matching `pred` to [`INFINITY`].
    ///
    /// Returns the number of entries whose cost actually changed.
    pub fn poison(&self, mut pred: impl FnMut(&RoutingEntry) -> bool) -> usize {
        let mut routes = self.lock();
        let mut changed = 0;
        for entry in routes.iter_mut().filter(|e| pred(e)) {
            if entry.cost != INFINITY {
                entry.cost = INFINITY;
                changed += 1;
            }
        }
        changed
    }

    /// Copy of every entry, ordered by destination.
    pub fn snapshot(&self) -> Vec<RoutingEntry> {
        self.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<18} {:<16} {}", "Address", "NextHop", "Cost")?;
        for e in self.snapshot() {
            let dest = format!("{}/{}", e.destination, e.mask);
            writeln!(f, "{:<18} {:<16} {}", dest, e.next_hop.to_string(), e.cost)?;
        }
        Ok(())
    }
}
