//! In-memory datagram network for deterministic testing.
//!
//! Real rover networks drop, reorder, and duplicate packets, and rovers drive
//! out of range of each other.  [`SimNetwork`] lets tests build such a
//! network inside one process: every [`SimSocket`] bound on it implements
//! [`DatagramLink`], so routers and transports run unchanged on top of it.
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.    |
//! | Duplication      | Deliver a datagram twice.                        |
//! | Reordering       | Delay a datagram by `reorder_delay`, letting     |
//! |                  | later datagrams overtake it.                     |
//! | Isolation        | Drop everything to and from one address.         |
//! | Severed link     | Drop everything between two addresses.           |
//!
//! Faults are drawn from a seeded [`StdRng`], so a failing test replays the
//! same way every time.  Multicast groups are plain member lists: a datagram
//! sent to a group address reaches every joined socket, the sender's own
//! included (like `IP_MULTICAST_LOOP`).

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::DatagramLink;

type Datagram = (Vec<u8>, SocketAddrV4);

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered datagram arrives twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is held back by `reorder_delay`.
    pub reorder_rate: f64,
    pub reorder_delay: Duration,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            seed: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

struct SimInner {
    config: SimulatorConfig,
    rng: StdRng,
    endpoints: HashMap<SocketAddrV4, mpsc::UnboundedSender<Datagram>>,
    groups: HashMap<SocketAddrV4, HashSet<SocketAddrV4>>,
    isolated: HashSet<Ipv4Addr>,
    severed: HashSet<(Ipv4Addr, Ipv4Addr)>,
    stats: SimStats,
}

impl SimInner {
    fn blocked(&self, from: Ipv4Addr, to: Ipv4Addr) -> bool {
        self.isolated.contains(&from)
            || self.isolated.contains(&to)
            || self.severed.contains(&pair(from, to))
    }

    fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random_bool(p.min(1.0))
    }

    fn recipients(&self, dest: SocketAddrV4) -> Vec<SocketAddrV4> {
        if dest.ip().is_multicast() {
            self.groups
                .get(&dest)
                .map(|members| members.iter().copied().collect())
                .unwrap_or_default()
        } else if self.endpoints.contains_key(&dest) {
            vec![dest]
        } else {
            Vec::new()
        }
    }
}

fn pair(a: Ipv4Addr, b: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shared handle on one simulated network segment.
#[derive(Clone)]
pub struct SimNetwork {
    inner: Arc<Mutex<SimInner>>,
}

impl SimNetwork {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner: Arc::new(Mutex::new(SimInner {
                config,
                rng,
                endpoints: HashMap::new(),
                groups: HashMap::new(),
                isolated: HashSet::new(),
                severed: HashSet::new(),
                stats: SimStats::default(),
            })),
        }
    }

    /// A network that never loses, duplicates or reorders anything.
    pub fn perfect() -> Self {
        Self::new(SimulatorConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a socket at `addr`.  Fails with `AddrInUse` if it is taken.
    pub fn bind(&self, addr: SocketAddrV4) -> io::Result<SimSocket> {
        let mut inner = self.lock();
        if inner.endpoints.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} already bound"),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.endpoints.insert(addr, tx);
        Ok(SimSocket {
            addr,
            net: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Bind a socket at `addr` that also receives everything sent to `group`.
    pub fn bind_multicast(&self, addr: SocketAddrV4, group: SocketAddrV4) -> io::Result<SimSocket> {
        let socket = self.bind(addr)?;
        self.lock().groups.entry(group).or_default().insert(addr);
        Ok(socket)
    }

    /// Cut `ip` off from everyone (the rover drove out of range).
    pub fn isolate(&self, ip: Ipv4Addr) {
        log::info!("[sim] isolating {ip}");
        self.lock().isolated.insert(ip);
    }

    pub fn reconnect(&self, ip: Ipv4Addr) {
        log::info!("[sim] reconnecting {ip}");
        self.lock().isolated.remove(&ip);
    }

    /// Drop all traffic between `a` and `b` in both directions.
    pub fn sever(&self, a: Ipv4Addr, b: Ipv4Addr) {
        self.lock().severed.insert(pair(a, b));
    }

    pub fn heal(&self, a: Ipv4Addr, b: Ipv4Addr) {
        self.lock().severed.remove(&pair(a, b));
    }

    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    fn deliver(&self, buf: &[u8], from: SocketAddrV4, dest: SocketAddrV4) {
        let mut inner = self.lock();
        let reorder_delay = inner.config.reorder_delay;
        for to in inner.recipients(dest) {
            if inner.blocked(*from.ip(), *to.ip()) {
                inner.stats.dropped += 1;
                continue;
            }
            let (loss, dup, reorder) = (
                inner.config.loss_rate,
                inner.config.duplicate_rate,
                inner.config.reorder_rate,
            );
            if inner.roll(loss) {
                log::debug!("[sim] drop {from} → {to} ({} bytes)", buf.len());
                inner.stats.dropped += 1;
                continue;
            }
            let copies = if inner.roll(dup) {
                inner.stats.duplicated += 1;
                2
            } else {
                1
            };
            let delayed = inner.roll(reorder);
            let Some(tx) = inner.endpoints.get(&to).cloned() else {
                continue;
            };
            inner.stats.delivered += 1;

            for _ in 0..copies {
                let datagram = (buf.to_vec(), from);
                if delayed {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(reorder_delay).await;
                        let _ = tx.send(datagram);
                    });
                } else {
                    // A closed receiver is a socket that was just dropped.
                    let _ = tx.send(datagram);
                }
            }
        }
    }

    fn unbind(&self, addr: SocketAddrV4) {
        let mut inner = self.lock();
        inner.endpoints.remove(&addr);
        for members in inner.groups.values_mut() {
            members.remove(&addr);
        }
    }
}

/// One endpoint on a [`SimNetwork`].  Unbinds itself on drop.
pub struct SimSocket {
    addr: SocketAddrV4,
    net: SimNetwork,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl SimSocket {
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.addr
    }
}

impl DatagramLink for SimSocket {
    async fn send_to(&self, buf: &[u8], dest: SocketAddrV4) -> io::Result<()> {
        self.net.deliver(buf, self.addr, dest);
        Ok(())
    }

    async fn recv_from(&self) -> io::Result<Datagram> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "simulated socket unbound"))
    }
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        self.net.unbind(self.addr);
    }
}
