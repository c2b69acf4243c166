//! Routing event loop.
//!
//! One task per rover multiplexes three event sources with `tokio::select!`:
//!
//! ```text
//!   interval tick ────────────▶ advertise (periodic)
//!   advert datagram ──decode──▶ neighbor seen + relax ──changed?──▶ advertise (triggered)
//!   liveness expiry ──claim───▶ poison routes ────────────────────▶ advertise (triggered)
//! ```
//!
//! All table mutations happen on this task, so advertisement processing and
//! neighbor expiry never interleave.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::advert::Advertisement;
use crate::config::NodeConfig;
use crate::distance_vector::DistanceVector;
use crate::liveness::Liveness;
use crate::socket::DatagramLink;
use crate::timer::Expired;

/// Routing task of one rover.
pub struct Router<L> {
    core: RouterCore<L>,
    /// Multicast group membership advertisements arrive on.
    rx: L,
    expired: mpsc::UnboundedReceiver<Expired<Ipv4Addr>>,
    interval: Duration,
}

/// State the event handlers mutate.
struct RouterCore<L> {
    engine: DistanceVector,
    /// Socket advertisements are sent from.
    tx: L,
    group: SocketAddrV4,
    liveness: Liveness,
}

impl<L: DatagramLink> Router<L> {
    pub fn new(config: &NodeConfig, engine: DistanceVector, tx: L, rx: L) -> Self {
        let (liveness, expired) = Liveness::new(config.timing.neighbor_timeout);
        Self {
            core: RouterCore {
                engine,
                tx,
                group: config.group_addr(),
                liveness,
            },
            rx,
            expired,
            interval: config.timing.advert_interval,
        }
    }

    /// Run until the advertisement socket is closed.
    pub async fn run(self) {
        let Self {
            mut core,
            rx,
            mut expired,
            interval,
        } = self;

        // First tick completes immediately: announce ourselves on start-up.
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "[router] rover {} up on {}, advertising to {} every {:?}",
            core.engine.rover_id(),
            core.engine.local_addr(),
            core.group,
            interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    core.advertise("periodic").await;
                }

                result = rx.recv_from() => match result {
                    Ok((buf, from)) => core.on_datagram(&buf, from).await,
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        log::warn!("[router] advertisement socket closed: {e}");
                        break;
                    }
                    Err(e) => log::warn!("[router] receive failed: {e}"),
                },

                Some(e) = expired.recv() => {
                    core.on_expired(e).await;
                }
            }
        }
    }
}

impl<L: DatagramLink> RouterCore<L> {
    async fn on_datagram(&mut self, buf: &[u8], from: SocketAddrV4) {
        let adv = match Advertisement::decode(buf) {
            Ok(adv) => adv,
            Err(e) => {
                log::debug!("[router] dropping datagram from {from}: {e}");
                return;
            }
        };
        // Our own advertisement looped back by the group.
        if adv.sender_id == self.engine.rover_id() {
            return;
        }

        let sender_addr = *from.ip();
        log::debug!(
            "[router] ← advert from rover {} ({sender_addr}), {} routes",
            adv.sender_id,
            adv.entries.len()
        );

        let mut changed = self.engine.on_direct_neighbor(adv.sender_id, sender_addr);
        self.liveness.touch(sender_addr, adv.sender_id);
        changed |= self.engine.on_advertisement(sender_addr, &adv.entries);

        if changed {
            self.log_table();
            self.advertise("triggered").await;
        }
    }

    async fn on_expired(&mut self, expired: Expired<Ipv4Addr>) {
        let Some(silent) = self.liveness.expire(&expired) else {
            return;
        };
        log::info!(
            "[router] rover {} ({}) silent for {:?}, poisoning its routes",
            silent.rover_id,
            silent.addr,
            self.liveness.timeout()
        );
        if self.engine.on_neighbor_timeout(silent.rover_id, silent.addr) > 0 {
            self.log_table();
        }
        self.advertise("triggered").await;
    }

    async fn advertise(&self, reason: &str) {
        let adv = self.engine.advertisement();
        match self.tx.send_to(&adv.encode(), self.group).await {
            Ok(()) => log::debug!("[router] → {reason} advert, {} routes", adv.entries.len()),
            Err(e) => log::warn!("[router] {reason} advert to {} failed: {e}", self.group),
        }
    }

    fn log_table(&self) {
        log::info!("[router] routing table changed\n{}", self.engine.table());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr;
    use crate::config::Timing;
    use crate::simulator::{SimNetwork, SimSocket};
    use crate::table::INFINITY;

    const A: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);

    fn config(id: u8, ip: Ipv4Addr) -> NodeConfig {
        NodeConfig::new(id, ip)
    }

    fn spawn_router(net: &SimNetwork, id: u8, ip: Ipv4Addr) -> DistanceVector {
        let cfg = config(id, ip);
        let tx = net.bind(SocketAddrV4::new(ip, cfg.source_port)).unwrap();
        let rx = net
            .bind_multicast(SocketAddrV4::new(ip, cfg.multicast_port), cfg.group_addr())
            .unwrap();
        let engine = DistanceVector::new(id, ip);
        tokio::spawn(Router::new(&cfg, engine.clone(), tx, rx).run());
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn neighbors_learn_each_other() {
        let net = SimNetwork::perfect();
        let a = spawn_router(&net, 1, A);
        let b = spawn_router(&net, 2, B);

        tokio::time::sleep(Duration::from_millis(10)).await;

        let to_b = a.lookup_next_hop(addr::private_addr(2)).unwrap();
        assert_eq!((to_b.cost, to_b.next_hop), (1, B));
        let to_a = b.lookup_next_hop(addr::private_addr(1)).unwrap();
        assert_eq!((to_a.cost, to_a.next_hop), (1, A));
        assert_eq!(a.table().len(), 1, "own echo never creates a route");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_neighbor_is_poisoned_after_timeout() {
        let net = SimNetwork::perfect();
        let a = spawn_router(&net, 1, A);
        let _b = spawn_router(&net, 2, B);
        tokio::time::sleep(Duration::from_millis(10)).await;

        net.isolate(B);
        let timeout = Timing::default().neighbor_timeout;
        tokio::time::sleep(timeout - Duration::from_millis(100)).await;
        assert_eq!(a.lookup_next_hop(addr::private_addr(2)).unwrap().cost, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(a.lookup_next_hop(addr::private_addr(2)).unwrap().cost, INFINITY);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_datagrams_are_ignored() {
        let net = SimNetwork::perfect();
        let a = spawn_router(&net, 1, A);
        let junk: SimSocket = net.bind(SocketAddrV4::new(B, 9)).unwrap();
        junk.send_to(&[1, 2], config(1, A).group_addr()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(a.table().is_empty());
    }
}
