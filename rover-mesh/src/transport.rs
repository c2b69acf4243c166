//! Hop-by-hop transport service.
//!
//! Every rover runs one [`Transport`] loop on its transport socket.  Each
//! datagram is classified by its destination and kind:
//!
//! ```text
//!   destination != us ─────────────▶ Forwarder::relay (bytes untouched)
//!   DATA / FIN ────────────────────▶ per-source Receiver ──reply──▶ Forwarder::send
//!   ACK / FIN_ACK ─────────────────▶ SessionRegistry ──▶ sender session of that peer
//! ```
//!
//! A stream from one source is replaced by a new one only when seq 0
//! arrives after the old stream made no progress for `linger`.  Until then a
//! finished stream keeps answering late packets with FIN_ACK, so duplicates
//! of its first chunk never reopen (and truncate) its sink.
//!
//! Every send, relay and reply first resolves the next hop in the shared
//! routing table.  A destination that is missing or at INFINITY is polled
//! once per advertisement interval, up to `route_retries` more times, before
//! the send fails with [`TransportError::Unreachable`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::addr;
use crate::config::NodeConfig;
use crate::packet::{self, Packet, PacketKind};
use crate::receiver::Receiver;
use crate::socket::DatagramLink;
use crate::table::RoutingTable;

/// Queue depth of one sender session's ACK channel.
const ACK_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to {destination}")]
    Unreachable { destination: Ipv4Addr },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transport service stopped")]
    SessionClosed,
    #[error("a transfer to {destination} is already running")]
    SessionBusy { destination: Ipv4Addr },
}

/// Opens the sink an inbound stream from the given private address is
/// written to.
pub type SinkFactory = Arc<dyn Fn(Ipv4Addr) -> io::Result<Box<dyn Write + Send>> + Send + Sync>;

/// A stream that was received completely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Private address of the sending rover.
    pub from: Ipv4Addr,
    pub bytes: u64,
}

/// Sinks writing each stream to `<dir>/output-from-<id>`.
pub fn file_sinks(dir: PathBuf) -> SinkFactory {
    Arc::new(move |from: Ipv4Addr| {
        let name = match addr::rover_id(from) {
            Some(id) => format!("output-from-{id}"),
            None => format!("output-from-{from}"),
        };
        let file = File::create(dir.join(name))?;
        Ok(Box::new(BufWriter::new(file)) as Box<dyn Write + Send>)
    })
}

// ---------------------------------------------------------------------------
// Forwarder
// ---------------------------------------------------------------------------

/// Next-hop resolution plus the transport socket.
pub struct Forwarder<L> {
    table: Arc<RoutingTable>,
    link: Arc<L>,
    port: u16,
    poll_interval: Duration,
    retries: u32,
}

impl<L> Clone for Forwarder<L> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            link: Arc::clone(&self.link),
            port: self.port,
            poll_interval: self.poll_interval,
            retries: self.retries,
        }
    }
}

impl<L: DatagramLink> Forwarder<L> {
    pub fn new(config: &NodeConfig, table: Arc<RoutingTable>, link: Arc<L>) -> Self {
        Self {
            table,
            link,
            port: config.transport_port,
            poll_interval: config.timing.advert_interval,
            retries: config.timing.route_retries,
        }
    }

    /// Interface address of the next hop towards `destination`.
    pub async fn resolve(&self, destination: Ipv4Addr) -> Result<Ipv4Addr, TransportError> {
        for attempt in 0..=self.retries {
            match self.table.lookup(destination) {
                Some(entry) if entry.is_reachable() => return Ok(entry.next_hop),
                _ if attempt < self.retries => {
                    log::debug!(
                        "[transport] no route to {destination} yet, retry {}/{}",
                        attempt + 1,
                        self.retries
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
                _ => {}
            }
        }
        log::warn!("[transport] {destination} unreachable after {} retries", self.retries);
        Err(TransportError::Unreachable { destination })
    }

    pub async fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        let hop = self.resolve(packet.destination).await?;
        self.link
            .send_to(&packet.encode(), SocketAddrV4::new(hop, self.port))
            .await?;
        log::debug!("[transport] → {packet} via {hop}");
        Ok(())
    }

    /// Pass an encoded packet for another rover on towards it unchanged.
    pub async fn relay(&self, buf: &[u8], destination: Ipv4Addr) -> Result<(), TransportError> {
        let hop = self.resolve(destination).await?;
        self.link
            .send_to(buf, SocketAddrV4::new(hop, self.port))
            .await?;
        log::debug!("[transport] relayed {} bytes for {destination} via {hop}", buf.len());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Sessions {
    running: HashMap<Ipv4Addr, mpsc::Sender<Packet>>,
    /// When the last session to each destination ended.
    finished: HashMap<Ipv4Addr, Instant>,
}

/// Routes ACK and FIN_ACK packets to the sender session for their source.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<Sessions>>,
}

impl SessionRegistry {
    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `destination`.  At most one transfer per peer runs
    /// at a time; the slot is released when the returned guard drops.
    pub fn register(&self, destination: Ipv4Addr) -> Result<SessionSlot, TransportError> {
        let mut sessions = self.lock();
        if sessions.running.contains_key(&destination) {
            return Err(TransportError::SessionBusy { destination });
        }
        let (tx, rx) = mpsc::channel(ACK_QUEUE);
        sessions.running.insert(destination, tx);
        Ok(SessionSlot {
            registry: self.clone(),
            destination,
            acks: rx,
        })
    }

    /// Hand an ACK or FIN_ACK to its session.  Returns `false` if nobody is
    /// waiting for it.
    pub fn dispatch(&self, packet: Packet) -> bool {
        let Some(tx) = self.lock().running.get(&packet.source).cloned() else {
            return false;
        };
        // A full queue means the session is behind; ACKs are cumulative.
        tx.try_send(packet).is_ok()
    }

    pub fn is_active(&self, destination: Ipv4Addr) -> bool {
        self.lock().running.contains_key(&destination)
    }

    /// When the previous session to `destination` ended, if there was one.
    pub fn last_finished(&self, destination: Ipv4Addr) -> Option<Instant> {
        self.lock().finished.get(&destination).copied()
    }
}

/// Registration of one running sender session.
pub struct SessionSlot {
    registry: SessionRegistry,
    destination: Ipv4Addr,
    acks: mpsc::Receiver<Packet>,
}

impl SessionSlot {
    pub fn acks(&mut self) -> &mut mpsc::Receiver<Packet> {
        &mut self.acks
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let mut sessions = self.registry.lock();
        sessions.running.remove(&self.destination);
        sessions.finished.insert(self.destination, Instant::now());
    }
}

// ---------------------------------------------------------------------------
// Transport service
// ---------------------------------------------------------------------------

/// Inbound stream from one source.
struct Inbound {
    receiver: Receiver<Box<dyn Write + Send>>,
    /// Last time the stream accepted a chunk.
    progress: Instant,
}

/// Receive loop of one rover's transport socket.
pub struct Transport<L> {
    /// Our private address.
    local: Ipv4Addr,
    link: Arc<L>,
    forwarder: Forwarder<L>,
    sessions: SessionRegistry,
    inbound: HashMap<Ipv4Addr, Inbound>,
    sinks: SinkFactory,
    linger: Duration,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl<L: DatagramLink> Transport<L> {
    pub fn new(
        local: Ipv4Addr,
        link: Arc<L>,
        forwarder: Forwarder<L>,
        sessions: SessionRegistry,
        sinks: SinkFactory,
        linger: Duration,
        deliveries: mpsc::UnboundedSender<Delivery>,
    ) -> Self {
        Self {
            local,
            link,
            forwarder,
            sessions,
            inbound: HashMap::new(),
            sinks,
            linger,
            deliveries,
        }
    }

    /// Run until the transport socket is closed.
    pub async fn run(mut self) {
        loop {
            let (buf, from) = match self.link.recv_from().await {
                Ok(datagram) => datagram,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    log::warn!("[transport] socket closed: {e}");
                    return;
                }
                Err(e) => {
                    log::warn!("[transport] receive failed: {e}");
                    continue;
                }
            };
            self.on_datagram(buf, from);
        }
    }

    fn on_datagram(&mut self, buf: Vec<u8>, from: SocketAddrV4) {
        let Some(destination) = packet::peek_destination(&buf) else {
            log::debug!("[transport] dropping runt datagram from {from}");
            return;
        };
        if destination != self.local {
            if let Err(e) = Packet::decode(&buf) {
                log::debug!("[transport] not relaying datagram from {from}: {e}");
                return;
            }
            let forwarder = self.forwarder.clone();
            tokio::spawn(async move {
                if let Err(e) = forwarder.relay(&buf, destination).await {
                    log::warn!("[transport] relay to {destination} failed: {e}");
                }
            });
            return;
        }

        let packet = match Packet::decode(&buf) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("[transport] dropping datagram from {from}: {e}");
                return;
            }
        };
        log::debug!("[transport] ← {packet} from {from}");

        match packet.kind {
            PacketKind::Data | PacketKind::Fin => self.on_stream(&packet),
            PacketKind::Ack | PacketKind::FinAck => {
                let source = packet.source;
                if !self.sessions.dispatch(packet) {
                    log::debug!("[transport] no session for ack from {source}");
                }
            }
        }
    }

    fn on_stream(&mut self, packet: &Packet) {
        let source = packet.source;
        let restart = packet.seq == 0
            && self
                .inbound
                .get(&source)
                .map_or(true, |inbound| inbound.progress.elapsed() >= self.linger);
        if restart {
            match (self.sinks)(source) {
                Ok(sink) => {
                    log::info!("[transport] new stream from {source}");
                    self.inbound.insert(
                        source,
                        Inbound {
                            receiver: Receiver::new(sink),
                            progress: Instant::now(),
                        },
                    );
                }
                Err(e) => {
                    log::warn!("[transport] cannot open sink for {source}: {e}");
                    return;
                }
            }
        }
        let Some(inbound) = self.inbound.get_mut(&source) else {
            log::debug!("[transport] {} seq={} from {source} without a stream", packet.kind, packet.seq);
            return;
        };

        let receiver = &mut inbound.receiver;
        let (was_terminated, was_expected) = (receiver.is_terminated(), receiver.expected());
        let reply = match receiver.on_packet(packet) {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                log::warn!("[transport] writing stream from {source} failed: {e}");
                self.inbound.remove(&source);
                return;
            }
        };
        if receiver.expected() != was_expected {
            inbound.progress = Instant::now();
        }
        if receiver.is_terminated() && !was_terminated {
            let delivery = Delivery {
                from: source,
                bytes: receiver.bytes(),
            };
            log::info!("[transport] received {} bytes from {source}", delivery.bytes);
            // Nobody listening for deliveries is fine.
            let _ = self.deliveries.send(delivery);
        }

        let forwarder = self.forwarder.clone();
        tokio::spawn(async move {
            if let Err(e) = forwarder.send(&reply).await {
                log::warn!("[transport] {} to {} failed: {e}", reply.kind, reply.destination);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TRANSPORT_PORT;
    use crate::simulator::SimNetwork;
    use crate::table::{RoutingEntry, INFINITY};

    const ME: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 2);

    fn forwarder(net: &SimNetwork) -> (Forwarder<crate::simulator::SimSocket>, Arc<RoutingTable>) {
        let config = NodeConfig::new(1, ME);
        let table = Arc::new(RoutingTable::new(config.private_addr()));
        let link = Arc::new(net.bind(SocketAddrV4::new(ME, config.transport_port)).unwrap());
        (Forwarder::new(&config, Arc::clone(&table), link), table)
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_returns_next_hop() {
        let net = SimNetwork::perfect();
        let (fwd, table) = forwarder(&net);
        table.upsert(RoutingEntry::new(addr::private_addr(3), 24, B, 2));
        assert_eq!(fwd.resolve(addr::private_addr(3)).await.unwrap(), B);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_destination_fails_after_bounded_retries() {
        let net = SimNetwork::perfect();
        let (fwd, table) = forwarder(&net);
        table.upsert(RoutingEntry::new(addr::private_addr(3), 24, B, INFINITY));

        let start = tokio::time::Instant::now();
        let err = fwd.resolve(addr::private_addr(3)).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));
        let timing = NodeConfig::new(1, ME).timing;
        assert!(start.elapsed() >= timing.advert_interval * timing.route_retries);
    }

    #[tokio::test(start_paused = true)]
    async fn route_learned_while_waiting_is_used() {
        let net = SimNetwork::perfect();
        let (fwd, table) = forwarder(&net);
        let dest = addr::private_addr(3);
        let pending = tokio::spawn(async move { fwd.resolve(dest).await });

        tokio::time::sleep(Duration::from_secs(7)).await;
        table.upsert(RoutingEntry::new(dest, 24, B, 1));
        assert_eq!(pending.await.unwrap().unwrap(), B);
    }

    #[test]
    fn one_session_per_destination() {
        let registry = SessionRegistry::default();
        let dest = addr::private_addr(3);
        let slot = registry.register(dest).unwrap();
        assert!(matches!(
            registry.register(dest),
            Err(TransportError::SessionBusy { .. })
        ));
        drop(slot);
        assert!(!registry.is_active(dest));
        assert!(registry.register(dest).is_ok());
    }

    #[tokio::test]
    async fn acks_reach_the_session_for_their_source() {
        let registry = SessionRegistry::default();
        let peer = addr::private_addr(3);
        let mut slot = registry.register(peer).unwrap();

        let ack = Packet::control(addr::private_addr(1), peer, PacketKind::Ack, 1);
        assert!(registry.dispatch(ack.clone()));
        assert_eq!(slot.acks().recv().await, Some(ack));

        let stray = Packet::control(addr::private_addr(1), addr::private_addr(9), PacketKind::Ack, 1);
        assert!(!registry.dispatch(stray));
    }

    const SENDER: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 3);

    type Output = Arc<Mutex<Vec<u8>>>;

    /// Sink that truncates the shared output on open, like `File::create`.
    struct Truncating(Output);

    impl Write for Truncating {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Receiving {
        transport: Transport<crate::simulator::SimSocket>,
        /// Rover 3's transport socket, where replies arrive.
        sender: crate::simulator::SimSocket,
        output: Output,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
        linger: Duration,
    }

    /// Transport of rover 1 with direct routes to rovers 2 and 3.
    fn receiving(net: &SimNetwork) -> Receiving {
        let config = NodeConfig::new(1, ME);
        let table = Arc::new(RoutingTable::new(config.private_addr()));
        table.upsert(RoutingEntry::new(addr::private_addr(2), 24, B, 1));
        table.upsert(RoutingEntry::new(addr::private_addr(3), 24, SENDER, 1));
        let link = Arc::new(net.bind(SocketAddrV4::new(ME, config.transport_port)).unwrap());
        let sender = net.bind(SocketAddrV4::new(SENDER, config.transport_port)).unwrap();

        let output = Output::default();
        let sinks: SinkFactory = {
            let output = Arc::clone(&output);
            Arc::new(move |_| {
                output.lock().unwrap().clear();
                Ok(Box::new(Truncating(Arc::clone(&output))) as Box<dyn Write + Send>)
            })
        };
        let (tx, deliveries) = mpsc::unbounded_channel();
        let forwarder = Forwarder::new(&config, table, Arc::clone(&link));
        let linger = config.timing.linger;
        Receiving {
            transport: Transport::new(
                config.private_addr(),
                link,
                forwarder,
                SessionRegistry::default(),
                sinks,
                linger,
                tx,
            ),
            sender,
            output,
            deliveries,
            linger,
        }
    }

    fn stream(kind: PacketKind, seq: u32, payload: &[u8]) -> Packet {
        Packet {
            destination: addr::private_addr(1),
            source: addr::private_addr(3),
            kind,
            seq,
            payload: payload.to_vec(),
        }
    }

    impl Receiving {
        /// Feed one packet from rover 3 and wait for the reply it gets.
        async fn exchange(&mut self, packet: Packet) -> (PacketKind, u32) {
            let from = SocketAddrV4::new(SENDER, DEFAULT_TRANSPORT_PORT);
            self.transport.on_datagram(packet.encode(), from);
            let (buf, _) = self.sender.recv_from().await.unwrap();
            let reply = Packet::decode(&buf).unwrap();
            assert_eq!(reply.destination, addr::private_addr(3));
            (reply.kind, reply.seq)
        }

        fn output(&self) -> Vec<u8> {
            self.output.lock().unwrap().clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_first_chunk_does_not_reopen_finished_stream() {
        let net = SimNetwork::perfect();
        let mut rx = receiving(&net);

        assert_eq!(rx.exchange(stream(PacketKind::Data, 0, b"AAAA")).await, (PacketKind::Ack, 1));
        assert_eq!(rx.exchange(stream(PacketKind::Data, 1, b"BBBB")).await, (PacketKind::Ack, 2));
        assert_eq!(rx.exchange(stream(PacketKind::Fin, 2, b"CC")).await, (PacketKind::FinAck, 3));
        assert_eq!(rx.output(), b"AAAABBBBCC");

        assert_eq!(rx.exchange(stream(PacketKind::Data, 0, b"AAAA")).await, (PacketKind::FinAck, 3));
        assert_eq!(rx.exchange(stream(PacketKind::Fin, 2, b"CC")).await, (PacketKind::FinAck, 3));
        assert_eq!(rx.output(), b"AAAABBBBCC");

        assert_eq!(
            rx.deliveries.try_recv().unwrap(),
            Delivery {
                from: addr::private_addr(3),
                bytes: 10
            }
        );
        assert!(rx.deliveries.try_recv().is_err(), "delivered once");
    }

    #[tokio::test(start_paused = true)]
    async fn new_stream_opens_after_linger() {
        let net = SimNetwork::perfect();
        let mut rx = receiving(&net);
        assert_eq!(rx.exchange(stream(PacketKind::Fin, 0, b"old")).await, (PacketKind::FinAck, 1));

        tokio::time::sleep(rx.linger / 2).await;
        assert_eq!(rx.exchange(stream(PacketKind::Fin, 0, b"new")).await, (PacketKind::FinAck, 1));
        assert_eq!(rx.output(), b"old");

        tokio::time::sleep(rx.linger).await;
        assert_eq!(rx.exchange(stream(PacketKind::Fin, 0, b"new")).await, (PacketKind::FinAck, 1));
        assert_eq!(rx.output(), b"new");
        assert_eq!(rx.deliveries.try_recv().unwrap().bytes, 3);
        assert_eq!(rx.deliveries.try_recv().unwrap().bytes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn only_well_formed_packets_are_relayed() {
        let net = SimNetwork::perfect();
        let mut rx = receiving(&net);
        let b = net.bind(SocketAddrV4::new(B, DEFAULT_TRANSPORT_PORT)).unwrap();
        let from = SocketAddrV4::new(SENDER, 9);

        let mut passing = stream(PacketKind::Data, 4, b"payload");
        passing.destination = addr::private_addr(2);
        let bytes = passing.encode();

        let mut truncated = bytes.clone();
        truncated.pop();
        rx.transport.on_datagram(truncated, from);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(net.stats().delivered, 0);

        rx.transport.on_datagram(bytes.clone(), from);
        assert_eq!(b.recv_from().await.unwrap().0, bytes);
    }

    #[test]
    fn file_sinks_name_output_after_sender() {
        let dir = std::env::temp_dir().join(format!("rover-sinks-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sinks = file_sinks(dir.clone());
        {
            let mut sink = sinks(addr::private_addr(7)).unwrap();
            sink.write_all(b"payload").unwrap();
            sink.flush().unwrap();
        }
        assert_eq!(std::fs::read(dir.join("output-from-7")).unwrap(), b"payload");
        std::fs::remove_dir_all(dir).unwrap();
    }
}
