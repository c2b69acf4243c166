//! One rover: router and transport service wired to a shared routing table.

use std::io::Read;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::addr::{self, RoverId};
use crate::config::{ConfigError, NodeConfig};
use crate::distance_vector::DistanceVector;
use crate::router::Router;
use crate::sender::SendWindow;
use crate::session::{self, TransferReport};
use crate::socket::DatagramLink;
use crate::table::RoutingTable;
use crate::transport::{Delivery, Forwarder, SessionRegistry, SinkFactory, Transport, TransportError};

/// The three datagram endpoints a rover needs.
pub struct Links<L> {
    /// Source of outgoing advertisements.
    pub advert_tx: L,
    /// Member of the advertisement multicast group.
    pub advert_rx: L,
    /// Unicast endpoint for transport packets.
    pub transport: L,
}

/// A running rover.  Dropping it stops its tasks.
///
/// Transfers and deliveries only need `&self`, so a rover can be shared
/// through an `Arc` to run several transfers at once.
pub struct Rover<L> {
    config: NodeConfig,
    engine: DistanceVector,
    forwarder: Forwarder<L>,
    sessions: SessionRegistry,
    deliveries: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<L: DatagramLink> Rover<L> {
    /// Start the router and transport tasks on the current runtime.
    pub fn spawn(config: NodeConfig, links: Links<L>, sinks: SinkFactory) -> Result<Self, ConfigError> {
        config.validate()?;

        let engine = DistanceVector::new(config.rover_id, config.local_addr);
        let transport_link = Arc::new(links.transport);
        let forwarder = Forwarder::new(&config, Arc::clone(engine.table()), Arc::clone(&transport_link));
        let sessions = SessionRegistry::default();
        let (delivery_tx, deliveries) = mpsc::unbounded_channel();

        let router = Router::new(&config, engine.clone(), links.advert_tx, links.advert_rx);
        let transport = Transport::new(
            config.private_addr(),
            transport_link,
            forwarder.clone(),
            sessions.clone(),
            sinks,
            config.timing.linger,
            delivery_tx,
        );
        let tasks = vec![tokio::spawn(router.run()), tokio::spawn(transport.run())];

        Ok(Self {
            config,
            engine,
            forwarder,
            sessions,
            deliveries: Mutex::new(deliveries),
            tasks,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        self.engine.table()
    }

    /// Reliably send everything `source` yields to rover `destination`.
    ///
    /// Completes when the receiver acknowledged the final chunk.  Only one
    /// transfer per destination may run at a time, and a new one starts no
    /// sooner than `linger` after the previous one ended so the receiver has
    /// let go of the old stream.
    pub async fn send_stream<R: Read>(
        &self,
        destination: RoverId,
        source: R,
    ) -> Result<TransferReport, TransportError> {
        let dest_addr = addr::private_addr(destination);
        let mut slot = self.sessions.register(dest_addr)?;
        let timing = &self.config.timing;
        if let Some(finished) = self.sessions.last_finished(dest_addr) {
            let start = finished + timing.linger;
            if start > tokio::time::Instant::now() {
                log::debug!("[rover] waiting for {dest_addr} to release the previous stream");
                tokio::time::sleep_until(start).await;
            }
        }
        let window = SendWindow::new(
            source,
            self.config.private_addr(),
            dest_addr,
            timing.chunk_size,
            timing.window_size,
        );
        log::info!("[rover] sending stream to rover {destination} ({dest_addr})");
        session::run(window, &self.forwarder, slot.acks(), timing.retransmit_interval).await
    }

    /// Wait for the next completely received stream.
    pub async fn next_delivery(&self) -> Option<Delivery> {
        self.deliveries.lock().await.recv().await
    }

    pub fn private_addr(&self) -> Ipv4Addr {
        self.config.private_addr()
    }

    /// Stop the router and transport tasks and wait for them to finish.
    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        log::info!("[rover] rover {} stopped", self.config.rover_id);
    }
}

impl<L> Drop for Rover<L> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
