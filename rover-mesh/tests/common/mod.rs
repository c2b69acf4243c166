//! Helpers for running whole rovers on a simulated network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use rover_mesh::config::{NodeConfig, Timing};
use rover_mesh::node::{Links, Rover};
use rover_mesh::simulator::{SimNetwork, SimSocket};
use rover_mesh::transport::SinkFactory;

/// Received streams, keyed by the sender's private address.
pub type Store = Arc<Mutex<HashMap<Ipv4Addr, Vec<u8>>>>;

/// Interface address of rover `id` on the simulated segment.
pub fn ip(id: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 0, id)
}

struct MemorySink {
    from: Ipv4Addr,
    store: Store,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.store
            .lock()
            .unwrap()
            .entry(self.from)
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn memory_sinks(store: Store) -> SinkFactory {
    Arc::new(move |from| {
        store.lock().unwrap().insert(from, Vec::new());
        Ok(Box::new(MemorySink {
            from,
            store: Arc::clone(&store),
        }) as Box<dyn Write + Send>)
    })
}

pub fn spawn_rover(net: &SimNetwork, id: u8) -> (Rover<SimSocket>, Store) {
    spawn_rover_with(net, id, Timing::default())
}

pub fn spawn_rover_with(net: &SimNetwork, id: u8, timing: Timing) -> (Rover<SimSocket>, Store) {
    let config = NodeConfig::new(id, ip(id)).with_timing(timing);
    let links = Links {
        advert_tx: net
            .bind(SocketAddrV4::new(ip(id), config.source_port))
            .unwrap(),
        advert_rx: net
            .bind_multicast(
                SocketAddrV4::new(ip(id), config.multicast_port),
                config.group_addr(),
            )
            .unwrap(),
        transport: net
            .bind(SocketAddrV4::new(ip(id), config.transport_port))
            .unwrap(),
    };
    let store = Store::default();
    let rover = Rover::spawn(config, links, memory_sinks(Arc::clone(&store))).unwrap();
    (rover, store)
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
