//! Node configuration.
//!
//! Everything the core needs is resolved up front and handed over as plain
//! values; the CLI in `main.rs` is the only thing that parses user input.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use thiserror::Error;

use crate::addr::{self, RoverId};

/// Default multicast group advertisements are sent to.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(233, 33, 33, 33);
/// Default port of the multicast group.
pub const DEFAULT_MULTICAST_PORT: u16 = 20001;
/// Default local port advertisements are sent from.
pub const DEFAULT_SOURCE_PORT: u16 = 32768;
/// Default port transport packets are exchanged on.
pub const DEFAULT_TRANSPORT_PORT: u16 = 6767;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("neighbor timeout ({timeout:?}) must exceed the advertisement interval ({interval:?})")]
    TimeoutNotAboveInterval { timeout: Duration, interval: Duration },
    #[error("window size must be at least 1")]
    EmptyWindow,
    #[error("chunk size must be at least 1 byte")]
    EmptyChunk,
    #[error("linger ({linger:?}) must be at least two retransmit intervals ({retransmit:?})")]
    LingerTooShort { linger: Duration, retransmit: Duration },
    #[error("{0} is not a multicast address")]
    NotMulticast(Ipv4Addr),
}

/// Protocol timing and sizing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Period of unsolicited full-table advertisements.  Also the polling
    /// interval of next-hop resolution.
    pub advert_interval: Duration,
    /// Silence after which a neighbor is declared gone.
    pub neighbor_timeout: Duration,
    /// Delay before an unacknowledged packet is resent.
    pub retransmit_interval: Duration,
    /// How long a finished inbound stream keeps answering its sender before
    /// seq 0 from that sender may open a new one.  Senders wait the same
    /// time between two streams to one destination.
    pub linger: Duration,
    /// Extra lookups before a send gives up on an unresolved destination.
    pub route_retries: u32,
    /// Payload bytes per transport packet.
    pub chunk_size: usize,
    /// Maximum unacknowledged packets per transfer.
    pub window_size: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            advert_interval: Duration::from_secs(5),
            neighbor_timeout: Duration::from_secs(10),
            retransmit_interval: Duration::from_secs(1),
            linger: Duration::from_secs(5),
            route_retries: 10,
            chunk_size: 5000,
            window_size: 1,
        }
    }
}

impl Timing {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.neighbor_timeout <= self.advert_interval {
            return Err(ConfigError::TimeoutNotAboveInterval {
                timeout: self.neighbor_timeout,
                interval: self.advert_interval,
            });
        }
        if self.window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::EmptyChunk);
        }
        if self.linger < self.retransmit_interval * 2 {
            return Err(ConfigError::LingerTooShort {
                linger: self.linger,
                retransmit: self.retransmit_interval,
            });
        }
        Ok(())
    }
}

/// Identity and addressing of one rover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub rover_id: RoverId,
    /// Interface address neighbors see our datagrams coming from.
    pub local_addr: Ipv4Addr,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub source_port: u16,
    pub transport_port: u16,
    pub timing: Timing,
}

impl NodeConfig {
    /// Configuration with default ports and timing.
    pub fn new(rover_id: RoverId, local_addr: Ipv4Addr) -> Self {
        Self {
            rover_id,
            local_addr,
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            source_port: DEFAULT_SOURCE_PORT,
            transport_port: DEFAULT_TRANSPORT_PORT,
            timing: Timing::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Canonical private address of this rover.
    pub fn private_addr(&self) -> Ipv4Addr {
        addr::private_addr(self.rover_id)
    }

    /// Where advertisements are sent.
    pub fn group_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.multicast_group, self.multicast_port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multicast_group.is_multicast() {
            return Err(ConfigError::NotMulticast(self.multicast_group));
        }
        self.timing.validate()
    }
}
