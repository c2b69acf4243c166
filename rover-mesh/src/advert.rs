//! Wire format of routing advertisements.
//!
//! An [`Advertisement`] is one rover's whole routing table, multicast to
//! every rover on the segment.  The layout is RIPv2 with the second reserved
//! header byte repurposed to carry the sender's rover id.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Command (1)  |  Version (2)  |   Reserved    |   Sender ID   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Address Family (2)         |       Route Tag (0x0101)      |  ┐
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+  │
//! |                      Destination Address                      |  │
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+  │ 20 bytes
//! |                 0                             |     Mask      |  │ per
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+  │ route
//! |                        Next Hop Address                       |  │
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+  │
//! |                 0                             |     Cost      |  ┘
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::addr::RoverId;
use crate::table::RoutingEntry;

/// Command byte written into every advertisement.
pub const COMMAND: u8 = 1;
/// Protocol version byte.
pub const VERSION: u8 = 2;
/// Address family identifier (IP).
pub const ADDRESS_FAMILY: u16 = 2;
/// Route tag written into every record.
pub const ROUTE_TAG: u16 = 0x0101;

/// Length of the fixed advertisement header.
pub const HEADER_LEN: usize = 4;
/// Length of one route record.
pub const RECORD_LEN: usize = 20;

// Header offsets.
const OFF_COMMAND: usize = 0;
const OFF_VERSION: usize = 1;
const OFF_SENDER: usize = 3;

// Offsets within one record.
const REC_FAMILY: usize = 0;
const REC_TAG: usize = 2;
const REC_DEST: usize = 4;
const REC_MASK: usize = 11;
const REC_NEXT_HOP: usize = 12;
const REC_COST: usize = 19;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvertError {
    #[error("advertisement shorter than its 4-byte header ({0} bytes)")]
    BufferTooShort(usize),
}

/// One rover's full routing table as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub sender_id: RoverId,
    pub entries: Vec<RoutingEntry>,
}

impl Advertisement {
    pub fn new(sender_id: RoverId, entries: Vec<RoutingEntry>) -> Self {
        Self { sender_id, entries }
    }

    /// Encoded size of this advertisement.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + RECORD_LEN * self.entries.len()
    }

    /// Serialise into a newly allocated buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        buf[OFF_COMMAND] = COMMAND;
        buf[OFF_VERSION] = VERSION;
        buf[OFF_SENDER] = self.sender_id;

        for (rec, entry) in buf[HEADER_LEN..]
            .chunks_exact_mut(RECORD_LEN)
            .zip(&self.entries)
        {
            rec[REC_FAMILY..REC_FAMILY + 2].copy_from_slice(&ADDRESS_FAMILY.to_be_bytes());
            rec[REC_TAG..REC_TAG + 2].copy_from_slice(&ROUTE_TAG.to_be_bytes());
            rec[REC_DEST..REC_DEST + 4].copy_from_slice(&entry.destination.octets());
            rec[REC_MASK] = entry.mask;
            rec[REC_NEXT_HOP..REC_NEXT_HOP + 4].copy_from_slice(&entry.next_hop.octets());
            rec[REC_COST] = entry.cost;
        }
        buf
    }

    /// Parse an advertisement.
    ///
    /// Only the last byte of the mask and cost words is significant.  Bytes
    /// after the last whole record are ignored.  Costs are returned as sent;
    /// clamping is the routing engine's job.
    pub fn decode(buf: &[u8]) -> Result<Self, AdvertError> {
        if buf.len() < HEADER_LEN {
            return Err(AdvertError::BufferTooShort(buf.len()));
        }
        let sender_id = buf[OFF_SENDER];

        let records = buf[HEADER_LEN..].chunks_exact(RECORD_LEN);
        if !records.remainder().is_empty() {
            log::debug!(
                "[advert] ignoring {} trailing byte(s) from rover {sender_id}",
                records.remainder().len()
            );
        }

        let entries = records
            .map(|rec| RoutingEntry {
                destination: ipv4_at(rec, REC_DEST),
                mask: rec[REC_MASK],
                next_hop: ipv4_at(rec, REC_NEXT_HOP),
                cost: rec[REC_COST],
            })
            .collect();

        Ok(Self { sender_id, entries })
    }
}

fn ipv4_at(buf: &[u8], off: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[off], buf[off + 1], buf[off + 2], buf[off + 3])
}
