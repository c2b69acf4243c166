//! Send-side window over a byte source.
//!
//! [`SendWindow`] cuts a [`Read`] source into fixed-size chunks and keeps up
//! to `window_size` of them in flight.  It does **not** touch the network;
//! [`crate::session`] sends what [`SendWindow::fill`] produces and feeds ACKs
//! back in.
//!
//! # Contract
//! - Sequence numbers are zero-based chunk indices.
//! - The chunk that exhausts the source is sent as FIN.  One chunk of
//!   look-ahead decides this, so an N-byte source with chunk size C becomes
//!   exactly `max(1, ceil(N / C))` packets (an empty source is one empty FIN).
//! - ACK(n) is cumulative: it acknowledges every in-flight packet with
//!   `seq < n`, except the FIN.  Anything else is a duplicate and changes
//!   nothing.
//! - Only FIN_ACK(fin_seq + 1) retires the FIN and completes the transfer.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::net::Ipv4Addr;

use crate::packet::{Packet, PacketKind};
use crate::state::SenderState;

/// Sliding window of one outbound transfer.
#[derive(Debug)]
pub struct SendWindow<R> {
    source: R,
    destination: Ipv4Addr,
    local: Ipv4Addr,
    chunk_size: usize,
    window_size: usize,

    /// Sequence number of the next chunk to be created.
    next_seq: u32,
    in_flight: BTreeMap<u32, Packet>,
    /// Chunk already read from the source but not yet packetised.
    lookahead: Option<Vec<u8>>,
    /// Set once the FIN packet has been created.
    fin_seq: Option<u32>,

    bytes_read: u64,
    state: SenderState,
}

impl<R: Read> SendWindow<R> {
    /// `local` and `destination` are the rovers' private addresses.
    pub fn new(
        source: R,
        local: Ipv4Addr,
        destination: Ipv4Addr,
        chunk_size: usize,
        window_size: usize,
    ) -> Self {
        Self {
            source,
            destination,
            local,
            chunk_size: chunk_size.max(1),
            window_size: window_size.max(1),
            next_seq: 0,
            in_flight: BTreeMap::new(),
            lookahead: None,
            fin_seq: None,
            bytes_read: 0,
            state: SenderState::Filling,
        }
    }

    /// Fill free window slots from the source.
    ///
    /// Returns the sequence numbers of the packets created, in order.  They
    /// are in flight from now on; the caller must put them on the wire.
    pub fn fill(&mut self) -> io::Result<Vec<u32>> {
        let mut created = Vec::new();
        while self.state != SenderState::Done
            && self.fin_seq.is_none()
            && self.in_flight.len() < self.window_size
        {
            let chunk = match self.lookahead.take() {
                Some(chunk) => chunk,
                None => self.read_chunk()?,
            };
            let next = self.read_chunk()?;
            let kind = if next.is_empty() {
                PacketKind::Fin
            } else {
                self.lookahead = Some(next);
                PacketKind::Data
            };

            let seq = self.next_seq;
            self.next_seq += 1;
            if kind == PacketKind::Fin {
                self.fin_seq = Some(seq);
            }
            self.in_flight.insert(
                seq,
                Packet {
                    destination: self.destination,
                    source: self.local,
                    kind,
                    seq,
                    payload: chunk,
                },
            );
            created.push(seq);
        }

        if !created.is_empty() {
            self.state = SenderState::Sending;
        }
        Ok(created)
    }

    fn read_chunk(&mut self) -> io::Result<Vec<u8>> {
        let mut chunk = Vec::with_capacity(self.chunk_size);
        (&mut self.source)
            .take(self.chunk_size as u64)
            .read_to_end(&mut chunk)?;
        self.bytes_read += chunk.len() as u64;
        Ok(chunk)
    }

    /// Everything [`fill`](Self::fill) produced is on the wire.
    pub fn on_sent(&mut self) {
        if self.state == SenderState::Sending {
            self.state = SenderState::WaitingAck;
        }
    }

    /// Process a cumulative ACK.
    ///
    /// Returns the sequence numbers it acknowledged (empty for a duplicate).
    /// The FIN stays in flight until its FIN_ACK arrives.
    pub fn on_ack(&mut self, ack: u32) -> Vec<u32> {
        let limit = self.fin_seq.map_or(ack, |fin| ack.min(fin));
        let still_in_flight = self.in_flight.split_off(&limit);
        let acked: Vec<u32> = std::mem::replace(&mut self.in_flight, still_in_flight)
            .into_keys()
            .collect();
        if !acked.is_empty() && self.state != SenderState::Done {
            self.state = SenderState::Filling;
        }
        acked
    }

    /// Process a FIN_ACK.  Returns `true` if it completes this transfer;
    /// a FIN_ACK that does not match our FIN is ignored.
    pub fn on_fin_ack(&mut self, ack: u32) -> bool {
        match self.fin_seq {
            Some(fin) if ack == fin + 1 => {
                self.in_flight.clear();
                self.state = SenderState::Done;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, seq: u32) -> Option<&Packet> {
        self.in_flight.get(&seq)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_done(&self) -> bool {
        self.state == SenderState::Done
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    /// Packets created so far.
    pub fn packets_created(&self) -> u32 {
        self.next_seq
    }

    /// Bytes consumed from the source so far (including look-ahead).
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
