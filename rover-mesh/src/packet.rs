//! Wire format of transport packets.
//!
//! Every datagram on the transport port is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout.
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated input.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Destination Address                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Source Address                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |              Sequence Number ...              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      ...      |               Payload Length ...              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      ...      |               Payload ...                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 17 bytes.
//! dest(4) + src(4) + type(1) + seq(4) + payload_len(4)
//!
//! The addresses lead the header so a relay can read the destination with
//! [`peek_destination`] without decoding the rest.

use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 17;

// Byte offsets of each field within the serialised header.
const OFF_DEST: usize = 0;
const OFF_SRC: usize = 4;
const OFF_TYPE: usize = 8;
const OFF_SEQ: usize = 9;
const OFF_PAYLOAD_LEN: usize = 13;

/// What a packet means to the stream state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// A chunk of the stream that is not the last one.
    Data,
    /// Cumulative acknowledgement; `seq` is the next expected number.
    Ack,
    /// The last chunk of the stream.
    Fin,
    /// Acknowledgement of the FIN; ends the transfer.
    FinAck,
}

impl PacketKind {
    /// Type byte on the wire.
    pub fn code(self) -> u8 {
        match self {
            PacketKind::Fin => 0,
            PacketKind::Data => 1,
            PacketKind::Ack => 2,
            PacketKind::FinAck => 3,
        }
    }

    /// Any unknown type byte decodes as FIN.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => PacketKind::Data,
            2 => PacketKind::Ack,
            3 => PacketKind::FinAck,
            _ => PacketKind::Fin,
        }
    }

    /// `true` for the kinds that carry stream content (DATA and FIN).
    pub fn is_stream(self) -> bool {
        matches!(self, PacketKind::Data | PacketKind::Fin)
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::Data => "DATA",
            PacketKind::Ack => "ACK",
            PacketKind::Fin => "FIN",
            PacketKind::FinAck => "FIN_ACK",
        };
        f.write_str(name)
    }
}

/// A complete transport datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Private address of the rover the packet is for.
    pub destination: Ipv4Addr,
    /// Private address of the rover that built the packet.
    pub source: Ipv4Addr,
    pub kind: PacketKind,
    /// Chunk index for DATA/FIN, next expected index for ACK/FIN_ACK.
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A payload-less ACK or FIN_ACK.
    pub fn control(destination: Ipv4Addr, source: Ipv4Addr, kind: PacketKind, seq: u32) -> Self {
        Self {
            destination,
            source,
            kind,
            seq,
            payload: Vec::new(),
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The payload length field is computed from the actual payload.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        buf[OFF_DEST..OFF_DEST + 4].copy_from_slice(&self.destination.octets());
        buf[OFF_SRC..OFF_SRC + 4].copy_from_slice(&self.source.octets());
        buf[OFF_TYPE] = self.kind.code();
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4]
            .copy_from_slice(&(payload_len as u32).to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Exactly `payload_len` bytes are read after the header; anything after
    /// them is ignored.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`], or
    /// - the `payload_len` field claims more bytes than `buf` holds.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let declared = read_u32(buf, OFF_PAYLOAD_LEN) as usize;
        let available = buf.len() - HEADER_LEN;
        if declared > available {
            return Err(PacketError::Truncated {
                declared,
                available,
            });
        }

        Ok(Packet {
            destination: read_ipv4(buf, OFF_DEST),
            source: read_ipv4(buf, OFF_SRC),
            kind: PacketKind::from_code(buf[OFF_TYPE]),
            seq: read_u32(buf, OFF_SEQ),
            payload: buf[HEADER_LEN..HEADER_LEN + declared].to_vec(),
        })
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seq={} {} -> {} len={}",
            self.kind,
            self.seq,
            self.source,
            self.destination,
            self.payload.len()
        )
    }
}

/// Read the destination address of an encoded packet without decoding it.
pub fn peek_destination(buf: &[u8]) -> Option<Ipv4Addr> {
    (buf.len() >= OFF_DEST + 4).then(|| read_ipv4(buf, OFF_DEST))
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a header ({0} bytes)")]
    BufferTooShort(usize),
    /// `payload_len` claims more bytes than the datagram carries.
    #[error("payload length {declared} exceeds the {available} bytes available")]
    Truncated { declared: usize, available: usize },
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_ipv4(buf: &[u8], off: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[off], buf[off + 1], buf[off + 2], buf[off + 3])
}
