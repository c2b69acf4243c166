//! Receive-side state machine for one inbound stream.
//!
//! Only **in-order** chunks are accepted (`seq == expected`).  Everything
//! else is discarded and answered with the unchanged cumulative ACK, the same
//! Go-Back-N rule the sender relies on.  Once the FIN is accepted every
//! DATA or FIN is answered with FIN_ACK(expected), so a sender whose FIN_ACK
//! was lost still learns the stream is complete.  The receiver never sends
//! anything itself; [`Receiver::on_packet`] returns the reply for the transport to
//! route back.

use std::io::{self, Write};

use crate::packet::{Packet, PacketKind};
use crate::state::ReceiverState;

/// Inbound stream writing accepted chunks to a sink.
#[derive(Debug)]
pub struct Receiver<W> {
    /// `None` once the FIN closed it.
    sink: Option<W>,
    expected: u32,
    bytes: u64,
    state: ReceiverState,
}

impl<W: Write> Receiver<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Some(sink),
            expected: 0,
            bytes: 0,
            state: ReceiverState::Idle,
        }
    }

    /// Process a DATA or FIN packet and return the reply to send back.
    ///
    /// ACK and FIN_ACK are not for receivers and yield `Ok(None)`.  An error
    /// means the sink failed; the stream cannot continue.
    pub fn on_packet(&mut self, packet: &Packet) -> io::Result<Option<Packet>> {
        if !packet.kind.is_stream() {
            return Ok(None);
        }
        let in_order = packet.seq == self.expected && self.state != ReceiverState::Terminated;

        let reply = match (packet.kind, in_order) {
            (PacketKind::Data, true) => {
                self.append(&packet.payload)?;
                self.expected += 1;
                self.state = ReceiverState::Receiving;
                PacketKind::Ack
            }
            (PacketKind::Fin, true) => {
                self.append(&packet.payload)?;
                if let Some(mut sink) = self.sink.take() {
                    sink.flush()?;
                }
                self.expected += 1;
                self.state = ReceiverState::Terminated;
                PacketKind::FinAck
            }
            // Stale or retried packet of a finished stream.
            _ if self.state == ReceiverState::Terminated => PacketKind::FinAck,
            _ => {
                log::debug!(
                    "[receiver] {} seq={} out of order, expected {}",
                    packet.kind,
                    packet.seq,
                    self.expected
                );
                PacketKind::Ack
            }
        };

        Ok(Some(Packet::control(
            packet.source,
            packet.destination,
            reply,
            self.expected,
        )))
    }

    fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.write_all(payload)?;
            self.bytes += payload.len() as u64;
        }
        Ok(())
    }

    /// Sequence number of the next chunk to accept.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Bytes written to the sink so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ReceiverState::Terminated
    }
}
