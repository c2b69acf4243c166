//! Sender session: drives one [`SendWindow`] to completion.
//!
//! ```text
//!   fill window ──▶ send + arm timer(seq) ──▶ wait
//!        ▲                                     │
//!        │  ACK(n): cancel timers < n          │  timer(seq) fired:
//!        └─────────────────────────────────────┤  resend seq, re-arm
//!                                              │
//!                           FIN_ACK: cancel all, done
//! ```
//!
//! Each in-flight packet has its own retransmission timer.  Timers are only
//! cancelled, claimed and re-armed on this task, so a packet that was just
//! acknowledged is never resent.

use std::io::Read;
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::packet::{Packet, PacketKind};
use crate::sender::SendWindow;
use crate::socket::DatagramLink;
use crate::timer::Timers;
use crate::transport::{Forwarder, TransportError};

/// Summary of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub destination: Ipv4Addr,
    /// Distinct packets the stream was cut into.
    pub packets: u32,
    pub bytes: u64,
    pub retransmissions: u32,
}

/// Send everything `window` reads from its source and wait for the FIN_ACK.
///
/// `acks` carries the ACK and FIN_ACK packets addressed to this session.
/// Losses are recovered by resending each packet every `retransmit`
/// interval until it is acknowledged.
pub async fn run<R, L>(
    mut window: SendWindow<R>,
    forwarder: &Forwarder<L>,
    acks: &mut mpsc::Receiver<Packet>,
    retransmit: Duration,
) -> Result<TransferReport, TransportError>
where
    R: Read,
    L: DatagramLink,
{
    let (mut timers, mut expired) = Timers::new();
    let mut retransmissions = 0u32;

    send_fresh(&mut window, forwarder, &mut timers, retransmit).await?;

    while !window.is_done() {
        tokio::select! {
            packet = acks.recv() => {
                let Some(packet) = packet else {
                    return Err(TransportError::SessionClosed);
                };
                match packet.kind {
                    PacketKind::Ack => {
                        let acked = window.on_ack(packet.seq);
                        if acked.is_empty() {
                            log::debug!("[session] duplicate ACK {}", packet.seq);
                            continue;
                        }
                        for seq in &acked {
                            timers.cancel(seq);
                        }
                        send_fresh(&mut window, forwarder, &mut timers, retransmit).await?;
                    }
                    PacketKind::FinAck => {
                        if window.on_fin_ack(packet.seq) {
                            timers.cancel_all();
                        }
                    }
                    PacketKind::Data | PacketKind::Fin => {}
                }
            }

            Some(e) = expired.recv() => {
                if !timers.claim(&e) {
                    continue;
                }
                let Some(packet) = window.get(e.key).cloned() else {
                    continue;
                };
                retransmissions += 1;
                log::debug!("[session] timeout, resending {} seq={}", packet.kind, packet.seq);
                forwarder.send(&packet).await?;
                timers.arm(e.key, retransmit);
            }
        }
    }

    let report = TransferReport {
        destination: window.destination(),
        packets: window.packets_created(),
        bytes: window.bytes_read(),
        retransmissions,
    };
    log::info!(
        "[session] sent {} bytes to {} in {} packets ({} retransmissions)",
        report.bytes,
        report.destination,
        report.packets,
        report.retransmissions
    );
    Ok(report)
}

/// Fill the window and put every new packet on the wire with its own timer.
async fn send_fresh<R, L>(
    window: &mut SendWindow<R>,
    forwarder: &Forwarder<L>,
    timers: &mut Timers<u32>,
    retransmit: Duration,
) -> Result<(), TransportError>
where
    R: Read,
    L: DatagramLink,
{
    for seq in window.fill()? {
        let Some(packet) = window.get(seq).cloned() else {
            continue;
        };
        forwarder.send(&packet).await?;
        timers.arm(seq, retransmit);
    }
    window.on_sent();
    Ok(())
}
