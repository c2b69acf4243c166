//! Transfer state machine types.
//!
//! The transitions themselves live in [`crate::sender::SendWindow`] and
//! [`crate::receiver::Receiver`]; this module only names the states so that
//! logs and tests can talk about them.
//!
//! ```text
//!  sender:    FILLING ──window full / source done──▶ SENDING ──sent──▶ WAITING_ACK
//!                ▲                                                       │
//!                └──────────────── ACK (window advanced) ────────────────┤
//!                                                                        │ FIN_ACK
//!                                                                        ▼
//!                                                                       DONE
//!
//!  receiver:  IDLE ──first DATA / FIN──▶ RECEIVING ──in-order FIN──▶ TERMINATED
//! ```

use std::fmt;

/// States of one outbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Reading chunks from the source into free window slots.
    #[default]
    Filling,
    /// Freshly filled packets are ready to go on the wire.
    Sending,
    /// Everything in the window is on the wire; waiting for an ACK.
    WaitingAck,
    /// FIN_ACK received.
    Done,
}

/// States of one inbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// Nothing received yet.
    #[default]
    Idle,
    Receiving,
    /// In-order FIN accepted; the sink is closed.
    Terminated,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Filling => "FILLING",
            Self::Sending => "SENDING",
            Self::WaitingAck => "WAITING_ACK",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Receiving => "RECEIVING",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_initial_states() {
        assert_eq!(SenderState::default(), SenderState::Filling);
        assert_eq!(ReceiverState::default(), ReceiverState::Idle);
    }

    #[test]
    fn display_uses_protocol_names() {
        assert_eq!(SenderState::WaitingAck.to_string(), "WAITING_ACK");
        assert_eq!(ReceiverState::Terminated.to_string(), "TERMINATED");
    }
}
