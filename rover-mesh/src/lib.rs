//! `rover-mesh`: distance-vector routing and reliable stream transfer
//! between rovers that discover each other over UDP multicast.
//!
//! # Architecture
//!
//! ```text
//!            multicast group                         unicast, hop by hop
//!   ┌─────────────────────────────┐          ┌──────────────────────────────┐
//!   │ Router (periodic/triggered  │          │ Transport (receive loop)     │
//!   │ adverts, liveness expiry)   │          │  ├─ Receiver per source      │
//!   └──────────────┬──────────────┘          │  ├─ relay to next hop        │
//!                  │ relax / poison          │  └─ ACKs → sender sessions   │
//!   ┌──────────────▼──────────────┐  lookup  └──────────────┬───────────────┘
//!   │ DistanceVector ─▶ RoutingTable ◀────────── Forwarder ◀─┘
//!   └─────────────────────────────┘                   ▲
//!                                                     │ send + per-seq timers
//!                                              session::run(SendWindow)
//! ```
//!
//! Each module has a single responsibility:
//! - [`addr`]: rover id <-> private address
//! - [`advert`]: advertisement wire format
//! - [`packet`]: transport packet wire format
//! - [`table`]: lock-guarded routing table
//! - [`distance_vector`]: relaxation, split horizon, poisoning
//! - [`timer`]: keyed cancel-and-replace timers
//! - [`liveness`]: per-neighbor silence detection
//! - [`router`]: routing event loop
//! - [`state`]: sender/receiver state types
//! - [`sender`]: send window over a byte source
//! - [`receiver`]: in-order receive state machine over a byte sink
//! - [`session`]: retransmitting sender session
//! - [`transport`]: next-hop resolution, relaying, receive loop
//! - [`node`]: one rover: router + transport tasks
//! - [`config`]: identity, ports and protocol timing
//! - [`socket`]: datagram boundary and tokio UDP socket
//! - [`simulator`]: in-memory lossy network for tests

pub mod addr;
pub mod advert;
pub mod config;
pub mod distance_vector;
pub mod liveness;
pub mod node;
pub mod packet;
pub mod receiver;
pub mod router;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod table;
pub mod timer;
pub mod transport;
