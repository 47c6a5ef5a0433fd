//! `poke-protocol`: a peer-to-peer, turn-based battle over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  commands / events  ┌──────────────┐
//!  │  PeerHandle  │◀───────────────────▶│  PeerDriver  │  (tokio task)
//!  └──────────────┘                     └──────┬───────┘
//!                                              │ poll every tick
//!  ┌───────────────────────────────────────────▼──────────┐
//!  │                      Session                         │
//!  │  handshake state machine + poke_battle::BattleSession│
//!  └──────────────────────────┬───────────────────────────┘
//!                             │ Message (JSON bodies)
//!  ┌──────────────────────────▼───────────────────────────┐
//!  │                  ReliableChannel                     │
//!  │  per-message ACK, retransmit, dedup, in-order        │
//!  └──────────────────────────┬───────────────────────────┘
//!                             │ Packet (framed, CRC-32)
//!  ┌──────────────────────────▼───────────────────────────┐
//!  │            Transport: Socket | SimSocket             │
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      : wire format (framing, checksum)
//! - [`message`]     : typed application messages and their JSON bodies
//! - [`reliability`] : reliable, ordered, exactly-once delivery to one peer
//! - [`timer`]       : RTO estimation and back-off
//! - [`session`]     : handshake, battle wiring, teardown
//! - [`driver`]      : async event loop and user handle
//! - [`state`]       : session state and close reasons
//! - [`socket`]      : transport trait and the UDP implementation
//! - [`simulator`]   : seeded lossy network for tests
//! - [`config`]      : file / environment configuration
//! - [`error`]       : error enums per layer

pub mod config;
pub mod driver;
pub mod error;
pub mod message;
pub mod packet;
pub mod reliability;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::Config;
pub use driver::{PeerDriver, PeerHandle};
pub use error::{ConfigError, PacketError, ReliabilityError, SessionError, TransportError};
pub use message::{Message, MAX_TRAINER_LEN, PROTOCOL_VERSION};
pub use packet::{Kind, Packet};
pub use reliability::ReliableChannel;
pub use session::{LocalPlayer, Session, SessionEvent, SessionSnapshot};
pub use socket::{Socket, Transport};
pub use state::{CloseReason, SessionState};
pub use timer::RetransmitConfig;
