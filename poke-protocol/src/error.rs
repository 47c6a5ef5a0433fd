//! Error types, one enum per layer.
//!
//! ```text
//!  PacketError ──┐
//!                ├──▶ ReliabilityError ──▶ SessionError ◀── ProtocolViolation
//!  TransportError┘                              ▲           BattleError
//!                                               │
//!                                     (user-facing taxonomy)
//! ```
//!
//! Only [`SessionError`] is meant to be shown to a user; its `Display` strings
//! are the short messages the terminal front end prints.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use poke_battle::{BattleError, ProtocolViolation};
use thiserror::Error;

use crate::state::SessionState;

/// A datagram that could not be parsed, or a packet that cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("buffer too short to contain a header and checksum")]
    BufferTooShort,
    #[error("payload_len field says {declared} bytes but {actual} are present")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("payload of {0} bytes exceeds the datagram limit")]
    PayloadTooLarge(usize),
}

/// Socket-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The OS reported the remote port as closed (ICMP port unreachable).
    #[error("peer unreachable")]
    PeerUnreachable,
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the reliable channel to one peer.
#[derive(Debug, Error)]
pub enum ReliabilityError {
    /// A message went unacknowledged through the whole retry budget.
    #[error("seq {seq} unacknowledged after {retries} retransmissions")]
    PeerTimeout { seq: u32, retries: u32 },
    #[error("sequence numbers exhausted")]
    SequenceExhausted,
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What a session reports to its user.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("network unavailable: {0}")]
    Transport(#[source] TransportError),
    #[error("peer disconnected")]
    PeerTimeout,
    #[error("could not connect: {0}")]
    HandshakeFailure(String),
    #[error(transparent)]
    Violation(#[from] ProtocolViolation),
    #[error(transparent)]
    Battle(#[from] BattleError),
    #[error("cannot encode message: {0}")]
    Encode(String),
    #[error("not possible while {0}")]
    BadState(SessionState),
    #[error("session task has stopped")]
    DriverStopped,
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}

impl From<ReliabilityError> for SessionError {
    fn from(e: ReliabilityError) -> Self {
        match e {
            ReliabilityError::PeerTimeout { .. } => SessionError::PeerTimeout,
            ReliabilityError::Transport(t) => SessionError::Transport(t),
            ReliabilityError::Packet(p) => SessionError::Encode(p.to_string()),
            ReliabilityError::SequenceExhausted => SessionError::Encode(e.to_string()),
        }
    }
}

/// Problems loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("environment variable {var}={value:?} is not valid")]
    Env { var: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}
