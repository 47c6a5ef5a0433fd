//! Session state machine types.
//!
//! The transitions themselves live in [`crate::session`]; this module only
//! names the states and the reasons a session can end.
//!
//! ```text
//!          host()                   HELLO rcvd, HELLO_ACK sent
//!  IDLE ─────────▶ LISTENING ──▶ HANDSHAKING ─────────────────┐
//!    │                                                        ▼
//!    │ connect()           HELLO acked              ESTABLISHED
//!    └─────────▶ CONNECTING ───────▶ HANDSHAKING ──────▲      │
//!                    │                  HELLO_ACK rcvd │      │ BYE / quit /
//!                    └─────────────────────────────────┘      │ retries exhausted
//!                                                             ▼
//!                                                CLOSING ──▶ CLOSED
//! ```

use std::fmt;

/// Every state a [`crate::session::Session`] can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    /// Host bound and waiting for a HELLO from anyone.
    Listening,
    /// Client sent HELLO; no ACK yet.
    Connecting,
    /// Host: HELLO accepted, HELLO_ACK going out.  Client: HELLO acked,
    /// waiting for HELLO_ACK.
    Handshaking,
    Established,
    /// Tearing down; pending messages are discarded.
    Closing,
    /// Terminal.  A new session needs a fresh handshake.
    Closed,
}

impl SessionState {
    /// `true` before the battle has been set up.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            SessionState::Listening | SessionState::Connecting | SessionState::Handshaking
        )
    }

    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "IDLE",
            SessionState::Listening => "LISTENING",
            SessionState::Connecting => "CONNECTING",
            SessionState::Handshaking => "HANDSHAKING",
            SessionState::Established => "ESTABLISHED",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Why a session reached [`SessionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// We called `request_quit`.
    LocalQuit,
    /// The peer sent BYE.
    PeerQuit { reason: Option<String> },
    /// A message exhausted its retry budget after the handshake.
    PeerTimeout,
    HandshakeFailure(String),
    /// Fatal socket error.
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::LocalQuit => f.write_str("you left the battle"),
            CloseReason::PeerQuit { reason: Some(r) } => write!(f, "opponent left: {r}"),
            CloseReason::PeerQuit { reason: None } => f.write_str("opponent left"),
            CloseReason::PeerTimeout => f.write_str("peer disconnected"),
            CloseReason::HandshakeFailure(why) => write!(f, "could not connect: {why}"),
            CloseReason::Transport(why) => write!(f, "network unavailable: {why}"),
        }
    }
}
