//! Battle message bodies.
//!
//! These are the application payloads of ATTACK, STATUS, CHAT and ERROR
//! messages.  They are plain serde types; the protocol crate decides how
//! they are encoded on the wire.

use serde::{Deserialize, Serialize};

use crate::battle::Role;
use crate::error::ProtocolViolation;

/// One attack, declared by the side whose turn it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackDeclaration {
    pub move_name: String,
    /// Power as the attacker knows it; must match the announced moveset.
    pub power: u32,
    /// Damage roll drawn by the attacker (85–100).
    pub roll: u8,
}

/// The defender's resolution of an attack.
///
/// Carries both sides' HP so either peer can render the full state from a
/// single message; `winner` is set on the final STATUS of a battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub attacker: Role,
    pub move_name: String,
    pub damage: u32,
    pub roll: u8,
    pub host_hp: u32,
    pub client_hp: u32,
    pub next_turn: Role,
    pub winner: Option<Role>,
}

impl StatusReport {
    pub fn hp_of(&self, role: Role) -> u32 {
        match role {
            Role::Host => self.host_hp,
            Role::Client => self.client_hp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
}

/// Why a message was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    OutOfTurn,
    BattleOver,
    UnknownMove,
    InvalidRoll,
    Malformed,
    Desync,
}

impl ErrorCode {
    /// `true` for codes that reject an ATTACK outright (the turn did not move).
    pub fn rejects_attack(self) -> bool {
        matches!(
            self,
            ErrorCode::OutOfTurn
                | ErrorCode::BattleOver
                | ErrorCode::UnknownMove
                | ErrorCode::InvalidRoll
                | ErrorCode::Malformed
        )
    }
}

impl From<&ProtocolViolation> for ErrorCode {
    fn from(v: &ProtocolViolation) -> Self {
        match v {
            ProtocolViolation::OutOfTurn => ErrorCode::OutOfTurn,
            ProtocolViolation::BattleOver => ErrorCode::BattleOver,
            ProtocolViolation::UnknownMove(_) => ErrorCode::UnknownMove,
            ProtocolViolation::InvalidRoll(_) => ErrorCode::InvalidRoll,
            ProtocolViolation::Desync { .. } => ErrorCode::Desync,
            ProtocolViolation::UnexpectedStatus
            | ProtocolViolation::InvalidParticipant(_)
            | ProtocolViolation::Malformed(_) => ErrorCode::Malformed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub detail: String,
}

impl From<&ProtocolViolation> for ErrorReport {
    fn from(v: &ProtocolViolation) -> Self {
        Self {
            code: ErrorCode::from(v),
            detail: v.to_string(),
        }
    }
}
