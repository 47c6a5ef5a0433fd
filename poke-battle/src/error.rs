//! Error types for the battle rules.
//!
//! [`ProtocolViolation`] covers anything the **peer** did wrong; the offending
//! message is rejected and the session carries on.  [`BattleError`] covers
//! local requests that the rules refuse (attacking out of turn, unknown move).

use thiserror::Error;

/// A message from the peer that breaks the battle rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("attack received out of turn")]
    OutOfTurn,
    #[error("battle is already over")]
    BattleOver,
    #[error("move `{0}` is not in the attacker's moveset")]
    UnknownMove(String),
    #[error("roll {0} outside the allowed range")]
    InvalidRoll(u8),
    #[error("status report does not match an outstanding attack")]
    UnexpectedStatus,
    #[error("reported damage {reported} disagrees with local computation {expected}")]
    Desync { reported: u32, expected: u32 },
    #[error("invalid participant: {0}")]
    InvalidParticipant(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// A local request refused by the rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BattleError {
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("waiting for the result of the previous attack")]
    AttackOutstanding,
    #[error("the battle is over")]
    BattleOver,
    #[error("unknown move `{0}`")]
    UnknownMove(String),
}
