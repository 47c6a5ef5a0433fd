//! # poke-battle
//!
//! Rules for a two-player, turn-based creature battle.
//!
//! ## Modules
//!
//! | Module       | Purpose                                                  |
//! |--------------|----------------------------------------------------------|
//! | [`types`]    | Eighteen elemental types and the effectiveness chart     |
//! | [`creature`] | Moves, stats, creatures and the in-battle participant    |
//! | [`dex`]      | Data-loader trait, built-in roster, moveset generation   |
//! | [`damage`]   | Integer damage formula and the attacker's roll source    |
//! | [`payload`]  | ATTACK / STATUS / CHAT / ERROR message bodies            |
//! | [`battle`]   | Turn-taking state machine, one per peer                  |
//! | [`error`]    | Peer violations and locally refused actions              |
//!
//! Nothing here does I/O.  The networking crate feeds a [`BattleSession`]
//! with payloads that have already been sequenced and deduplicated.

pub mod battle;
pub mod creature;
pub mod damage;
pub mod dex;
pub mod error;
pub mod payload;
pub mod types;

pub use battle::{BattleSession, BattleSnapshot, BattleStatus, ParticipantView, Role, StatusOutcome, TurnState};
pub use creature::{BattleParticipant, Creature, DamageCategory, Move, Stats};
pub use damage::{compute_damage, RollSource, MAX_ROLL, MIN_ROLL};
pub use dex::{BuiltinDex, Dex};
pub use error::{BattleError, ProtocolViolation};
pub use payload::{AttackDeclaration, ChatMessage, ErrorCode, ErrorReport, StatusReport};
pub use types::ElementType;
