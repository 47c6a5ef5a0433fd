//! Creatures, moves, and the live battle participant.
//!
//! A [`Creature`] is the immutable description a peer announces during the
//! handshake: name, types, base stats and its (at most four) moves.  A
//! [`BattleParticipant`] wraps one with the mutable current HP.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolViolation;
use crate::types::ElementType;

/// Most moves a creature may carry into battle.
pub const MAX_MOVES: usize = 4;

/// Upper bound accepted for a move's power.
pub const MAX_POWER: u32 = 250;

/// Which stat pair a move reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DamageCategory {
    /// Attack vs. Defense.
    Physical,
    /// Sp. Attack vs. Sp. Defense.
    Special,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub name: String,
    pub move_type: ElementType,
    pub power: u32,
    pub category: DamageCategory,
}

impl Move {
    pub fn new(name: &str, move_type: ElementType, power: u32, category: DamageCategory) -> Self {
        Self {
            name: name.to_string(),
            move_type,
            power,
            category,
        }
    }
}

/// Base stats.  `hp` doubles as max HP in battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub hp: u32,
    pub attack: u32,
    pub defense: u32,
    pub sp_attack: u32,
    pub sp_defense: u32,
    pub speed: u32,
}

/// A creature as announced to the opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creature {
    pub name: String,
    /// One or two elemental types.
    pub types: Vec<ElementType>,
    pub stats: Stats,
    pub moves: Vec<Move>,
}

impl Creature {
    /// Look up one of this creature's moves by name (case-insensitive).
    pub fn find_move(&self, name: &str) -> Option<&Move> {
        self.moves
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Reject announcements the battle rules cannot work with.
    ///
    /// Called on the opponent's creature when it arrives in HELLO / HELLO_ACK.
    pub fn validate(&self) -> Result<(), ProtocolViolation> {
        let bad = |why: &str| Err(ProtocolViolation::InvalidParticipant(why.to_string()));
        if self.name.trim().is_empty() {
            return bad("empty name");
        }
        if self.types.is_empty() || self.types.len() > 2 {
            return bad("a creature has one or two types");
        }
        if self.stats.hp == 0 {
            return bad("max HP must be positive");
        }
        if self.moves.is_empty() || self.moves.len() > MAX_MOVES {
            return bad("a creature carries one to four moves");
        }
        if let Some(m) = self.moves.iter().find(|m| m.power == 0 || m.power > MAX_POWER) {
            return Err(ProtocolViolation::InvalidParticipant(format!(
                "move `{}` has out-of-range power {}",
                m.name, m.power
            )));
        }
        Ok(())
    }
}

/// A creature in battle: the announcement plus current HP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleParticipant {
    pub creature: Creature,
    hp: u32,
}

impl BattleParticipant {
    /// Enter battle at full HP.
    pub fn new(creature: Creature) -> Self {
        let hp = creature.stats.hp;
        Self { creature, hp }
    }

    pub fn hp(&self) -> u32 {
        self.hp
    }

    pub fn max_hp(&self) -> u32 {
        self.creature.stats.hp
    }

    pub fn name(&self) -> &str {
        &self.creature.name
    }

    /// Subtract `damage`, clamping at zero.  Returns the remaining HP.
    pub fn apply_damage(&mut self, damage: u32) -> u32 {
        self.hp = self.hp.saturating_sub(damage);
        self.hp
    }

    /// Overwrite HP with a value reported by the peer that owns this creature.
    pub fn set_hp(&mut self, hp: u32) {
        self.hp = hp.min(self.max_hp());
    }

    pub fn is_fainted(&self) -> bool {
        self.hp == 0
    }
}
