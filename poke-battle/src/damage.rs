//! Deterministic damage resolution.
//!
//! Both peers run [`compute_damage`] on the same inputs and must agree to
//! the hit point.  All arithmetic is integral; the only random input is the
//! `roll`, which the **attacker** draws from its [`RollSource`] and ships
//! inside the ATTACK message, so the defender never rolls on its own.
//!
//! ```text
//! damage = max(1, round( atk × power × eff_q × roll
//!                        ─────────────────────────── ))
//!                         max(def,1) × 4 × 100
//! ```
//!
//! `atk`/`def` are Attack/Defense for physical moves and Sp. Attack/Sp.
//! Defense for special ones; `eff_q` is the type effectiveness in quarter
//! steps (see [`crate::types`]).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::creature::{Creature, DamageCategory, Move};

/// Lowest roll an attacker may declare (85 %).
pub const MIN_ROLL: u8 = 85;
/// Highest roll an attacker may declare (100 %).
pub const MAX_ROLL: u8 = 100;

pub fn roll_in_range(roll: u8) -> bool {
    (MIN_ROLL..=MAX_ROLL).contains(&roll)
}

/// Damage `attacker` deals to `defender` with `mv` at the given roll.
pub fn compute_damage(attacker: &Creature, defender: &Creature, mv: &Move, roll: u8) -> u32 {
    let (atk, def) = match mv.category {
        DamageCategory::Physical => (attacker.stats.attack, defender.stats.defense),
        DamageCategory::Special => (attacker.stats.sp_attack, defender.stats.sp_defense),
    };
    let eff_q = mv.move_type.quarter_steps_against(&defender.types);

    let num = u64::from(atk) * u64::from(mv.power) * u64::from(eff_q) * u64::from(roll);
    let den = u64::from(def.max(1)) * 4 * 100;
    // Round half up.
    let raw = (2 * num + den) / (2 * den);
    raw.clamp(1, u64::from(u32::MAX)) as u32
}

/// Source of damage rolls for the local side.
///
/// Seeded from the session seed so a replayed session draws the same rolls;
/// the value actually used is always the one carried on the wire.
#[derive(Debug)]
pub struct RollSource {
    rng: StdRng,
}

impl RollSource {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw the next roll in `MIN_ROLL..=MAX_ROLL`.
    pub fn next_roll(&mut self) -> u8 {
        self.rng.gen_range(MIN_ROLL..=MAX_ROLL)
    }
}
