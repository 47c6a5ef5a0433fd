//! Creature and move lookup.
//!
//! The battle engine consumes data through the [`Dex`] trait and calls it
//! once, when the local player picks a creature.  [`BuiltinDex`] is a small
//! fixed roster good enough to play and test with; a richer loader only has
//! to implement the trait.

use std::collections::BTreeMap;

use crate::creature::{Creature, DamageCategory, Move, Stats, MAX_MOVES};
use crate::types::ElementType;

/// Data-loader interface.
pub trait Dex {
    /// Base stats, types and a generated moveset for `name`.
    fn lookup_creature(&self, name: &str) -> Option<Creature>;

    fn lookup_move(&self, name: &str) -> Option<Move>;

    /// Every creature name this dex knows, in display order.
    fn creature_names(&self) -> Vec<String>;
}

/// Moves every creature can fall back on.
const COMMON_MOVES: [&str; 3] = ["Tackle", "Quick Attack", "Scratch"];

fn builtin_moves() -> Vec<Move> {
    use DamageCategory::*;
    use ElementType::*;
    vec![
        Move::new("Tackle", Normal, 40, Physical),
        Move::new("Quick Attack", Normal, 40, Physical),
        Move::new("Scratch", Normal, 40, Physical),
        Move::new("Ember", Fire, 40, Special),
        Move::new("Water Gun", Water, 40, Special),
        Move::new("Thunderbolt", Electric, 90, Special),
        Move::new("Vine Whip", Grass, 45, Physical),
    ]
}

struct Entry {
    types: Vec<ElementType>,
    stats: Stats,
}

const fn stats(hp: u32, attack: u32, defense: u32, sp_attack: u32, sp_defense: u32, speed: u32) -> Stats {
    Stats {
        hp,
        attack,
        defense,
        sp_attack,
        sp_defense,
        speed,
    }
}

/// Fixed in-memory roster.
pub struct BuiltinDex {
    order: Vec<String>,
    creatures: BTreeMap<String, Entry>,
    moves: Vec<Move>,
}

impl Default for BuiltinDex {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinDex {
    pub fn new() -> Self {
        use ElementType::*;
        let roster: [(&str, &[ElementType], Stats); 8] = [
            ("Bulbasaur", &[Grass, Poison], stats(45, 49, 49, 65, 65, 45)),
            ("Charmander", &[Fire], stats(39, 52, 43, 60, 50, 65)),
            ("Squirtle", &[Water], stats(44, 48, 65, 50, 64, 43)),
            ("Pikachu", &[Electric], stats(35, 55, 40, 50, 50, 90)),
            ("Eevee", &[Normal], stats(55, 55, 50, 45, 65, 55)),
            ("Growlithe", &[Fire], stats(55, 70, 45, 70, 50, 60)),
            ("Psyduck", &[Water], stats(50, 52, 48, 65, 50, 55)),
            ("Oddish", &[Grass, Poison], stats(45, 50, 55, 75, 65, 30)),
        ];

        let mut order = Vec::with_capacity(roster.len());
        let mut creatures = BTreeMap::new();
        for (name, types, stats) in roster {
            order.push(name.to_string());
            creatures.insert(
                name.to_ascii_lowercase(),
                Entry {
                    types: types.to_vec(),
                    stats,
                },
            );
        }

        Self {
            order,
            creatures,
            moves: builtin_moves(),
        }
    }
}

impl Dex for BuiltinDex {
    fn lookup_creature(&self, name: &str) -> Option<Creature> {
        let key = name.trim().to_ascii_lowercase();
        let entry = self.creatures.get(&key)?;
        let display = self
            .order
            .iter()
            .find(|n| n.eq_ignore_ascii_case(&key))
            .cloned()
            .unwrap_or(key);
        Some(Creature {
            name: display,
            types: entry.types.clone(),
            stats: entry.stats,
            moves: generate_moveset(&entry.types, &self.moves),
        })
    }

    fn lookup_move(&self, name: &str) -> Option<Move> {
        self.moves
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    fn creature_names(&self) -> Vec<String> {
        self.order.clone()
    }
}

/// Pick up to four moves for a creature of the given types.
///
/// Same-type moves come first, strongest first; then the common Normal
/// moves; then whatever is strongest among the rest.
pub fn generate_moveset(types: &[ElementType], table: &[Move]) -> Vec<Move> {
    let mut picks: Vec<Move> = Vec::with_capacity(MAX_MOVES);
    let push = |picks: &mut Vec<Move>, m: &Move| {
        if picks.len() < MAX_MOVES && !picks.iter().any(|p| p.name == m.name) {
            picks.push(m.clone());
        }
    };

    let mut preferred: Vec<&Move> = table
        .iter()
        .filter(|m| types.contains(&m.move_type))
        .collect();
    preferred.sort_by(|a, b| b.power.cmp(&a.power));
    for m in preferred {
        push(&mut picks, m);
    }

    for name in COMMON_MOVES {
        if let Some(m) = table.iter().find(|m| m.name == name) {
            push(&mut picks, m);
        }
    }

    let mut rest: Vec<&Move> = table.iter().collect();
    rest.sort_by(|a, b| b.power.cmp(&a.power));
    for m in rest {
        push(&mut picks, m);
    }

    picks
}
