//! Elemental types and the type-effectiveness chart.
//!
//! Effectiveness is stored in **half-steps** rather than floats so that both
//! peers evaluate damage with identical integer arithmetic:
//!
//! | Half-steps | Multiplier | Meaning              |
//! |-----------:|-----------:|----------------------|
//! | 0          | 0×         | immune               |
//! | 1          | ½×         | not very effective   |
//! | 2          | 1×         | neutral              |
//! | 4          | 2×         | super effective      |

use serde::{Deserialize, Serialize};

/// The eighteen elemental types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementType {
    Normal = 0,
    Fire = 1,
    Water = 2,
    Electric = 3,
    Grass = 4,
    Ice = 5,
    Fighting = 6,
    Poison = 7,
    Ground = 8,
    Flying = 9,
    Psychic = 10,
    Bug = 11,
    Rock = 12,
    Ghost = 13,
    Dragon = 14,
    Dark = 15,
    Steel = 16,
    Fairy = 17,
}

impl ElementType {
    pub const ALL: [ElementType; 18] = [
        ElementType::Normal,
        ElementType::Fire,
        ElementType::Water,
        ElementType::Electric,
        ElementType::Grass,
        ElementType::Ice,
        ElementType::Fighting,
        ElementType::Poison,
        ElementType::Ground,
        ElementType::Flying,
        ElementType::Psychic,
        ElementType::Bug,
        ElementType::Rock,
        ElementType::Ghost,
        ElementType::Dragon,
        ElementType::Dark,
        ElementType::Steel,
        ElementType::Fairy,
    ];

    /// Effectiveness of this (attacking) type against one defending type,
    /// in half-steps.
    pub fn half_steps_against(self, defender: ElementType) -> u32 {
        u32::from(CHART[self as usize][defender as usize])
    }

    /// Effectiveness against a one- or two-type defender, in **quarter**
    /// steps (4 = neutral).
    ///
    /// A single-typed defender contributes `half_steps × 2`; a dual-typed one
    /// contributes the product of both half-step values.  Types past the
    /// second are ignored.
    pub fn quarter_steps_against(self, defenders: &[ElementType]) -> u32 {
        match defenders {
            [] => 4,
            [only] => self.half_steps_against(*only) * 2,
            [first, second, ..] => {
                self.half_steps_against(*first) * self.half_steps_against(*second)
            }
        }
    }

    /// Case-insensitive parse.
    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Normal => "Normal",
            ElementType::Fire => "Fire",
            ElementType::Water => "Water",
            ElementType::Electric => "Electric",
            ElementType::Grass => "Grass",
            ElementType::Ice => "Ice",
            ElementType::Fighting => "Fighting",
            ElementType::Poison => "Poison",
            ElementType::Ground => "Ground",
            ElementType::Flying => "Flying",
            ElementType::Psychic => "Psychic",
            ElementType::Bug => "Bug",
            ElementType::Rock => "Rock",
            ElementType::Ghost => "Ghost",
            ElementType::Dragon => "Dragon",
            ElementType::Dark => "Dark",
            ElementType::Steel => "Steel",
            ElementType::Fairy => "Fairy",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const X: u8 = 0;
const R: u8 = 1;
const N: u8 = 2;
const S: u8 = 4;

// Row = attacking type, column = defending type, both in `ElementType::ALL` order.
#[rustfmt::skip]
static CHART: [[u8; 18]; 18] = [
    [N, N, N, N, N, N, N, N, N, N, N, N, R, X, N, N, R, N], // Normal
    [N, R, R, N, S, S, N, N, N, N, N, S, R, N, R, N, S, N], // Fire
    [N, S, R, N, R, N, N, N, S, N, N, N, S, N, R, N, N, N], // Water
    [N, N, S, R, R, N, N, N, X, S, N, N, N, N, R, N, N, N], // Electric
    [N, R, S, N, R, N, N, R, S, R, N, R, S, N, R, N, R, N], // Grass
    [N, R, R, N, S, R, N, N, S, S, N, N, N, N, S, N, R, N], // Ice
    [S, N, N, N, N, S, N, R, N, R, R, R, S, X, N, S, S, R], // Fighting
    [N, N, N, N, S, N, N, R, R, N, N, N, R, R, N, N, X, S], // Poison
    [N, S, N, S, R, N, N, S, N, X, N, R, S, N, N, N, S, N], // Ground
    [N, N, N, R, S, N, S, N, N, N, N, S, R, N, N, N, R, N], // Flying
    [N, N, N, N, N, N, S, S, N, N, R, N, N, N, N, X, R, N], // Psychic
    [N, R, N, N, S, N, R, R, N, R, S, N, N, R, N, S, R, R], // Bug
    [N, S, N, N, N, S, R, N, R, S, N, S, N, N, N, N, R, N], // Rock
    [X, N, N, N, N, N, N, N, N, N, S, N, N, S, N, R, N, N], // Ghost
    [N, N, N, N, N, N, N, N, N, N, N, N, N, N, S, N, R, X], // Dragon
    [N, N, N, N, N, N, R, N, N, N, S, N, N, S, N, R, N, R], // Dark
    [N, R, R, R, N, S, N, N, N, N, N, N, S, N, N, N, R, S], // Steel
    [N, R, N, N, N, N, S, R, N, N, N, N, N, N, S, S, R, N], // Fairy
];
