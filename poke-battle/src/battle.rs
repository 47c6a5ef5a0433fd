//! Turn-based battle state machine.
//!
//! One [`BattleSession`] exists per established session, on each peer.  It
//! never sees sequence numbers: the reliability layer hands it in-order,
//! deduplicated payloads and it answers with payloads to send back.
//!
//! ```text
//!        declare_attack                 receive_status
//!   MyTurn ─────────────► AwaitingStatus ─────────────► WaitingForTurn
//!     ▲                                                       │
//!     └──────────────── receive_attack (send STATUS) ◄────────┘
//!
//!   any HP reaching 0 ──► Ended { winner }
//! ```
//!
//! The defender owns its creature's HP.  It resolves the attack, applies the
//! damage and reports both HP values in a STATUS; the attacker checks the
//! reported damage against its own computation and adopts the defender's
//! figure either way, flagging a mismatch so the caller can complain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::creature::{BattleParticipant, Creature};
use crate::damage::{compute_damage, roll_in_range};
use crate::error::{BattleError, ProtocolViolation};
use crate::payload::{AttackDeclaration, ErrorReport, StatusReport};

/// Which end of the session a peer is.  The host always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Host,
    Client,
}

impl Role {
    pub fn opponent(self) -> Role {
        match self {
            Role::Host => Role::Client,
            Role::Client => Role::Host,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Local view of the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnState {
    /// We may declare one attack.
    MyTurn,
    /// Our attack is out; waiting for the defender's STATUS.
    AwaitingStatus,
    /// The opponent's turn.
    WaitingForTurn,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BattleStatus {
    Ongoing,
    Ended { winner: Role },
}

/// Result of applying a STATUS to our own attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusOutcome {
    pub report: StatusReport,
    /// Set when the defender's numbers disagree with ours.  The report has
    /// been applied regardless.
    pub mismatch: Option<ProtocolViolation>,
}

/// Read-only view of one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    pub name: String,
    pub hp: u32,
    pub max_hp: u32,
    pub moves: Vec<String>,
}

impl ParticipantView {
    fn of(p: &BattleParticipant) -> Self {
        Self {
            name: p.name().to_string(),
            hp: p.hp(),
            max_hp: p.max_hp(),
            moves: p.creature.moves.iter().map(|m| m.name.clone()).collect(),
        }
    }
}

/// Point-in-time copy of the battle for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BattleSnapshot {
    pub role: Role,
    pub local: ParticipantView,
    pub remote: ParticipantView,
    pub whose_turn: Role,
    pub turn_state: TurnState,
    pub status: BattleStatus,
    /// Attacks resolved so far, by either side.
    pub turns: u32,
}

pub struct BattleSession {
    role: Role,
    local: BattleParticipant,
    remote: BattleParticipant,
    whose_turn: Role,
    status: BattleStatus,
    /// Our declared attack, until its STATUS (or a rejecting ERROR) arrives.
    outstanding: Option<AttackDeclaration>,
    turns: u32,
}

impl BattleSession {
    /// Start a battle at full HP with the host to move.
    pub fn new(role: Role, local: Creature, remote: Creature) -> Self {
        log::info!(
            "[battle] {} vs {} ({} moves first)",
            local.name,
            remote.name,
            Role::Host
        );
        Self {
            role,
            local: BattleParticipant::new(local),
            remote: BattleParticipant::new(remote),
            whose_turn: Role::Host,
            status: BattleStatus::Ongoing,
            outstanding: None,
            turns: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local(&self) -> &BattleParticipant {
        &self.local
    }

    pub fn remote(&self) -> &BattleParticipant {
        &self.remote
    }

    pub fn whose_turn(&self) -> Role {
        self.whose_turn
    }

    pub fn status(&self) -> BattleStatus {
        self.status
    }

    pub fn is_over(&self) -> bool {
        matches!(self.status, BattleStatus::Ended { .. })
    }

    pub fn outstanding(&self) -> Option<&AttackDeclaration> {
        self.outstanding.as_ref()
    }

    pub fn turn_state(&self) -> TurnState {
        if self.is_over() {
            TurnState::Ended
        } else if self.outstanding.is_some() {
            TurnState::AwaitingStatus
        } else if self.whose_turn == self.role {
            TurnState::MyTurn
        } else {
            TurnState::WaitingForTurn
        }
    }

    pub fn snapshot(&self) -> BattleSnapshot {
        BattleSnapshot {
            role: self.role,
            local: ParticipantView::of(&self.local),
            remote: ParticipantView::of(&self.remote),
            whose_turn: self.whose_turn,
            turn_state: self.turn_state(),
            status: self.status,
            turns: self.turns,
        }
    }

    // -----------------------------------------------------------------------
    // Attacker side
    // -----------------------------------------------------------------------

    /// Declare our one attack for this turn.
    ///
    /// `roll` is drawn by the caller and travels with the declaration.  A
    /// second call before the STATUS arrives is refused, not queued.
    pub fn declare_attack(
        &mut self,
        move_name: &str,
        roll: u8,
    ) -> Result<AttackDeclaration, BattleError> {
        if self.is_over() {
            return Err(BattleError::BattleOver);
        }
        if self.outstanding.is_some() {
            return Err(BattleError::AttackOutstanding);
        }
        if self.whose_turn != self.role {
            return Err(BattleError::NotYourTurn);
        }
        let mv = self
            .local
            .creature
            .find_move(move_name)
            .ok_or_else(|| BattleError::UnknownMove(move_name.to_string()))?;

        let decl = AttackDeclaration {
            move_name: mv.name.clone(),
            power: mv.power,
            roll,
        };
        log::debug!(
            "[battle] → ATTACK {} power={} roll={}",
            decl.move_name, decl.power, decl.roll
        );
        self.outstanding = Some(decl.clone());
        Ok(decl)
    }

    /// Apply the defender's STATUS for our outstanding attack.
    pub fn receive_status(
        &mut self,
        report: &StatusReport,
    ) -> Result<StatusOutcome, ProtocolViolation> {
        let attack = match &self.outstanding {
            Some(a) if report.attacker == self.role && a.move_name == report.move_name => a.clone(),
            _ => return Err(ProtocolViolation::UnexpectedStatus),
        };
        self.outstanding = None;

        let opponent = self.role.opponent();
        let expected = self
            .local
            .creature
            .find_move(&attack.move_name)
            .map(|mv| compute_damage(&self.local.creature, &self.remote.creature, mv, attack.roll))
            .unwrap_or(0);
        let predicted_hp = self.remote.hp().saturating_sub(expected);
        let reported_hp = report.hp_of(opponent);

        let mismatch = if report.damage != expected || reported_hp != predicted_hp {
            log::warn!(
                "[battle] desync: peer reports {} damage (hp {}), expected {} (hp {})",
                report.damage, reported_hp, expected, predicted_hp
            );
            Some(ProtocolViolation::Desync {
                reported: report.damage,
                expected,
            })
        } else {
            None
        };

        // The defender owns its HP.
        self.remote.set_hp(reported_hp);
        self.turns += 1;
        log::debug!(
            "[battle] ← STATUS {} dealt {} → {} hp={}",
            attack.move_name,
            report.damage,
            self.remote.name(),
            self.remote.hp()
        );

        if self.remote.is_fainted() {
            self.finish(self.role);
        } else {
            self.whose_turn = opponent;
        }

        Ok(StatusOutcome {
            report: report.clone(),
            mismatch,
        })
    }

    /// Apply an ERROR the peer sent in reply to one of our messages.
    ///
    /// If it rejects our outstanding attack the attack is dropped and the
    /// turn is ours again; returns the dropped declaration.
    pub fn receive_error(&mut self, report: &ErrorReport) -> Option<AttackDeclaration> {
        if !report.code.rejects_attack() {
            return None;
        }
        let dropped = self.outstanding.take();
        if let Some(a) = &dropped {
            log::warn!(
                "[battle] peer rejected {}: {:?} ({})",
                a.move_name, report.code, report.detail
            );
        }
        dropped
    }

    // -----------------------------------------------------------------------
    // Defender side
    // -----------------------------------------------------------------------

    /// Resolve the opponent's attack against our creature.
    ///
    /// On success the returned STATUS must be sent back; it passes the turn
    /// to us.  On error nothing changed and the caller answers with ERROR.
    pub fn receive_attack(
        &mut self,
        attack: &AttackDeclaration,
    ) -> Result<StatusReport, ProtocolViolation> {
        if self.is_over() {
            return Err(ProtocolViolation::BattleOver);
        }
        let attacker = self.role.opponent();
        if self.whose_turn != attacker {
            return Err(ProtocolViolation::OutOfTurn);
        }
        let mv = match self.remote.creature.find_move(&attack.move_name) {
            Some(mv) if mv.power == attack.power => mv,
            _ => return Err(ProtocolViolation::UnknownMove(attack.move_name.clone())),
        };
        if !roll_in_range(attack.roll) {
            return Err(ProtocolViolation::InvalidRoll(attack.roll));
        }

        let damage = compute_damage(&self.remote.creature, &self.local.creature, mv, attack.roll);
        let move_name = mv.name.clone();
        self.local.apply_damage(damage);
        self.turns += 1;
        log::debug!(
            "[battle] ← ATTACK {} roll={} dmg={} → {} hp={}",
            move_name,
            attack.roll,
            damage,
            self.local.name(),
            self.local.hp()
        );

        let winner = if self.local.is_fainted() {
            self.finish(attacker);
            Some(attacker)
        } else {
            self.whose_turn = self.role;
            None
        };

        Ok(StatusReport {
            attacker,
            move_name,
            damage,
            roll: attack.roll,
            host_hp: self.hp_of(Role::Host),
            client_hp: self.hp_of(Role::Client),
            next_turn: self.role,
            winner,
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn hp_of(&self, role: Role) -> u32 {
        if role == self.role {
            self.local.hp()
        } else {
            self.remote.hp()
        }
    }

    fn finish(&mut self, winner: Role) {
        self.status = BattleStatus::Ended { winner };
        self.outstanding = None;
        log::info!("[battle] ENDED, {winner} wins");
    }
}
