//! Session / handshake manager.
//!
//! A [`Session`] is one battle between exactly two peers.  It owns the
//! transport, the [`ReliableChannel`] to the peer once one is known, the
//! [`BattleSession`] once the handshake completes, and a queue of
//! [`SessionEvent`]s for whoever renders the battle.
//!
//! # Handshake
//!
//! ```text
//!  client                                   host
//!    │                                        │ LISTENING
//!    │── HELLO(seq 1, trainer, creature) ────▶│ records peer, HANDSHAKING
//!    │◀──────────────────────────── ACK(1) ───│
//!    │ HANDSHAKING                            │
//!    │◀── HELLO_ACK(seq 1, creature, seed) ───│ ESTABLISHED
//!    │── ACK(1) ─────────────────────────────▶│
//!    │ ESTABLISHED                            │
//! ```
//!
//! Both HELLO and HELLO_ACK ride the reliable channel, so a lost datagram is
//! retransmitted like any other; a client whose HELLO exhausts the retry
//! budget fails with [`SessionError::HandshakeFailure`].  So does one whose
//! HELLO was acknowledged but no HELLO_ACK follows within that same budget.
//!
//! # Driving
//!
//! Nothing blocks.  The owner calls [`Session::poll`] on a short fixed
//! cadence and the user-facing operations ([`Session::submit_attack`],
//! [`Session::submit_chat`], [`Session::request_quit`]) between polls, all
//! from one loop.  [`crate::driver`] provides that loop on a tokio task.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use poke_battle::{
    AttackDeclaration, BattleSession, BattleSnapshot, ChatMessage, Creature, ErrorReport,
    ProtocolViolation, Role, RollSource, StatusReport, TurnState, MIN_ROLL,
};

use crate::error::{ReliabilityError, SessionError, TransportError};
use crate::message::{Goodbye, Hello, HelloAck, Message, MAX_TRAINER_LEN, PROTOCOL_VERSION};
use crate::packet::{Kind, Packet};
use crate::reliability::{Delivery, ReliableChannel};
use crate::socket::Transport;
use crate::state::{CloseReason, SessionState};
use crate::timer::RetransmitConfig;

/// Mixed into the session seed so the two sides draw different rolls.
const HOST_ROLL_SALT: u64 = 0x686f_7374;
const CLIENT_ROLL_SALT: u64 = 0x636c_6e74;

/// The local player's announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPlayer {
    pub trainer: String,
    pub creature: Creature,
}

impl LocalPlayer {
    /// Check that the announcement fits in a HELLO / HELLO_ACK.
    pub fn validate(&self) -> Result<(), SessionError> {
        let len = self.trainer.chars().count();
        if self.trainer.trim().is_empty() || len > MAX_TRAINER_LEN {
            return Err(SessionError::Encode(format!(
                "trainer name must be 1..={MAX_TRAINER_LEN} characters, got {len}"
            )));
        }
        self.creature
            .validate()
            .map_err(|v| SessionError::Encode(v.to_string()))
    }
}

/// Something the presentation layer should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established {
        role: Role,
        peer: SocketAddr,
        opponent_trainer: String,
        opponent: Creature,
    },
    /// An attack by either side was resolved.
    AttackResolved(StatusReport),
    ChatReceived(ChatMessage),
    BattleEnded { winner: Role },
    /// The peer refused one of our messages.
    Rejected(ErrorReport),
    /// The peer sent something the rules do not allow; it was dropped.
    ProtocolViolation(ProtocolViolation),
    Closed(CloseReason),
}

/// Read-only view for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub role: Role,
    pub local_addr: SocketAddr,
    pub peer: Option<SocketAddr>,
    pub trainer: String,
    pub opponent_trainer: Option<String>,
    pub battle: Option<BattleSnapshot>,
    /// Messages still awaiting acknowledgement.
    pub pending: usize,
    pub last_heard: Option<Instant>,
    pub close_reason: Option<CloseReason>,
}

pub struct Session<T: Transport> {
    transport: T,
    state: SessionState,
    role: Role,
    local: LocalPlayer,
    config: RetransmitConfig,
    peer: Option<SocketAddr>,
    channel: Option<ReliableChannel>,
    battle: Option<BattleSession>,
    rolls: Option<RollSource>,
    /// Host: chosen at start.  Client: learned from HELLO_ACK.
    seed: u64,
    /// Client only: sequence number of our HELLO.
    hello_seq: Option<u32>,
    /// Client only: HELLO_ACK must arrive before this.
    handshake_deadline: Option<Instant>,
    opponent_trainer: Option<String>,
    events: VecDeque<SessionEvent>,
    close_reason: Option<CloseReason>,
}

impl<T: Transport> Session<T> {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    fn new(transport: T, role: Role, local: LocalPlayer, config: RetransmitConfig) -> Self {
        Self {
            transport,
            state: SessionState::Idle,
            role,
            local,
            config,
            peer: None,
            channel: None,
            battle: None,
            rolls: None,
            seed: 0,
            hello_seq: None,
            handshake_deadline: None,
            opponent_trainer: None,
            events: VecDeque::new(),
            close_reason: None,
        }
    }

    /// Wait for a HELLO from anyone on `transport`.
    pub fn host(transport: T, local: LocalPlayer, config: RetransmitConfig) -> Self {
        Self::host_with_seed(transport, local, config, rand::random())
    }

    /// As [`Session::host`], with a fixed seed for reproducible rolls.
    pub fn host_with_seed(
        transport: T,
        local: LocalPlayer,
        config: RetransmitConfig,
        seed: u64,
    ) -> Self {
        let mut s = Self::new(transport, Role::Host, local, config);
        s.seed = seed;
        s.state = SessionState::Listening;
        log::info!(
            "[session] LISTENING on {} as {} with {}",
            s.transport.local_addr(),
            s.local.trainer,
            s.local.creature.name
        );
        s
    }

    /// Send HELLO to `peer` and start the handshake.
    pub fn connect(
        transport: T,
        peer: SocketAddr,
        local: LocalPlayer,
        config: RetransmitConfig,
        now: Instant,
    ) -> Result<Self, SessionError> {
        local.validate()?;
        let mut s = Self::new(transport, Role::Client, local, config);
        s.peer = Some(peer);
        s.channel = Some(ReliableChannel::new(peer, config));
        s.state = SessionState::Connecting;

        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            trainer: s.local.trainer.clone(),
            participant: s.local.creature.clone(),
        };
        let seq = s.send_message(Message::Hello(hello), now)?;
        s.hello_seq = Some(seq);
        log::info!(
            "[session] CONNECTING {} → {peer} as {} with {}",
            s.transport.local_addr(),
            s.local.trainer,
            s.local.creature.name
        );
        Ok(s)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local(&self) -> &LocalPlayer {
        &self.local
    }

    pub fn battle(&self) -> Option<&BattleSession> {
        self.battle.as_ref()
    }

    pub fn channel(&self) -> Option<&ReliableChannel> {
        self.channel.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            role: self.role,
            local_addr: self.transport.local_addr(),
            peer: self.peer,
            trainer: self.local.trainer.clone(),
            opponent_trainer: self.opponent_trainer.clone(),
            battle: self.battle.as_ref().map(BattleSession::snapshot),
            pending: self.channel.as_ref().map_or(0, ReliableChannel::pending_count),
            last_heard: self.channel.as_ref().and_then(ReliableChannel::last_heard),
            close_reason: self.close_reason.clone(),
        }
    }

    /// Give back the transport so a brand-new session can reuse the port.
    pub fn into_transport(self) -> T {
        self.transport
    }

    // -----------------------------------------------------------------------
    // User operations
    // -----------------------------------------------------------------------

    /// Declare an attack with one of our moves.  The roll is drawn here and
    /// travels in the ATTACK.
    pub fn submit_attack(
        &mut self,
        move_name: &str,
        now: Instant,
    ) -> Result<AttackDeclaration, SessionError> {
        self.require_established()?;
        let (battle, rolls) = match (self.battle.as_mut(), self.rolls.as_mut()) {
            (Some(b), Some(r)) => (b, r),
            _ => return Err(SessionError::BadState(self.state)),
        };
        let roll = if battle.turn_state() == TurnState::MyTurn {
            rolls.next_roll()
        } else {
            // Refused below; keep the roll sequence untouched.
            MIN_ROLL
        };
        let decl = battle.declare_attack(move_name, roll)?;
        self.send_message(Message::Attack(decl.clone()), now)?;
        Ok(decl)
    }

    pub fn submit_chat(&mut self, text: &str, now: Instant) -> Result<(), SessionError> {
        self.require_established()?;
        let chat = ChatMessage {
            sender: self.local.trainer.clone(),
            text: text.to_string(),
        };
        self.send_message(Message::Chat(chat), now)?;
        Ok(())
    }

    /// Send a best-effort BYE and close immediately.
    pub fn request_quit(&mut self) {
        if self.state.is_closed() {
            return;
        }
        if let Some(channel) = self.channel.as_mut() {
            let body = Message::Bye(Goodbye::default()).encode_body().unwrap_or_default();
            if let Err(e) = channel.send_unreliable(&self.transport, Kind::Bye, body) {
                log::debug!("[session] BYE not sent: {e}");
            }
        }
        self.close(CloseReason::LocalQuit);
    }

    // -----------------------------------------------------------------------
    // Event loop step
    // -----------------------------------------------------------------------

    /// Process everything the network has for us and service
    /// retransmissions.  Call on every tick.
    ///
    /// Fatal errors close the session, queue a `Closed` event, and are
    /// returned once; later polls are no-ops.
    pub fn poll(&mut self, now: Instant) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Closing | SessionState::Closed => return Ok(()),
            SessionState::Listening => {
                self.poll_listening(now)?;
                if self.channel.is_none() || self.state.is_closed() {
                    return Ok(());
                }
            }
            _ => {}
        }

        let result = match self.channel.as_mut() {
            Some(channel) => channel.poll(&self.transport, now),
            None => return Ok(()),
        };
        let deliveries = match result {
            Ok(d) => d,
            Err(e) => return Err(self.fail(e)),
        };

        if self.state == SessionState::Connecting {
            let acked = match (self.channel.as_ref(), self.hello_seq) {
                (Some(ch), Some(seq)) => !ch.is_pending(seq),
                _ => false,
            };
            if acked {
                log::info!("[session] HELLO acknowledged; HANDSHAKING");
                self.state = SessionState::Handshaking;
                let rto = self.config.initial_rto.clamp(self.config.min_rto, self.config.max_rto);
                self.handshake_deadline = Some(now + self.config.give_up_after(rto));
            }
        }

        for d in deliveries {
            self.handle_delivery(d, now)?;
            if self.state.is_closed() {
                return Ok(());
            }
        }

        let unreachable = self
            .channel
            .as_mut()
            .map_or(false, ReliableChannel::take_unreachable);
        if unreachable {
            if self.state.is_handshake() {
                return Err(self.abort_handshake("peer unreachable".into()));
            }
            log::warn!("[session] peer reported unreachable; relying on retries");
        }

        if self.state == SessionState::Handshaking
            && self.handshake_deadline.map_or(false, |d| now >= d)
        {
            let why = match self.peer {
                Some(p) => format!("no HELLO_ACK from {p}"),
                None => "no HELLO_ACK".to_string(),
            };
            return Err(self.abort_handshake(why));
        }
        Ok(())
    }

    fn poll_listening(&mut self, now: Instant) -> Result<(), SessionError> {
        loop {
            let (bytes, from) = match self.transport.try_recv_from() {
                Ok(Some(d)) => d,
                Ok(None) => return Ok(()),
                Err(TransportError::PeerUnreachable) => return Ok(()),
                Err(e) => {
                    self.close(CloseReason::Transport(e.to_string()));
                    return Err(SessionError::Transport(e));
                }
            };

            let packet = match Packet::decode(&bytes) {
                Ok(p) if p.kind == Kind::Hello && p.seq != 0 => p,
                Ok(p) => {
                    log::debug!("[session] ignoring {} from {from} while listening", p.kind);
                    continue;
                }
                Err(e) => {
                    log::debug!("[session] dropping datagram from {from}: {e}");
                    continue;
                }
            };
            let hello = match Message::decode(Kind::Hello, &packet.payload) {
                Ok(Message::Hello(h)) => h,
                Ok(_) => continue,
                Err(v) => {
                    log::warn!("[session] bad HELLO from {from}: {v}");
                    continue;
                }
            };
            if hello.protocol_version != PROTOCOL_VERSION {
                log::warn!(
                    "[session] HELLO from {from} speaks version {}; refusing",
                    hello.protocol_version
                );
                self.refuse(from, "unsupported protocol version");
                continue;
            }
            if let Err(v) = hello.participant.validate() {
                log::warn!("[session] HELLO from {from} has {v}; refusing");
                self.refuse(from, &v.to_string());
                continue;
            }
            if hello.trainer.chars().count() > MAX_TRAINER_LEN {
                log::warn!("[session] HELLO from {from} has an overlong trainer name; refusing");
                self.refuse(from, "trainer name too long");
                continue;
            }

            log::info!(
                "[session] HELLO from {from}: {} with {}; HANDSHAKING",
                hello.trainer, hello.participant.name
            );
            let mut channel = ReliableChannel::new(from, self.config);
            let result = channel.on_datagram(&self.transport, &bytes, from, now);
            self.peer = Some(from);
            self.channel = Some(channel);
            self.state = SessionState::Handshaking;

            let deliveries = match result {
                Ok(d) => d,
                Err(e) => return Err(self.fail(e)),
            };
            for d in deliveries {
                self.handle_delivery(d, now)?;
            }
            return Ok(());
        }
    }

    // -----------------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------------

    fn handle_delivery(&mut self, d: Delivery, now: Instant) -> Result<(), SessionError> {
        let msg = match Message::decode(d.kind, &d.payload) {
            Ok(m) => m,
            Err(v) => {
                log::warn!("[session] {} seq={} rejected: {v}", d.kind, d.seq);
                if d.kind == Kind::Attack {
                    self.reply_error(&v, now)?;
                }
                self.events.push_back(SessionEvent::ProtocolViolation(v));
                return Ok(());
            }
        };

        match msg {
            Message::Hello(h) => self.on_hello(h, now),
            Message::HelloAck(a) => self.on_hello_ack(a),
            Message::Attack(a) => self.on_attack(a, now),
            Message::Status(s) => self.on_status(s, now),
            Message::Error(e) => {
                if let Some(battle) = self.battle.as_mut() {
                    battle.receive_error(&e);
                }
                self.events.push_back(SessionEvent::Rejected(e));
                Ok(())
            }
            Message::Chat(c) => {
                log::info!("[session] ← CHAT {}: {}", c.sender, c.text);
                self.events.push_back(SessionEvent::ChatReceived(c));
                Ok(())
            }
            Message::Bye(g) => {
                if self.state.is_handshake() {
                    let why = g.reason.unwrap_or_else(|| "peer declined".into());
                    self.close(CloseReason::HandshakeFailure(why.clone()));
                    return Err(SessionError::HandshakeFailure(why));
                }
                log::info!("[session] ← BYE");
                self.close(CloseReason::PeerQuit { reason: g.reason });
                Ok(())
            }
        }
    }

    fn on_hello(&mut self, hello: Hello, now: Instant) -> Result<(), SessionError> {
        if self.role != Role::Host || self.state != SessionState::Handshaking {
            log::debug!("[session] ignoring HELLO while {}", self.state);
            return Ok(());
        }
        let ack = HelloAck {
            protocol_version: PROTOCOL_VERSION,
            trainer: self.local.trainer.clone(),
            participant: self.local.creature.clone(),
            seed: self.seed,
            first_turn: Role::Host,
        };
        match self.send_message(Message::HelloAck(ack), now) {
            Ok(_) => {}
            Err(SessionError::Encode(why)) => {
                log::warn!("[session] cannot answer HELLO: {why}; LISTENING again");
                if let Some(peer) = self.peer.take() {
                    self.refuse(peer, &format!("host cannot accept: {why}"));
                }
                self.channel = None;
                self.state = SessionState::Listening;
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.rolls = Some(RollSource::from_seed(self.seed ^ HOST_ROLL_SALT));
        self.establish(hello.trainer, hello.participant);
        Ok(())
    }

    fn on_hello_ack(&mut self, ack: HelloAck) -> Result<(), SessionError> {
        if self.role != Role::Client
            || !matches!(
                self.state,
                SessionState::Connecting | SessionState::Handshaking
            )
        {
            log::debug!("[session] ignoring HELLO_ACK while {}", self.state);
            return Ok(());
        }
        if ack.protocol_version != PROTOCOL_VERSION {
            return Err(self.abort_handshake(format!(
                "host speaks protocol version {}",
                ack.protocol_version
            )));
        }
        if let Err(v) = ack.participant.validate() {
            return Err(self.abort_handshake(v.to_string()));
        }
        if ack.trainer.chars().count() > MAX_TRAINER_LEN {
            return Err(self.abort_handshake("host trainer name too long".into()));
        }
        if ack.first_turn != Role::Host {
            log::warn!("[session] host proposed {} to move first; host moves first", ack.first_turn);
        }
        self.seed = ack.seed;
        self.rolls = Some(RollSource::from_seed(ack.seed ^ CLIENT_ROLL_SALT));
        self.establish(ack.trainer, ack.participant);
        Ok(())
    }

    fn establish(&mut self, opponent_trainer: String, opponent: Creature) {
        self.battle = Some(BattleSession::new(
            self.role,
            self.local.creature.clone(),
            opponent.clone(),
        ));
        self.opponent_trainer = Some(opponent_trainer.clone());
        self.handshake_deadline = None;
        self.state = SessionState::Established;
        let peer = self.peer.unwrap_or_else(|| self.transport.local_addr());
        log::info!(
            "[session] ESTABLISHED with {peer}: {} ({}) vs {} ({})",
            self.local.trainer, self.local.creature.name, opponent_trainer, opponent.name
        );
        self.events.push_back(SessionEvent::Established {
            role: self.role,
            peer,
            opponent_trainer,
            opponent,
        });
    }

    fn on_attack(&mut self, attack: AttackDeclaration, now: Instant) -> Result<(), SessionError> {
        let result = match self.battle.as_mut() {
            Some(b) => b.receive_attack(&attack),
            None => Err(ProtocolViolation::Malformed(
                "ATTACK before the battle started".into(),
            )),
        };
        match result {
            Ok(status) => {
                self.send_message(Message::Status(status.clone()), now)?;
                let winner = status.winner;
                self.events.push_back(SessionEvent::AttackResolved(status));
                if let Some(winner) = winner {
                    self.events.push_back(SessionEvent::BattleEnded { winner });
                }
            }
            Err(v) => {
                log::warn!("[session] rejecting ATTACK {}: {v}", attack.move_name);
                self.reply_error(&v, now)?;
                self.events.push_back(SessionEvent::ProtocolViolation(v));
            }
        }
        Ok(())
    }

    fn on_status(&mut self, status: StatusReport, now: Instant) -> Result<(), SessionError> {
        let result = match self.battle.as_mut() {
            Some(b) => b.receive_status(&status),
            None => Err(ProtocolViolation::UnexpectedStatus),
        };
        match result {
            Ok(outcome) => {
                let winner = outcome.report.winner;
                self.events
                    .push_back(SessionEvent::AttackResolved(outcome.report));
                if let Some(v) = outcome.mismatch {
                    self.reply_error(&v, now)?;
                    self.events.push_back(SessionEvent::ProtocolViolation(v));
                }
                if let Some(winner) = winner {
                    self.events.push_back(SessionEvent::BattleEnded { winner });
                }
            }
            // No reply: answering a stray STATUS with ERROR could ping-pong.
            Err(v) => {
                log::warn!("[session] dropping STATUS: {v}");
                self.events.push_back(SessionEvent::ProtocolViolation(v));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Outbound helpers
    // -----------------------------------------------------------------------

    fn send_message(&mut self, msg: Message, now: Instant) -> Result<u32, SessionError> {
        let kind = msg.kind();
        let body = msg
            .encode_body()
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        let channel = self
            .channel
            .as_mut()
            .ok_or(SessionError::BadState(self.state))?;
        match channel.send(&self.transport, kind, body, now) {
            Ok(seq) => Ok(seq),
            // Too large to send; the session itself is fine.
            Err(ReliabilityError::Packet(e)) => Err(SessionError::Encode(e.to_string())),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn reply_error(&mut self, violation: &ProtocolViolation, now: Instant) -> Result<(), SessionError> {
        self.send_message(Message::Error(ErrorReport::from(violation)), now)?;
        Ok(())
    }

    /// Best-effort BYE to someone we will not talk to.
    fn refuse(&self, dest: SocketAddr, reason: &str) {
        let bye = Message::Bye(Goodbye {
            reason: Some(reason.to_string()),
        });
        let sent = bye
            .encode_body()
            .ok()
            .and_then(|body| Packet::new(0, Kind::Bye, body).encode().ok())
            .map(|bytes| self.transport.send_to(&bytes, dest));
        if !matches!(sent, Some(Ok(()))) {
            log::debug!("[session] refusal to {dest} not sent");
        }
    }

    fn require_established(&self) -> Result<(), SessionError> {
        if self.state == SessionState::Established {
            Ok(())
        } else {
            Err(SessionError::BadState(self.state))
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn close(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        if let Some(channel) = self.channel.as_mut() {
            let dropped = channel.discard_pending();
            if dropped > 0 {
                log::debug!("[session] discarded {dropped} unacknowledged message(s)");
            }
        }
        self.state = SessionState::Closed;
        log::info!("[session] CLOSED: {reason}");
        self.close_reason = Some(reason.clone());
        self.events.push_back(SessionEvent::Closed(reason));
    }

    fn abort_handshake(&mut self, why: String) -> SessionError {
        if let Some(channel) = self.channel.as_mut() {
            let body = Message::Bye(Goodbye {
                reason: Some(why.clone()),
            })
            .encode_body()
            .unwrap_or_default();
            if let Err(e) = channel.send_unreliable(&self.transport, Kind::Bye, body) {
                log::debug!("[session] BYE not sent: {e}");
            }
        }
        self.close(CloseReason::HandshakeFailure(why.clone()));
        SessionError::HandshakeFailure(why)
    }

    /// Close on a fatal channel error and translate it for the user.
    fn fail(&mut self, e: ReliabilityError) -> SessionError {
        match e {
            ReliabilityError::PeerTimeout { .. } if self.state.is_handshake() => {
                let why = match self.peer {
                    Some(p) => format!("no response from {p}"),
                    None => "no response".to_string(),
                };
                self.close(CloseReason::HandshakeFailure(why.clone()));
                SessionError::HandshakeFailure(why)
            }
            ReliabilityError::PeerTimeout { .. } => {
                self.close(CloseReason::PeerTimeout);
                SessionError::PeerTimeout
            }
            other => {
                self.close(CloseReason::Transport(other.to_string()));
                SessionError::from(other)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use poke_battle::{BuiltinDex, Dex};

    use crate::simulator::{SimSocket, Simulator, SimulatorConfig};

    const TICK: Duration = Duration::from_millis(20);

    fn player(trainer: &str, creature: &str) -> LocalPlayer {
        LocalPlayer {
            trainer: trainer.into(),
            creature: BuiltinDex::new().lookup_creature(creature).unwrap(),
        }
    }

    struct Duel {
        host: Session<SimSocket>,
        client: Session<SimSocket>,
        now: Instant,
    }

    impl Duel {
        fn new(net: &Simulator) -> Self {
            let now = Instant::now();
            let host = Session::host_with_seed(
                net.bind(),
                player("Brock", "Eevee"),
                RetransmitConfig::default(),
                42,
            );
            let addr = host.transport().local_addr();
            let client = Session::connect(
                net.bind(),
                addr,
                player("Misty", "Psyduck"),
                RetransmitConfig::default(),
                now,
            )
            .unwrap();
            Self { host, client, now }
        }

        fn step(&mut self) {
            self.now += TICK;
            self.host.poll(self.now).unwrap();
            self.client.poll(self.now).unwrap();
        }

        fn settle(&mut self) {
            for _ in 0..50 {
                self.step();
            }
        }
    }

    #[test]
    fn handshake_over_clean_network() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut duel = Duel::new(&net);
        assert_eq!(duel.host.state(), SessionState::Listening);
        assert_eq!(duel.client.state(), SessionState::Connecting);

        duel.settle();
        assert_eq!(duel.host.state(), SessionState::Established);
        assert_eq!(duel.client.state(), SessionState::Established);
        assert_eq!(duel.client.seed(), 42);

        match duel.client.next_event() {
            Some(SessionEvent::Established {
                role,
                opponent_trainer,
                opponent,
                ..
            }) => {
                assert_eq!(role, Role::Client);
                assert_eq!(opponent_trainer, "Brock");
                assert_eq!(opponent.name, "Eevee");
            }
            other => panic!("expected Established, got {other:?}"),
        }
        let snap = duel.host.snapshot();
        assert_eq!(snap.opponent_trainer.as_deref(), Some("Misty"));
        assert_eq!(snap.battle.unwrap().turn_state, TurnState::MyTurn);
        assert_eq!(snap.pending, 0);
    }

    #[test]
    fn operations_before_established_are_refused() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut duel = Duel::new(&net);
        let now = duel.now;
        assert!(matches!(
            duel.client.submit_chat("hello?", now),
            Err(SessionError::BadState(SessionState::Connecting))
        ));
        assert!(matches!(
            duel.host.submit_attack("Tackle", now),
            Err(SessionError::BadState(SessionState::Listening))
        ));
    }

    #[test]
    fn attack_resolves_on_both_sides() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut duel = Duel::new(&net);
        duel.settle();
        duel.host.drain_events();
        duel.client.drain_events();

        let decl = duel.host.submit_attack("Tackle", duel.now).unwrap();
        assert!((85..=100).contains(&decl.roll));
        assert!(matches!(
            duel.host.submit_attack("Tackle", duel.now),
            Err(SessionError::Battle(_))
        ));
        duel.settle();

        let host_events = duel.host.drain_events();
        let client_events = duel.client.drain_events();
        let resolved = |evs: &[SessionEvent]| {
            evs.iter()
                .find_map(|e| match e {
                    SessionEvent::AttackResolved(s) => Some(s.clone()),
                    _ => None,
                })
                .expect("no AttackResolved")
        };
        assert_eq!(resolved(&host_events), resolved(&client_events));

        let host_view = duel.host.battle().unwrap();
        let client_view = duel.client.battle().unwrap();
        assert_eq!(host_view.remote().hp(), client_view.local().hp());
        assert_eq!(client_view.turn_state(), TurnState::MyTurn);
    }

    #[test]
    fn chat_does_not_consume_a_turn() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut duel = Duel::new(&net);
        duel.settle();
        duel.client.drain_events();

        duel.client.submit_chat("good luck", duel.now).unwrap();
        duel.host.submit_chat("you too", duel.now).unwrap();
        duel.settle();

        assert!(duel.client.drain_events().contains(&SessionEvent::ChatReceived(
            ChatMessage {
                sender: "Brock".into(),
                text: "you too".into()
            }
        )));
        assert_eq!(
            duel.host.battle().unwrap().turn_state(),
            TurnState::MyTurn
        );
    }

    #[test]
    fn bye_closes_the_peer_without_ack() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut duel = Duel::new(&net);
        duel.settle();
        let sent_before = net.stats().sent;

        duel.client.request_quit();
        assert_eq!(duel.client.state(), SessionState::Closed);
        duel.step();
        assert_eq!(duel.host.state(), SessionState::Closed);
        assert_eq!(
            duel.host.close_reason(),
            Some(&CloseReason::PeerQuit { reason: None })
        );
        // Only the BYE itself crossed the wire.
        assert_eq!(net.stats().sent, sent_before + 1);
    }

    #[test]
    fn host_ignores_non_hello_while_listening() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut host = Session::host(net.bind(), player("Brock", "Eevee"), RetransmitConfig::default());
        let stranger = net.bind();
        let chat = Packet::new(1, Kind::Chat, b"{}".to_vec()).encode().unwrap();
        stranger.send_to(&chat, host.transport().local_addr()).unwrap();
        stranger.send_to(b"garbage", host.transport().local_addr()).unwrap();

        host.poll(Instant::now()).unwrap();
        assert_eq!(host.state(), SessionState::Listening);
        assert_eq!(host.peer(), None);
    }

    #[test]
    fn version_mismatch_is_refused() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut host = Session::host(net.bind(), player("Brock", "Eevee"), RetransmitConfig::default());
        let mut client = Session::connect(
            net.bind(),
            host.transport().local_addr(),
            player("Misty", "Psyduck"),
            RetransmitConfig::default(),
            Instant::now(),
        )
        .unwrap();
        // Replace the real HELLO with one from the future.
        while host.transport().try_recv_from().unwrap().is_some() {}
        let hello = Hello {
            protocol_version: PROTOCOL_VERSION + 1,
            trainer: "Misty".into(),
            participant: client.local().creature.clone(),
        };
        let body = Message::Hello(hello).encode_body().unwrap();
        let bytes = Packet::new(1, Kind::Hello, body).encode().unwrap();
        client.transport().send_to(&bytes, host.transport().local_addr()).unwrap();

        let now = Instant::now();
        host.poll(now).unwrap();
        assert_eq!(host.state(), SessionState::Listening);

        let err = client.poll(now).unwrap_err();
        assert!(matches!(err, SessionError::HandshakeFailure(ref why) if why.contains("version")));
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[test]
    fn silent_host_fails_the_handshake() {
        let net = Simulator::new(SimulatorConfig::default());
        let silent = net.bind();
        let start = Instant::now();
        let mut client = Session::connect(
            net.bind(),
            silent.local_addr(),
            player("Misty", "Psyduck"),
            RetransmitConfig::default(),
            start,
        )
        .unwrap();

        let mut now = start;
        let err = loop {
            now += TICK;
            if let Err(e) = client.poll(now) {
                break e;
            }
            assert!(now - start < Duration::from_secs(10), "never gave up");
        };
        assert!(matches!(err, SessionError::HandshakeFailure(_)));
        assert!(now - start >= Duration::from_millis(7500));
        assert_eq!(client.state(), SessionState::Closed);
        assert!(client.battle().is_none());
        assert!(matches!(
            client.next_event(),
            Some(SessionEvent::Closed(CloseReason::HandshakeFailure(_)))
        ));
        // Later polls are quiet.
        assert!(client.poll(now + TICK).is_ok());
    }

    #[test]
    fn acked_hello_without_hello_ack_fails_the_handshake() {
        let net = Simulator::new(SimulatorConfig::default());
        let mute = net.bind();
        let start = Instant::now();
        let mut client = Session::connect(
            net.bind(),
            mute.local_addr(),
            player("Misty", "Psyduck"),
            RetransmitConfig::default(),
            start,
        )
        .unwrap();

        // Acknowledge the HELLO, then say nothing more.
        let (hello, from) = mute.try_recv_from().unwrap().expect("HELLO");
        assert_eq!(Packet::decode(&hello).unwrap().kind, Kind::Hello);
        mute.send_to(&Packet::ack(1).encode().unwrap(), from).unwrap();
        let acked_at = start + TICK;
        client.poll(acked_at).unwrap();
        assert_eq!(client.state(), SessionState::Handshaking);
        assert_eq!(client.snapshot().pending, 0);

        let mut now = acked_at;
        let err = loop {
            now += TICK;
            if let Err(e) = client.poll(now) {
                break e;
            }
            assert!(now - start < Duration::from_secs(20), "stuck in HANDSHAKING");
        };
        assert!(
            matches!(err, SessionError::HandshakeFailure(ref why) if why.contains("HELLO_ACK")),
            "{err}"
        );
        let waited = now - acked_at;
        assert!(waited >= Duration::from_millis(7500), "{waited:?}");
        assert!(waited < Duration::from_millis(7500) + TICK, "{waited:?}");
        assert_eq!(client.state(), SessionState::Closed);
        assert!(matches!(
            client.drain_events().last(),
            Some(SessionEvent::Closed(CloseReason::HandshakeFailure(_)))
        ));

        // The host is told we gave up.
        let (bye, _) = mute.try_recv_from().unwrap().expect("BYE");
        assert_eq!(Packet::decode(&bye).unwrap().kind, Kind::Bye);
    }

    #[test]
    fn host_that_cannot_send_hello_ack_listens_again() {
        let net = Simulator::new(SimulatorConfig::default());
        let start = Instant::now();
        // Too long to fit a HELLO_ACK in one datagram.
        let mut host = Session::host_with_seed(
            net.bind(),
            player(&"B".repeat(1300), "Eevee"),
            RetransmitConfig::default(),
            7,
        );
        let mut client = Session::connect(
            net.bind(),
            host.transport().local_addr(),
            player("Misty", "Psyduck"),
            RetransmitConfig::default(),
            start,
        )
        .unwrap();

        let now = start + TICK;
        host.poll(now).unwrap();
        assert_eq!(host.state(), SessionState::Listening);
        assert_eq!(host.peer(), None);
        assert!(host.channel().is_none());
        assert!(host.battle().is_none());
        assert!(host.drain_events().is_empty());

        let err = client.poll(now).unwrap_err();
        assert!(
            matches!(err, SessionError::HandshakeFailure(ref why) if why.contains("cannot accept")),
            "{err}"
        );
        assert_eq!(client.state(), SessionState::Closed);

        // Still listening on later ticks, with nothing owed to anyone.
        host.poll(now + TICK).unwrap();
        assert_eq!(host.state(), SessionState::Listening);
        assert_eq!(host.snapshot().pending, 0);
    }

    #[test]
    fn overlong_trainer_cannot_connect() {
        let net = Simulator::new(SimulatorConfig::default());
        let host = net.bind();
        let result = Session::connect(
            net.bind(),
            host.local_addr(),
            player(&"M".repeat(MAX_TRAINER_LEN + 1), "Psyduck"),
            RetransmitConfig::default(),
            Instant::now(),
        );
        assert!(matches!(result, Err(SessionError::Encode(_))));
        assert_eq!(net.stats().sent, 0);
    }

    #[test]
    fn repeated_hello_after_established_is_only_acked() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut duel = Duel::new(&net);
        duel.settle();
        duel.host.drain_events();
        duel.client.drain_events();
        let before = duel.host.snapshot();
        let acks_before = duel.host.channel().unwrap().stats().acks_sent;

        // A late copy of the client's HELLO.
        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            trainer: "Misty".into(),
            participant: duel.client.local().creature.clone(),
        };
        let body = Message::Hello(hello).encode_body().unwrap();
        let bytes = Packet::new(1, Kind::Hello, body).encode().unwrap();
        duel.client
            .transport()
            .send_to(&bytes, duel.host.transport().local_addr())
            .unwrap();

        duel.now += TICK;
        duel.host.poll(duel.now).unwrap();
        let stats = duel.host.channel().unwrap().stats();
        assert_eq!(stats.acks_sent, acks_before + 1);
        assert_eq!(stats.duplicates, 1);
        assert!(duel.host.drain_events().is_empty());

        let after = duel.host.snapshot();
        assert_eq!(after.state, SessionState::Established);
        assert_eq!(after.battle, before.battle);
        assert_eq!(after.opponent_trainer, before.opponent_trainer);
        assert_eq!(after.pending, 0);

        // The stray ACK is harmless to the client.
        duel.settle();
        assert_eq!(duel.client.state(), SessionState::Established);
        assert!(duel.client.drain_events().is_empty());
    }

    #[test]
    fn lost_peer_after_handshake_is_a_timeout() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut duel = Duel::new(&net);
        duel.settle();
        net.set_config(SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        });
        duel.host.submit_chat("anyone there?", duel.now).unwrap();

        let err = loop {
            duel.now += TICK;
            if let Err(e) = duel.host.poll(duel.now) {
                break e;
            }
        };
        assert!(matches!(err, SessionError::PeerTimeout));
        assert_eq!(duel.host.close_reason(), Some(&CloseReason::PeerTimeout));
    }

    #[test]
    fn transport_is_reusable_after_close() {
        let net = Simulator::new(SimulatorConfig::default());
        let mut duel = Duel::new(&net);
        duel.settle();
        duel.host.request_quit();
        let transport = duel.host.into_transport();
        let again = Session::host(transport, player("Brock", "Oddish"), RetransmitConfig::default());
        assert_eq!(again.state(), SessionState::Listening);
        assert!(again.battle().is_none());
        assert_eq!(again.snapshot().pending, 0);
    }
}
