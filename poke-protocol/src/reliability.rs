//! Reliable, ordered, exactly-once delivery over an unreliable transport.
//!
//! [`ReliableChannel`] is bound to exactly one peer.  It owns everything the
//! layers above must never see: sequence numbers, the arena of
//! [`PendingSend`]s awaiting acknowledgement, and the [`ReceiveWindow`].
//!
//! # Protocol contract
//!
//! - Each sequenced message gets the next sequence number (starting at 1),
//!   is transmitted at once and kept until its ACK arrives.
//! - ACKs are **selective**: an ACK names exactly one sequence number.
//! - Every sequenced datagram that fits the window is ACKed, duplicates
//!   included, because the peer may have missed the first ACK.
//! - Each pending message retransmits on its own deadline with exponential
//!   back-off.  One message exhausting its retry budget fails the whole
//!   channel: an unresponsive peer is indistinguishable from a dead one.
//! - Delivery upward is strictly in sequence order; early arrivals wait in
//!   the reorder buffer until the gap fills.
//!
//! ```text
//!          send()                          ACK(seq)
//!  app ───────────▶ pending[seq] ─────────────────────────▶ removed
//!                      │ deadline passed
//!                      ▼
//!                 retransmit, rto ×2 ── retries > max ──▶ PeerTimeout
//!
//!  datagram ─▶ decode ─▶ ACK back ─▶ window ─▶ in-order run ─▶ app
//! ```
//!
//! Nothing here blocks or sleeps.  Time comes in as an `Instant` argument,
//! so the caller's loop (or a test) decides how fast the clock runs.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::{ReliabilityError, TransportError};
use crate::packet::{Kind, Packet};
use crate::socket::Transport;
use crate::timer::{RetransmitConfig, RttEstimator};

/// How far beyond the next expected sequence number an arrival may be and
/// still be buffered.  Anything further is dropped un-ACKed.
pub const REORDER_WINDOW: u32 = 1024;

// ---------------------------------------------------------------------------
// PendingSend
// ---------------------------------------------------------------------------

/// An outbound message awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub seq: u32,
    pub kind: Kind,
    /// Encoded datagram, ready to resend as-is.
    bytes: Vec<u8>,
    /// First transmission; RTT samples are measured from here.
    pub first_sent: Instant,
    pub deadline: Instant,
    /// RTO that produced `deadline`.
    pub rto: Duration,
    /// Retransmissions so far (0 = sent once).
    pub retries: u32,
}

// ---------------------------------------------------------------------------
// ReceiveWindow
// ---------------------------------------------------------------------------

/// A message released to the layer above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// 0 for unsequenced kinds.
    pub seq: u32,
    pub kind: Kind,
    pub payload: Vec<u8>,
}

/// What the window did with an arrival.
#[derive(Debug, PartialEq, Eq)]
pub enum Accept {
    /// In order: this message plus any buffered run it unblocked.
    Delivered(Vec<Delivery>),
    /// Ahead of a gap; held until the gap fills.
    Buffered,
    /// Already delivered or already buffered.
    Duplicate,
    /// Too far ahead to buffer; must not be ACKed.
    OutOfWindow,
}

/// Sequence numbers seen from the peer.
///
/// Everything below `next_expected` has been delivered; `buffered` holds
/// arrivals above it.  The seen set only ever grows.
#[derive(Debug)]
pub struct ReceiveWindow {
    next_expected: u32,
    buffered: BTreeMap<u32, Delivery>,
}

impl Default for ReceiveWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveWindow {
    pub fn new() -> Self {
        Self {
            next_expected: 1,
            buffered: BTreeMap::new(),
        }
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    pub fn has_seen(&self, seq: u32) -> bool {
        seq < self.next_expected || self.buffered.contains_key(&seq)
    }

    pub fn accept(&mut self, msg: Delivery) -> Accept {
        let seq = msg.seq;
        if self.has_seen(seq) {
            return Accept::Duplicate;
        }
        if seq - self.next_expected >= REORDER_WINDOW {
            return Accept::OutOfWindow;
        }
        if seq != self.next_expected {
            self.buffered.insert(seq, msg);
            return Accept::Buffered;
        }

        let mut run = vec![msg];
        self.next_expected = self.next_expected.saturating_add(1);
        while let Some(next) = self.buffered.remove(&self.next_expected) {
            run.push(next);
            self.next_expected = self.next_expected.saturating_add(1);
        }
        Accept::Delivered(run)
    }
}

// ---------------------------------------------------------------------------
// ReliableChannel
// ---------------------------------------------------------------------------

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    pub retransmitted: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub acks_sent: u64,
    pub dropped_foreign: u64,
    pub dropped_invalid: u64,
}

/// Reliable channel to one peer.
#[derive(Debug)]
pub struct ReliableChannel {
    peer: SocketAddr,
    /// Sequence number for the next sequenced send.
    next_seq: u32,
    /// Unacknowledged sends, keyed by sequence number.
    pending: BTreeMap<u32, PendingSend>,
    window: ReceiveWindow,
    rtt: RttEstimator,
    config: RetransmitConfig,
    last_heard: Option<Instant>,
    /// Set when the OS reported the peer's port closed.
    unreachable: bool,
    stats: ChannelStats,
}

impl ReliableChannel {
    pub fn new(peer: SocketAddr, config: RetransmitConfig) -> Self {
        Self {
            peer,
            next_seq: 1,
            pending: BTreeMap::new(),
            window: ReceiveWindow::new(),
            rtt: RttEstimator::new(config),
            config,
            last_heard: None,
            unreachable: false,
            stats: ChannelStats::default(),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Assign the next sequence number, transmit, and track until ACKed.
    ///
    /// Returns the assigned sequence number without waiting for anything.
    pub fn send<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        kind: Kind,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<u32, ReliabilityError> {
        debug_assert!(kind.is_sequenced(), "{kind} is not a sequenced kind");
        let seq = self.next_seq;
        let next = seq
            .checked_add(1)
            .ok_or(ReliabilityError::SequenceExhausted)?;
        let bytes = Packet::new(seq, kind, payload).encode()?;

        self.transmit(transport, &bytes)?;
        self.next_seq = next;
        self.stats.sent += 1;

        let rto = self.rtt.rto();
        log::debug!(
            "[rel] → {kind} seq={seq} len={} rto={}ms pending={}",
            bytes.len(),
            rto.as_millis(),
            self.pending.len() + 1
        );
        self.pending.insert(
            seq,
            PendingSend {
                seq,
                kind,
                bytes,
                first_sent: now,
                deadline: now + rto,
                rto,
                retries: 0,
            },
        );
        Ok(seq)
    }

    /// Fire-and-forget: `seq = 0`, never retransmitted.
    pub fn send_unreliable<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        kind: Kind,
        payload: Vec<u8>,
    ) -> Result<(), ReliabilityError> {
        let bytes = Packet::new(0, kind, payload).encode()?;
        log::debug!("[rel] → {kind} (unsequenced)");
        self.transmit(transport, &bytes)
    }

    fn transmit<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        bytes: &[u8],
    ) -> Result<(), ReliabilityError> {
        match transport.send_to(bytes, self.peer) {
            Ok(()) => Ok(()),
            Err(TransportError::PeerUnreachable) => {
                self.unreachable = true;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send_ack<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        seq: u32,
    ) -> Result<(), ReliabilityError> {
        let bytes = Packet::ack(seq).encode()?;
        self.transmit(transport, &bytes)?;
        self.stats.acks_sent += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// Drain every datagram the transport has ready, then service
    /// retransmissions.  Returns in-order deliveries.
    pub fn poll<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        now: Instant,
    ) -> Result<Vec<Delivery>, ReliabilityError> {
        let mut out = Vec::new();
        loop {
            match transport.try_recv_from() {
                Ok(Some((bytes, from))) => {
                    out.extend(self.on_datagram(transport, &bytes, from, now)?);
                }
                Ok(None) => break,
                Err(TransportError::PeerUnreachable) => {
                    log::debug!("[rel] {} reported unreachable", self.peer);
                    self.unreachable = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.service_retransmits(transport, now)?;
        Ok(out)
    }

    /// Handle one raw datagram.
    ///
    /// Datagrams from other addresses and datagrams that fail to decode are
    /// dropped as if never received.
    pub fn on_datagram<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        bytes: &[u8],
        from: SocketAddr,
        now: Instant,
    ) -> Result<Vec<Delivery>, ReliabilityError> {
        if from != self.peer {
            log::debug!("[rel] ignoring {} bytes from foreign {from}", bytes.len());
            self.stats.dropped_foreign += 1;
            return Ok(Vec::new());
        }
        let packet = match Packet::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("[rel] dropping datagram from {from}: {e}");
                self.stats.dropped_invalid += 1;
                return Ok(Vec::new());
            }
        };
        self.last_heard = Some(now);
        self.on_packet(transport, packet, now)
    }

    fn on_packet<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        packet: Packet,
        now: Instant,
    ) -> Result<Vec<Delivery>, ReliabilityError> {
        let Packet { seq, kind, payload } = packet;

        if kind == Kind::Ack {
            match Packet::new(seq, kind, payload).acked_seq() {
                Some(acked) => self.on_ack(acked, now),
                None => {
                    log::debug!("[rel] malformed ACK");
                    self.stats.dropped_invalid += 1;
                }
            }
            return Ok(Vec::new());
        }

        if !kind.is_sequenced() {
            log::debug!("[rel] ← {kind} (unsequenced)");
            self.stats.delivered += 1;
            return Ok(vec![Delivery {
                seq: 0,
                kind,
                payload,
            }]);
        }

        if seq == 0 {
            log::debug!("[rel] {kind} with seq 0; dropping");
            self.stats.dropped_invalid += 1;
            return Ok(Vec::new());
        }

        match self.window.accept(Delivery { seq, kind, payload }) {
            Accept::Delivered(run) => {
                self.send_ack(transport, seq)?;
                log::debug!(
                    "[rel] ← {kind} seq={seq}; → ACK; delivering {} (next={})",
                    run.len(),
                    self.window.next_expected()
                );
                self.stats.delivered += run.len() as u64;
                Ok(run)
            }
            Accept::Buffered => {
                self.send_ack(transport, seq)?;
                log::debug!(
                    "[rel] ← {kind} seq={seq} early (next={}); buffered",
                    self.window.next_expected()
                );
                Ok(Vec::new())
            }
            Accept::Duplicate => {
                self.send_ack(transport, seq)?;
                log::debug!("[rel] ← {kind} seq={seq} duplicate; re-ACK");
                self.stats.duplicates += 1;
                Ok(Vec::new())
            }
            Accept::OutOfWindow => {
                log::debug!(
                    "[rel] ← {kind} seq={seq} beyond window (next={}); dropping",
                    self.window.next_expected()
                );
                self.stats.dropped_invalid += 1;
                Ok(Vec::new())
            }
        }
    }

    fn on_ack(&mut self, acked: u32, now: Instant) {
        match self.pending.remove(&acked) {
            Some(p) => {
                if p.retries == 0 {
                    self.rtt.record_sample(now.saturating_duration_since(p.first_sent));
                }
                log::debug!(
                    "[rel] ← ACK seq={acked} ({}) pending={}",
                    p.kind,
                    self.pending.len()
                );
            }
            None => log::debug!("[rel] ← ACK seq={acked} for nothing pending; ignored"),
        }
    }

    // -----------------------------------------------------------------------
    // Retransmission
    // -----------------------------------------------------------------------

    /// Resend every pending message whose deadline has passed.
    ///
    /// Fails with [`ReliabilityError::PeerTimeout`] when a message is due
    /// again after its last allowed retransmission.
    pub fn service_retransmits<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        now: Instant,
    ) -> Result<(), ReliabilityError> {
        for (&seq, p) in self.pending.iter_mut() {
            if p.deadline > now {
                continue;
            }
            if p.retries >= self.config.max_retries {
                log::warn!(
                    "[rel] {} seq={seq} unacknowledged after {} retransmissions; giving up",
                    p.kind,
                    p.retries
                );
                return Err(ReliabilityError::PeerTimeout {
                    seq,
                    retries: p.retries,
                });
            }
            match transport.send_to(&p.bytes, self.peer) {
                Ok(()) => {}
                Err(TransportError::PeerUnreachable) => self.unreachable = true,
                Err(e) => return Err(e.into()),
            }
            p.retries += 1;
            p.rto = self.config.back_off(p.rto);
            p.deadline = now + p.rto;
            self.stats.retransmitted += 1;
            log::debug!(
                "[rel] timeout; ↻ {} seq={seq} retry={} next_rto={}ms",
                p.kind,
                p.retries,
                p.rto.as_millis()
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn is_pending(&self, seq: u32) -> bool {
        self.pending.contains_key(&seq)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Earliest retransmission deadline, if anything is in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Drop all unacknowledged messages (session teardown).
    pub fn discard_pending(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// When the last valid datagram from the peer arrived.
    pub fn last_heard(&self) -> Option<Instant> {
        self.last_heard
    }

    /// Whether the OS reported the peer unreachable since the last call.
    pub fn take_unreachable(&mut self) -> bool {
        std::mem::take(&mut self.unreachable)
    }

    pub fn window(&self) -> &ReceiveWindow {
        &self.window
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
