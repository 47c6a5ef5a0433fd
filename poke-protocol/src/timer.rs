//! Retransmission timing.
//!
//! Every unacknowledged message carries its own deadline (see
//! [`crate::reliability`]); this module decides how long that deadline is.
//!
//! RTO follows Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! clamped to `[min_rto, max_rto]`, and doubles on each retransmission of the
//! same message (exponential back-off) up to `max_rto`.
//!
//! Samples are only taken from messages that were transmitted exactly once
//! (Karn's rule); an ACK for a retransmitted message is ambiguous.

use std::time::Duration;

/// Tunable retransmission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitConfig {
    /// RTO before any RTT sample is available.
    pub initial_rto: Duration,
    pub min_rto: Duration,
    /// Ceiling for back-off.
    pub max_rto: Duration,
    /// Retransmissions allowed per message before the peer is declared gone.
    pub max_retries: u32,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(500),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(8),
            max_retries: 3,
        }
    }
}

impl RetransmitConfig {
    /// Next RTO after a timeout of a message whose RTO was `rto`.
    pub fn back_off(&self, rto: Duration) -> Duration {
        (rto * 2).min(self.max_rto)
    }

    /// Upper bound on how long one message can stay unacknowledged before
    /// the channel gives up, assuming it started at `rto`.
    pub fn give_up_after(&self, mut rto: Duration) -> Duration {
        let mut total = rto;
        for _ in 0..self.max_retries {
            rto = self.back_off(rto);
            total += rto;
        }
        total
    }
}

/// Smoothed round-trip estimate for one peer.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    config: RetransmitConfig,
    /// Smoothed RTT (SRTT).
    srtt: Option<Duration>,
    /// RTT variance (RTTVAR).
    rttvar: Duration,
    rto: Duration,
}

impl RttEstimator {
    pub fn new(config: RetransmitConfig) -> Self {
        Self {
            config,
            srtt: None,
            rttvar: Duration::ZERO,
            rto: config.initial_rto.clamp(config.min_rto, config.max_rto),
        }
    }

    /// RTO for a freshly sent message.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Record an RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// First sample:      SRTT = R,  RTTVAR = R/2.
    /// Later samples:     RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                    SRTT   = 7/8·SRTT   + 1/8·R
    pub fn record_sample(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = self.rttvar * 3 / 4 + diff / 4;
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
        }
        let srtt = self.srtt.unwrap_or(sample);
        self.rto = (srtt + self.rttvar * 4).clamp(self.config.min_rto, self.config.max_rto);
    }
}
