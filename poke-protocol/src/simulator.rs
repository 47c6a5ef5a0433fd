//! In-memory network with fault injection, for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt datagrams.  To exercise
//! the reliability layer without depending on actual network conditions,
//! [`Simulator`] is a shared in-process "wire" and [`SimSocket`] an endpoint
//! on it implementing [`Transport`].  Every fault decision comes from one
//! seeded RNG, so a failing test replays exactly.
//!
//! | Fault        | Effect                                                 |
//! |--------------|--------------------------------------------------------|
//! | Loss         | Datagram silently dropped with probability `loss_rate` |
//! | Duplication  | Delivered twice                                        |
//! | Reordering   | Held back until the next datagram to the same address  |
//! | Corruption   | One random bit flipped                                 |
//!
//! Delivery is instantaneous: a datagram sent now is readable by the next
//! `try_recv_from`.  Time only advances through the `Instant`s the caller
//! hands to the protocol.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::TransportError;
use crate::socket::Transport;

/// Fault probabilities, each in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub corrupt_rate: f64,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

/// Counters of what the wire did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub corrupted: u64,
}

type Datagram = (Vec<u8>, SocketAddr);

struct Wire {
    config: SimulatorConfig,
    rng: StdRng,
    /// Inbound queue per bound address.
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    /// Datagrams held back for reordering, per destination.
    held: HashMap<SocketAddr, Vec<Datagram>>,
    next_port: u16,
    stats: SimStats,
}

impl Wire {
    fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen_bool(p.min(1.0))
    }

    fn transmit(&mut self, mut bytes: Vec<u8>, from: SocketAddr, dest: SocketAddr) {
        self.stats.sent += 1;
        if !self.queues.contains_key(&dest) {
            // Nobody bound there: the datagram vanishes.
            self.stats.dropped += 1;
            return;
        }
        if self.roll(self.config.loss_rate) {
            self.stats.dropped += 1;
            return;
        }
        if !bytes.is_empty() && self.roll(self.config.corrupt_rate) {
            let bit = self.rng.gen_range(0..bytes.len() * 8);
            bytes[bit / 8] ^= 1 << (bit % 8);
            self.stats.corrupted += 1;
        }
        let copies = if self.roll(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };
        let reorder = self.roll(self.config.reorder_rate);

        let released = self.held.remove(&dest).unwrap_or_default();
        if reorder {
            self.stats.reordered += 1;
            let held = self.held.entry(dest).or_default();
            for _ in 0..copies {
                held.push((bytes.clone(), from));
            }
        }
        if let Some(queue) = self.queues.get_mut(&dest) {
            if !reorder {
                for _ in 0..copies {
                    queue.push_back((bytes.clone(), from));
                }
            }
            // Anything held earlier now arrives behind this datagram.
            queue.extend(released);
        }
    }

    fn receive(&mut self, at: SocketAddr) -> Option<Datagram> {
        let next = match self.queues.get_mut(&at).and_then(VecDeque::pop_front) {
            Some(d) => Some(d),
            // Nothing newer came along; let held datagrams through late.
            None => self.held.get_mut(&at).and_then(|h| {
                if h.is_empty() {
                    None
                } else {
                    Some(h.remove(0))
                }
            }),
        };
        if next.is_some() {
            self.stats.delivered += 1;
        }
        next
    }
}

/// A simulated network shared by any number of [`SimSocket`]s.
///
/// Cheap to clone; clones refer to the same wire.  Single-threaded by
/// construction (`Rc`), like the protocol loop that drives it.
#[derive(Clone)]
pub struct Simulator {
    wire: Rc<RefCell<Wire>>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            wire: Rc::new(RefCell::new(Wire {
                config,
                rng,
                queues: HashMap::new(),
                held: HashMap::new(),
                next_port: 40_000,
                stats: SimStats::default(),
            })),
        }
    }

    /// Bind an endpoint on a fresh loopback port.
    pub fn bind(&self) -> SimSocket {
        let addr = {
            let mut wire = self.wire.borrow_mut();
            let port = wire.next_port;
            wire.next_port = wire.next_port.wrapping_add(1);
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
        };
        self.bind_at(addr)
    }

    /// Bind an endpoint at a specific address.
    pub fn bind_at(&self, addr: SocketAddr) -> SimSocket {
        self.wire.borrow_mut().queues.entry(addr).or_default();
        SimSocket {
            addr,
            wire: Rc::clone(&self.wire),
        }
    }

    /// Replace the fault model mid-test (e.g. to cut the link).
    pub fn set_config(&self, config: SimulatorConfig) {
        self.wire.borrow_mut().config = config;
    }

    pub fn stats(&self) -> SimStats {
        self.wire.borrow().stats
    }

    /// Inject raw bytes as if `from` had sent them to `dest`.
    pub fn inject(&self, bytes: &[u8], from: SocketAddr, dest: SocketAddr) {
        if let Some(q) = self.wire.borrow_mut().queues.get_mut(&dest) {
            q.push_back((bytes.to_vec(), from));
        }
    }
}

/// One endpoint on a [`Simulator`].
pub struct SimSocket {
    addr: SocketAddr,
    wire: Rc<RefCell<Wire>>,
}

impl Transport for SimSocket {
    fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.wire
            .borrow_mut()
            .transmit(bytes.to_vec(), self.addr, dest);
        Ok(())
    }

    fn try_recv_from(&self) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError> {
        Ok(self.wire.borrow_mut().receive(self.addr))
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        let mut wire = self.wire.borrow_mut();
        wire.queues.remove(&self.addr);
        wire.held.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(s: &SimSocket) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| s.try_recv_from().unwrap().map(|(b, _)| b)).collect()
    }

    #[test]
    fn pass_through_by_default() {
        let net = Simulator::new(SimulatorConfig::default());
        let a = net.bind();
        let b = net.bind();
        a.send_to(b"one", b.local_addr()).unwrap();
        a.send_to(b"two", b.local_addr()).unwrap();
        let (bytes, from) = b.try_recv_from().unwrap().unwrap();
        assert_eq!((bytes.as_slice(), from), (&b"one"[..], a.local_addr()));
        assert_eq!(drain(&b), vec![b"two".to_vec()]);
        assert_eq!(b.try_recv_from().unwrap(), None);
    }

    #[test]
    fn total_loss_drops_everything() {
        let net = Simulator::new(SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        });
        let a = net.bind();
        let b = net.bind();
        for _ in 0..10 {
            a.send_to(b"x", b.local_addr()).unwrap();
        }
        assert!(drain(&b).is_empty());
        assert_eq!(net.stats().dropped, 10);
    }

    #[test]
    fn reordered_datagram_arrives_after_the_next_one() {
        let net = Simulator::new(SimulatorConfig {
            reorder_rate: 1.0,
            ..SimulatorConfig::default()
        });
        let a = net.bind();
        let b = net.bind();
        a.send_to(b"first", b.local_addr()).unwrap();
        net.set_config(SimulatorConfig::default());
        a.send_to(b"second", b.local_addr()).unwrap();
        assert_eq!(drain(&b), vec![b"second".to_vec(), b"first".to_vec()]);
    }

    #[test]
    fn held_datagram_is_not_lost_forever() {
        let net = Simulator::new(SimulatorConfig {
            reorder_rate: 1.0,
            ..SimulatorConfig::default()
        });
        let a = net.bind();
        let b = net.bind();
        a.send_to(b"late", b.local_addr()).unwrap();
        assert_eq!(drain(&b), vec![b"late".to_vec()]);
    }

    #[test]
    fn duplication_and_corruption() {
        let net = Simulator::new(SimulatorConfig {
            duplicate_rate: 1.0,
            corrupt_rate: 1.0,
            ..SimulatorConfig::default()
        });
        let a = net.bind();
        let b = net.bind();
        a.send_to(&[0u8; 8], b.local_addr()).unwrap();
        let got = drain(&b);
        assert_eq!(got.len(), 2);
        assert_ne!(got[0], vec![0u8; 8]);
        assert_eq!(got[0], got[1]);
    }

    #[test]
    fn unbound_destination_swallows() {
        let net = Simulator::new(SimulatorConfig::default());
        let a = net.bind();
        let gone = net.bind();
        let gone_addr = gone.local_addr();
        drop(gone);
        a.send_to(b"anyone?", gone_addr).unwrap();
        assert_eq!(net.stats().dropped, 1);
    }

    #[test]
    fn same_seed_same_faults() {
        let run = |seed| {
            let net = Simulator::new(SimulatorConfig {
                loss_rate: 0.5,
                seed,
                ..SimulatorConfig::default()
            });
            let a = net.bind();
            let b = net.bind();
            for i in 0..50u8 {
                a.send_to(&[i], b.local_addr()).unwrap();
            }
            drain(&b)
        };
        assert_eq!(run(3), run(3));
    }
}
