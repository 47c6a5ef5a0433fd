//! Reliability layer under simulated network faults.
//!
//! Two `ReliableChannel`s talk over a seeded `Simulator`; time advances in
//! fixed steps through the `Instant`s handed to `poll`, so nothing sleeps
//! and every run of a given seed is identical.

use std::time::{Duration, Instant};

use poke_protocol::error::ReliabilityError;
use poke_protocol::simulator::{SimSocket, Simulator, SimulatorConfig};
use poke_protocol::{Kind, ReliableChannel, RetransmitConfig, Transport};

const STEP: Duration = Duration::from_millis(10);
/// Bail out of a transfer that makes no progress for this long.
const GIVE_UP: Duration = Duration::from_secs(3600);

struct Outcome {
    /// Payload indices in delivery order.
    delivered: Vec<u32>,
    result: Result<(), ReliabilityError>,
    elapsed: Duration,
}

/// Send `count` CHAT messages from one endpoint to the other and step until
/// every one is acknowledged or the sender gives up.
fn transfer(net: SimulatorConfig, config: RetransmitConfig, count: u32) -> Outcome {
    let sim = Simulator::new(net);
    let a: SimSocket = sim.bind();
    let b: SimSocket = sim.bind();
    let mut sender = ReliableChannel::new(b.local_addr(), config);
    let mut receiver = ReliableChannel::new(a.local_addr(), config);

    let start = Instant::now();
    for i in 0..count {
        sender
            .send(&a, Kind::Chat, i.to_be_bytes().to_vec(), start)
            .expect("send");
    }

    let mut delivered = Vec::new();
    let mut now = start;
    let result = loop {
        now += STEP;
        for d in receiver.poll(&b, now).expect("receiver poll") {
            let bytes: [u8; 4] = d.payload.as_slice().try_into().expect("4-byte payload");
            delivered.push(u32::from_be_bytes(bytes));
        }
        if let Err(e) = sender.poll(&a, now) {
            break Err(e);
        }
        if sender.pending_count() == 0 && delivered.len() == count as usize {
            break Ok(());
        }
        assert!(now - start < GIVE_UP, "transfer stalled");
    };

    Outcome {
        delivered,
        result,
        elapsed: now - start,
    }
}

fn patient() -> RetransmitConfig {
    RetransmitConfig {
        max_retries: 8,
        ..RetransmitConfig::default()
    }
}

#[test]
fn clean_link_delivers_in_order() {
    let out = transfer(SimulatorConfig::default(), RetransmitConfig::default(), 50);
    assert!(out.result.is_ok());
    assert_eq!(out.delivered, (0..50).collect::<Vec<_>>());
}

#[test]
fn ten_percent_loss_delivers_everything_exactly_once() {
    let net = SimulatorConfig {
        loss_rate: 0.10,
        seed: 7,
        ..SimulatorConfig::default()
    };
    let out = transfer(net, patient(), 200);
    assert!(out.result.is_ok(), "{:?}", out.result);
    assert_eq!(out.delivered, (0..200).collect::<Vec<_>>());
}

#[test]
fn every_fault_at_once_still_in_order() {
    let net = SimulatorConfig {
        loss_rate: 0.10,
        duplicate_rate: 0.10,
        reorder_rate: 0.20,
        corrupt_rate: 0.05,
        seed: 99,
    };
    let out = transfer(net, patient(), 200);
    assert!(out.result.is_ok(), "{:?}", out.result);
    assert_eq!(out.delivered, (0..200).collect::<Vec<_>>());
}

#[test]
fn harsh_links_never_duplicate_or_reorder() {
    for seed in 0..20 {
        let net = SimulatorConfig {
            loss_rate: 0.35,
            duplicate_rate: 0.20,
            reorder_rate: 0.30,
            corrupt_rate: 0.05,
            seed,
        };
        let out = transfer(net, RetransmitConfig::default(), 60);
        // Whatever got through is a gap-free prefix.
        let k = out.delivered.len() as u32;
        assert_eq!(out.delivered, (0..k).collect::<Vec<_>>(), "seed {seed}");
        match out.result {
            Ok(()) => assert_eq!(k, 60, "seed {seed}"),
            Err(e) => assert!(
                matches!(e, ReliabilityError::PeerTimeout { .. }),
                "seed {seed}: {e}"
            ),
        }
    }
}

#[test]
fn dead_link_times_out_after_full_backoff() {
    let net = SimulatorConfig {
        loss_rate: 1.0,
        ..SimulatorConfig::default()
    };
    let out = transfer(net, RetransmitConfig::default(), 1);
    assert!(out.delivered.is_empty());
    match out.result {
        Err(ReliabilityError::PeerTimeout { seq, retries }) => {
            assert_eq!((seq, retries), (1, 3));
        }
        other => panic!("expected PeerTimeout, got {other:?}"),
    }
    // 500 + 1000 + 2000 + 4000 ms
    assert_eq!(out.elapsed, Duration::from_millis(7500));
    assert_eq!(
        RetransmitConfig::default().give_up_after(Duration::from_millis(500)),
        out.elapsed
    );
}

#[test]
fn same_seed_same_transfer() {
    let net = SimulatorConfig {
        loss_rate: 0.25,
        reorder_rate: 0.25,
        seed: 5,
        ..SimulatorConfig::default()
    };
    let first = transfer(net.clone(), patient(), 40);
    let second = transfer(net, patient(), 40);
    assert_eq!(first.delivered, second.delivered);
    assert_eq!(first.elapsed, second.elapsed);
}
