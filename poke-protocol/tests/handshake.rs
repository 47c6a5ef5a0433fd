//! Integration tests for the handshake and teardown over real UDP.
//!
//! Each test binds real `tokio::net::UdpSocket`s on loopback, wraps them in
//! sessions, and runs both sides on `PeerDriver` tasks in the same runtime.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use poke_battle::{BattleStatus, BuiltinDex, Dex, TurnState};
use poke_protocol::{
    CloseReason, LocalPlayer, PeerDriver, PeerHandle, RetransmitConfig, Session, SessionEvent,
    SessionState, Socket,
};

const TICK: Duration = Duration::from_millis(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind loopback socket")
}

fn player(trainer: &str, creature: &str) -> LocalPlayer {
    LocalPlayer {
        trainer: trainer.to_string(),
        creature: BuiltinDex::new().lookup_creature(creature).unwrap(),
    }
}

/// A retry budget that gives up in well under a second.
fn impatient() -> RetransmitConfig {
    RetransmitConfig {
        initial_rto: Duration::from_millis(50),
        min_rto: Duration::from_millis(20),
        max_rto: Duration::from_millis(200),
        max_retries: 2,
    }
}

/// Skip events until one matches `pred`.
async fn expect_event<F>(peer: &mut PeerHandle<Socket>, what: &str, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let wait = async {
        loop {
            match peer.next_event().await {
                Some(ev) if pred(&ev) => return ev,
                Some(_) => continue,
                None => panic!("event stream ended while waiting for {what}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

fn is_established(ev: &SessionEvent) -> bool {
    matches!(ev, SessionEvent::Established { .. })
}

fn is_closed(ev: &SessionEvent) -> bool {
    matches!(ev, SessionEvent::Closed(_))
}

/// Host and client, both past the handshake.
async fn established_pair() -> (PeerHandle<Socket>, PeerHandle<Socket>) {
    let host_socket = ephemeral().await;
    let host_addr = host_socket.local_addr;
    let mut host = PeerDriver::spawn(
        Session::host(host_socket, player("Brock", "Eevee"), RetransmitConfig::default()),
        TICK,
    );
    let client_session = Session::connect(
        ephemeral().await,
        host_addr,
        player("Misty", "Eevee"),
        RetransmitConfig::default(),
        Instant::now(),
    )
    .expect("client connect");
    let mut client = PeerDriver::spawn(client_session, TICK);

    expect_event(&mut host, "host Established", is_established).await;
    expect_event(&mut client, "client Established", is_established).await;
    (host, client)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let (host, client) = established_pair().await;

    let host_snap = host.snapshot().await.unwrap();
    let client_snap = client.snapshot().await.unwrap();
    assert_eq!(host_snap.state, SessionState::Established);
    assert_eq!(client_snap.state, SessionState::Established);
    assert_eq!(host_snap.opponent_trainer.as_deref(), Some("Misty"));
    assert_eq!(client_snap.opponent_trainer.as_deref(), Some("Brock"));
    assert_eq!(host_snap.peer, Some(client_snap.local_addr));

    // Host always opens.
    assert_eq!(host_snap.battle.unwrap().turn_state, TurnState::MyTurn);
    assert_eq!(
        client_snap.battle.unwrap().turn_state,
        TurnState::WaitingForTurn
    );
}

#[tokio::test]
async fn battle_runs_to_completion_over_loopback() {
    let (host, client) = established_pair().await;

    let mut finished = false;
    for _ in 0..500 {
        for peer in [&host, &client] {
            let battle = peer.snapshot().await.unwrap().battle.unwrap();
            if battle.turn_state == TurnState::MyTurn {
                peer.submit_attack(&battle.local.moves[0]).await.unwrap();
            }
        }
        let h = host.snapshot().await.unwrap().battle.unwrap();
        let c = client.snapshot().await.unwrap().battle.unwrap();
        if h.status != BattleStatus::Ongoing && c.status != BattleStatus::Ongoing {
            assert_eq!(h.status, c.status);
            assert_eq!(h.local.hp, c.remote.hp);
            assert_eq!(h.remote.hp, c.local.hp);
            assert!(h.local.hp == 0 || h.remote.hp == 0);
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(finished, "battle never ended");

    // Chat keeps working after the last STATUS.
    client.submit_chat("gg").await.unwrap();
    assert!(client.submit_attack("Tackle").await.is_err());
}

#[tokio::test]
async fn bye_closes_both_sides() {
    let (mut host, mut client) = established_pair().await;

    client.request_quit().await;
    let ev = expect_event(&mut client, "client Closed", is_closed).await;
    assert_eq!(ev, SessionEvent::Closed(CloseReason::LocalQuit));
    let ev = expect_event(&mut host, "host Closed", is_closed).await;
    assert_eq!(ev, SessionEvent::Closed(CloseReason::PeerQuit { reason: None }));

    let host_session = host.join().await.unwrap();
    assert_eq!(host_session.state(), SessionState::Closed);
    let client_session = client.join().await.unwrap();
    assert_eq!(client_session.state(), SessionState::Closed);
}

#[tokio::test]
async fn silent_host_fails_the_handshake() {
    let silent = ephemeral().await;
    let session = Session::connect(
        ephemeral().await,
        silent.local_addr,
        player("Misty", "Psyduck"),
        impatient(),
        Instant::now(),
    )
    .unwrap();
    let mut client = PeerDriver::spawn(session, TICK);

    let ev = expect_event(&mut client, "Closed", is_closed).await;
    assert!(
        matches!(ev, SessionEvent::Closed(CloseReason::HandshakeFailure(_))),
        "got {ev:?}"
    );
    let session = client.join().await.unwrap();
    assert!(session.battle().is_none());
    drop(silent);
}

#[tokio::test]
async fn closed_port_fails_the_handshake() {
    // Learn a free port, then release it.
    let gone = ephemeral().await;
    let gone_addr = gone.local_addr;
    drop(gone);

    let session = Session::connect(
        ephemeral().await,
        gone_addr,
        player("Misty", "Psyduck"),
        impatient(),
        Instant::now(),
    )
    .unwrap();
    let mut client = PeerDriver::spawn(session, TICK);

    // ICMP port-unreachable or retry exhaustion, depending on the platform.
    let ev = expect_event(&mut client, "Closed", is_closed).await;
    assert!(
        matches!(ev, SessionEvent::Closed(CloseReason::HandshakeFailure(_))),
        "got {ev:?}"
    );
}

#[tokio::test]
async fn dropping_the_handle_quits() {
    let (host, mut client) = established_pair().await;
    drop(host);
    let ev = expect_event(&mut client, "client Closed", is_closed).await;
    assert_eq!(ev, SessionEvent::Closed(CloseReason::PeerQuit { reason: None }));
}
