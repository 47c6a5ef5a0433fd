//! Background event loop for a [`Session`].
//!
//! [`Session`] itself never blocks and never sleeps; something has to call
//! [`Session::poll`] on a fixed cadence and feed it user commands in
//! between.  [`PeerDriver::spawn`] moves the session onto a tokio task that
//! does exactly that and hands back a [`PeerHandle`]:
//!
//! ```text
//!   PeerHandle ── Command (mpsc) ──▶ ┌──────────────┐
//!                                    │  event loop  │ ◀── interval tick
//!   PeerHandle ◀── SessionEvent ──── │   Session    │ ──▶ UDP
//!                                    └──────────────┘
//! ```
//!
//! The loop ends once the session is closed (BYE either way, retry
//! exhaustion, handshake failure) or when every handle has been dropped; the
//! finished [`Session`] comes back from [`PeerHandle::join`] so its socket
//! can be reused.

use std::time::Duration;

use poke_battle::AttackDeclaration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::SessionError;
use crate::session::{Session, SessionEvent, SessionSnapshot};
use crate::socket::Transport;
use crate::state::SessionState;

/// Default poll cadence.
pub const DEFAULT_TICK: Duration = Duration::from_millis(20);

/// Requests from the user side, executed between polls.
#[derive(Debug)]
pub enum Command {
    Attack {
        move_name: String,
        reply: oneshot::Sender<Result<AttackDeclaration, SessionError>>,
    },
    Chat {
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Quit,
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

pub struct PeerDriver;

impl PeerDriver {
    /// Move `session` onto a background task polled every `tick`.
    pub fn spawn<T>(session: Session<T>, tick: Duration) -> PeerHandle<T>
    where
        T: Transport + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);
        // Unbounded so a slow renderer never stalls ACKs and retransmits.
        let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let handle = tokio::spawn(event_loop(session, tick, cmd_rx, event_tx));
        PeerHandle {
            commands: cmd_tx,
            events: event_rx,
            handle,
        }
    }
}

// ---------------------------------------------------------------------------
// PeerHandle
// ---------------------------------------------------------------------------

/// User-side handle to a running session.
pub struct PeerHandle<T: Transport> {
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    handle: JoinHandle<Session<T>>,
}

impl<T: Transport> PeerHandle<T> {
    pub async fn submit_attack(&self, move_name: &str) -> Result<AttackDeclaration, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Attack {
            move_name: move_name.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::DriverStopped)?
    }

    pub async fn submit_chat(&self, text: &str) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Chat {
            text: text.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::DriverStopped)?
    }

    /// Ask the session to send BYE and close.  A no-op once it has stopped.
    pub async fn request_quit(&self) {
        let _ = self.commands.send(Command::Quit).await;
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| SessionError::DriverStopped)
    }

    pub async fn current_state(&self) -> Result<SessionState, SessionError> {
        Ok(self.snapshot().await?.state)
    }

    /// Next event, or `None` once the loop has ended and every event was
    /// consumed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Close the command channel, which quits a session that is still
    /// running, and take the session back once the loop ends.
    pub async fn join(self) -> Result<Session<T>, SessionError> {
        drop(self.commands);
        self.handle.await.map_err(|e| {
            log::error!("[driver] event loop task failed: {e}");
            SessionError::DriverStopped
        })
    }

    async fn send(&self, cmd: Command) -> Result<(), SessionError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| SessionError::DriverStopped)
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

async fn event_loop<T: Transport>(
    mut session: Session<T>,
    tick: Duration,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Session<T> {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = session.poll(now()) {
                    log::debug!("[driver] poll ended the session: {e}");
                }
            }

            cmd = commands.recv() => match cmd {
                Some(cmd) => execute(&mut session, cmd),
                None => {
                    log::debug!("[driver] all handles dropped; quitting");
                    session.request_quit();
                }
            },
        }

        while let Some(event) = session.next_event() {
            // Nobody listening is fine; the session still runs to completion.
            let _ = events.send(event);
        }
        if session.state().is_closed() {
            break;
        }
    }

    log::debug!("[driver] event loop finished in {}", session.state());
    session
}

fn execute<T: Transport>(session: &mut Session<T>, cmd: Command) {
    match cmd {
        Command::Attack { move_name, reply } => {
            let _ = reply.send(session.submit_attack(&move_name, now()));
        }
        Command::Chat { text, reply } => {
            let _ = reply.send(session.submit_chat(&text, now()));
        }
        Command::Quit => session.request_quit(),
        Command::Snapshot(reply) => {
            let _ = reply.send(session.snapshot());
        }
    }
}

/// Session time follows the tokio clock so paused-time tests stay coherent.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
