//! Entry point for `pokeprotocol`.
//!
//! Parses CLI arguments and dispatches into **host**, **join** or **roster**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (configuration, logging, argument parsing) and a
//! line-oriented terminal front end over [`PeerHandle`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use poke_battle::{BuiltinDex, Dex, Role, StatusReport};
use poke_protocol::{
    Config, LocalPlayer, PeerDriver, PeerHandle, Session, SessionEvent, Socket,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Peer-to-peer creature battles over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Configuration file (default ~/.config/pokeprotocol/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log every datagram.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a challenger.
    Host {
        /// UDP port to listen on.
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long, default_value = "Eevee")]
        creature: String,
        #[arg(short, long)]
        trainer: Option<String>,
    },
    /// Challenge a host.
    Join {
        /// Host address (e.g. 192.168.1.20:5001).
        #[arg(long)]
        host: SocketAddr,
        /// Local port; 0 lets the OS choose.
        #[arg(short, long, default_value_t = 0)]
        bind_port: u16,
        #[arg(short, long, default_value = "Eevee")]
        creature: String,
        #[arg(short, long)]
        trainer: Option<String>,
    },
    /// List the built-in creatures and their moves.
    Roster,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if cli.verbose {
        config.verbose = true;
    }
    init_logging(config.verbose);

    let dex = BuiltinDex::new();
    match cli.mode {
        Mode::Roster => {
            print_roster(&dex);
            Ok(())
        }
        Mode::Host {
            port,
            creature,
            trainer,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(trainer) = trainer {
                config.trainer = trainer;
            }
            let local = local_player(&dex, &config, &creature)?;
            let socket = Socket::bind(config.bind_addr()).await?;
            println!("Waiting for a challenger on {} ...", socket.local_addr);
            let session = Session::host(socket, local, config.retransmit());
            play(PeerDriver::spawn(session, config.tick())).await
        }
        Mode::Join {
            host,
            bind_port,
            creature,
            trainer,
        } => {
            if let Some(trainer) = trainer {
                config.trainer = trainer;
            }
            let local = local_player(&dex, &config, &creature)?;
            let socket = Socket::bind(SocketAddr::new(config.bind_ip, bind_port)).await?;
            println!("Challenging {host} ...");
            let session =
                Session::connect(socket, host, local, config.retransmit(), Instant::now())?;
            play(PeerDriver::spawn(session, config.tick())).await
        }
    }
}

fn init_logging(verbose: bool) {
    // RUST_LOG still wins over the default chosen here.
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

fn local_player(dex: &BuiltinDex, config: &Config, creature: &str) -> anyhow::Result<LocalPlayer> {
    let Some(creature) = dex.lookup_creature(creature) else {
        bail!(
            "unknown creature {creature:?}; try one of: {}",
            dex.creature_names().join(", ")
        );
    };
    Ok(LocalPlayer {
        trainer: config.trainer.clone(),
        creature,
    })
}

fn print_roster(dex: &BuiltinDex) {
    for name in dex.creature_names() {
        let Some(c) = dex.lookup_creature(&name) else {
            continue;
        };
        let types: Vec<String> = c.types.iter().map(ToString::to_string).collect();
        println!("{:<12} {:<14} HP {:>3}", c.name, types.join("/"), c.stats.hp);
        for m in &c.moves {
            println!("    {:<14} {:<9} {:>3}", m.name, m.move_type.to_string(), m.power);
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal front end
// ---------------------------------------------------------------------------

const HELP: &str = "commands: attack <move> | chat <text> | status | moves | quit";

async fn play(mut peer: PeerHandle<Socket>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut role: Option<Role> = None;

    loop {
        tokio::select! {
            event = peer.next_event() => match event {
                Some(event) => {
                    if let SessionEvent::Established { role: r, .. } = &event {
                        role = Some(*r);
                    }
                    let closed = matches!(event, SessionEvent::Closed(_));
                    render(&event, role);
                    if closed {
                        break;
                    }
                }
                None => break,
            },

            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => run_command(&peer, line.trim()).await,
                None => {
                    // EOF on stdin counts as quitting.
                    stdin_open = false;
                    peer.request_quit().await;
                }
            },
        }
    }

    let session = peer.join().await?;
    log::debug!("session finished in {}", session.state());
    Ok(())
}

async fn run_command(peer: &PeerHandle<Socket>, line: &str) {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };
    match cmd {
        "" => {}
        "attack" | "a" => match peer.submit_attack(rest).await {
            Ok(decl) => println!("You used {}!", decl.move_name),
            Err(e) => println!("! {e}"),
        },
        "chat" | "c" => {
            if let Err(e) = peer.submit_chat(rest).await {
                println!("! {e}");
            }
        }
        "status" | "s" => match peer.snapshot().await {
            Ok(snap) => {
                println!("state: {}", snap.state);
                if let Some(b) = snap.battle {
                    println!("  you:      {} {}/{}", b.local.name, b.local.hp, b.local.max_hp);
                    println!("  opponent: {} {}/{}", b.remote.name, b.remote.hp, b.remote.max_hp);
                    println!("  turn: {} ({} turns so far)", b.whose_turn, b.turns);
                }
            }
            Err(e) => println!("! {e}"),
        },
        "moves" | "m" => match peer.snapshot().await {
            Ok(snap) => match snap.battle {
                Some(b) => println!("moves: {}", b.local.moves.join(", ")),
                None => println!("! no battle yet"),
            },
            Err(e) => println!("! {e}"),
        },
        "quit" | "q" => peer.request_quit().await,
        _ => println!("{HELP}"),
    }
}

fn render(event: &SessionEvent, role: Option<Role>) {
    let who = |r: Role| if Some(r) == role { "You" } else { "Opponent" };
    match event {
        SessionEvent::Established {
            role,
            opponent_trainer,
            opponent,
            ..
        } => {
            println!(
                "{opponent_trainer} sent out {} (HP {})! You are the {role}.",
                opponent.name, opponent.stats.hp
            );
            if *role == Role::Host {
                println!("Your move. {HELP}");
            } else {
                println!("Waiting for the host to move. {HELP}");
            }
        }
        SessionEvent::AttackResolved(StatusReport {
            attacker,
            move_name,
            damage,
            host_hp,
            client_hp,
            next_turn,
            winner,
            ..
        }) => {
            println!(
                "{} used {move_name} for {damage} damage. HP host {host_hp} / client {client_hp}",
                who(*attacker)
            );
            if winner.is_none() && Some(*next_turn) == role {
                println!("Your move.");
            }
        }
        SessionEvent::ChatReceived(chat) => println!("[{}] {}", chat.sender, chat.text),
        SessionEvent::BattleEnded { winner } => {
            if Some(*winner) == role {
                println!("You win! Type quit to leave.");
            } else {
                println!("You lost. Type quit to leave.");
            }
        }
        SessionEvent::Rejected(report) => {
            println!("! opponent rejected that ({:?}): {}", report.code, report.detail)
        }
        SessionEvent::ProtocolViolation(v) => println!("! ignored a bad message: {v}"),
        SessionEvent::Closed(reason) => println!("Session closed: {reason}"),
    }
}
