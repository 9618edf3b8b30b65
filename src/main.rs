//! Labyrinth Sync
//!
//! `host` serves a game over WebSocket and plays as the host player.
//! `join` connects to a host as a remote player. Both read moves from stdin.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use labyrinth_sync::{
    config::ServerConfig,
    game::tile::{Side, SideIndex},
    network::{
        ClientCommand, ClientPeer, ClientSession, HostCommand, HostSession, SyncServer,
    },
    store::{FileStore, MemoryStore, SnapshotStore},
    Action, GameCore, GameStartSettings, PlayerId, VERSION,
};

#[derive(Debug, Parser)]
#[command(name = "labyrinth-sync", version, about = "Host or join a labyrinth game")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve a game and play as the host player
    Host {
        /// Players taking part
        #[arg(long, value_delimiter = ',', default_value = "0,1")]
        players: Vec<PlayerId>,
        /// Board seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Tiles per board side
        #[arg(long)]
        side_length: Option<usize>,
        /// Listen address (overrides LABYRINTH_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Snapshot directory (overrides LABYRINTH_STORE_DIR)
        #[arg(long)]
        store_dir: Option<PathBuf>,
        /// Ignore any saved game
        #[arg(long)]
        fresh: bool,
    },
    /// Join a hosted game
    Join {
        /// Host address, `addr:port` or a ws:// URL
        host: String,
        /// Our player id
        #[arg(long)]
        player: PlayerId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Labyrinth Sync v{}", VERSION);

    match Cli::parse().command {
        Command::Host { players, seed, side_length, bind, store_dir, fresh } => {
            let mut config = ServerConfig::from_env();
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if store_dir.is_some() {
                config.store_dir = store_dir;
            }
            let mut settings = GameStartSettings { seed, ..GameStartSettings::with_players(players) };
            if let Some(side_length) = side_length {
                settings.side_length = side_length;
            }
            run_host(config, settings, fresh).await
        }
        Command::Join { host, player } => run_join(ServerConfig::from_env(), &host, player).await,
    }
}

async fn run_host(config: ServerConfig, settings: GameStartSettings, fresh: bool) -> anyhow::Result<()> {
    let store: Box<dyn SnapshotStore + Send> = match &config.store_dir {
        Some(dir) => Box::new(
            FileStore::open(dir).with_context(|| format!("opening store at {}", dir.display()))?,
        ),
        None => Box::new(MemoryStore::new()),
    };

    let mut session = HostSession::new(
        GameCore::new(config.sync.history_size),
        store,
        config.sync.clone(),
    );
    info!("Session {}", session.id());

    if fresh || !session.restore() {
        let state = session.start_game(settings).map_err(|e| anyhow!(e))?;
        info!("Board hash {}", hex::encode(state.compute_hash()));
    }

    let mut notices = session.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => info!(?notice, "Host"),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_host_command(&line) {
                Some(command) => {
                    if cmd_tx.send(command).is_err() {
                        break;
                    }
                }
                None => warn!(line = %line, "Unrecognized command"),
            }
        }
    });

    let server = SyncServer::new(config);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(());
        }
    });

    let session = server.run(session, cmd_rx).await?;
    if let Some(state) = session.snapshot() {
        info!(version = state.version, "Host stopped");
    }
    Ok(())
}

async fn run_join(config: ServerConfig, host: &str, player: PlayerId) -> anyhow::Result<()> {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let session = ClientSession::new(
        player,
        GameCore::new(config.sync.history_size),
        out_tx,
        &config.sync,
    );

    let mut notices = session.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => info!(?notice, "Client"),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_client_command(&line, player) {
                Some(command) => {
                    if cmd_tx.send(command).is_err() {
                        break;
                    }
                }
                None => warn!(line = %line, "Unrecognized command"),
            }
        }
    });

    let peer = ClientPeer::new(host, player)?;
    let session = peer.run(session, out_rx, cmd_rx).await?;
    if let Some(state) = session.mirror() {
        info!(version = state.version, "Left game");
    }
    Ok(())
}

fn parse_side(word: &str) -> Option<Side> {
    match word.to_ascii_lowercase().as_str() {
        "top" => Some(Side::Top),
        "right" => Some(Side::Right),
        "bottom" => Some(Side::Bottom),
        "left" => Some(Side::Left),
        _ => None,
    }
}

/// `rotate`, `shift <side> <index>` or `move <x> <y>`.
fn parse_action(words: &[&str]) -> Option<Action> {
    match words {
        ["rotate"] => Some(Action::RotateFreeTile),
        ["shift", side, index] => Some(Action::ShiftTiles {
            side_index: SideIndex::new(parse_side(side)?, index.parse().ok()?),
        }),
        ["move", x, y] => Some(Action::MovePlayer { x: x.parse().ok()?, y: y.parse().ok()? }),
        _ => None,
    }
}

fn parse_host_command(line: &str) -> Option<HostCommand> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["undo"] => Some(HostCommand::Undo),
        ["finish"] => Some(HostCommand::Finish),
        ["remove", id] => Some(HostCommand::RemovePlayer(id.parse().ok()?)),
        ["as", id, rest @ ..] => Some(HostCommand::ApplyFor(id.parse().ok()?, parse_action(rest)?)),
        other => parse_action(other).map(HostCommand::Apply),
    }
}

fn parse_client_command(line: &str, player: PlayerId) -> Option<ClientCommand> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["leave"] => Some(ClientCommand::Finish),
        other => match parse_action(other)? {
            Action::RotateFreeTile => Some(ClientCommand::RotateFreeTile),
            Action::ShiftTiles { side_index } => Some(ClientCommand::ShiftTiles(side_index)),
            Action::MovePlayer { x, y } => Some(ClientCommand::MovePlayer { id: player, x, y }),
            Action::RequestGame => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_command() {
        assert!(matches!(parse_host_command("undo"), Some(HostCommand::Undo)));
        assert!(matches!(parse_host_command("remove 2"), Some(HostCommand::RemovePlayer(2))));
        assert!(matches!(
            parse_host_command("shift Top 2"),
            Some(HostCommand::Apply(Action::ShiftTiles { side_index })) if side_index == SideIndex::new(Side::Top, 2)
        ));
        assert!(matches!(
            parse_host_command("as 1 move 3 4"),
            Some(HostCommand::ApplyFor(1, Action::MovePlayer { x: 3, y: 4 }))
        ));
        assert!(parse_host_command("shift up 2").is_none());
        assert!(parse_host_command("").is_none());
    }

    #[test]
    fn test_parse_client_command() {
        assert_eq!(
            parse_client_command("move 1 2", 3),
            Some(ClientCommand::MovePlayer { id: 3, x: 1, y: 2 })
        );
        assert_eq!(parse_client_command("rotate", 3), Some(ClientCommand::RotateFreeTile));
        assert_eq!(parse_client_command("leave", 3), Some(ClientCommand::Finish));
        assert_eq!(parse_client_command("undo", 3), None);
    }
}
