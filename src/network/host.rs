//! Host Session
//!
//! Owns the single authoritative [`GameState`]. Every inbound action is
//! turn-gated against it, run through the engine, and on success persisted
//! and broadcast as a full snapshot to every open connection. The session is
//! driven by one event loop, so actions are serialized in arrival order.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::core::hash::short_hex;
use crate::game::engine::GameEngine;
use crate::game::player::{PlayerId, Position};
use crate::game::state::{GameStartSettings, GameState};
use crate::game::tile::Rotation;
use crate::network::protocol::{Action, DecodeError, HostMessage};
use crate::network::registry::{ConnectionId, ConnectionRegistry};
use crate::store::SnapshotStore;

/// Host session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// No game has been started.
    #[error("No active game")]
    NoActiveGame,

    /// The engine rejected the action.
    #[error("{0}")]
    Rejected(String),

    /// A networked player cannot be driven from the host.
    #[error("Player {0} is controlled remotely")]
    PlayerOnline(PlayerId),

    /// A replacement state contradicts itself.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Host lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostState {
    /// No game in progress.
    Idle,
    /// Game in progress with its authoritative state.
    Active(Box<GameState>),
}

/// Who an action came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The host's own player.
    Host,
    /// A player sharing the host's screen.
    LocalPlayer(PlayerId),
    /// A networked player, identified by connection metadata.
    Remote(PlayerId),
}

/// Transport events feeding the session.
#[derive(Debug)]
pub enum HostEvent {
    /// Data channel opened.
    Opened {
        /// Player id announced by the client.
        player: PlayerId,
        /// Transport connection id.
        conn: ConnectionId,
        /// Outbound text frames.
        sender: mpsc::UnboundedSender<String>,
    },
    /// Text frame received.
    Message {
        /// Sender.
        player: PlayerId,
        /// Transport connection id.
        conn: ConnectionId,
        /// Raw frame.
        text: String,
    },
    /// Data channel closed.
    Closed {
        /// Player id.
        player: PlayerId,
        /// Transport connection id.
        conn: ConnectionId,
    },
    /// Data channel failed.
    Failed {
        /// Player id.
        player: PlayerId,
        /// Transport connection id.
        conn: ConnectionId,
        /// Error text.
        error: String,
    },
}

/// Commands from the host's own controls.
#[derive(Debug, Clone)]
pub enum HostCommand {
    /// Start a new game.
    Start(GameStartSettings),
    /// Act for the host player.
    Apply(Action),
    /// Act for a player sharing the host's screen.
    ApplyFor(PlayerId, Action),
    /// Replace the state wholesale.
    SetGame(Box<GameState>),
    /// Step back one state.
    Undo,
    /// Remove a player, dropping their connection if online.
    RemovePlayer(PlayerId),
    /// End the game.
    Finish,
}

/// Things the host's UI should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostNotice {
    /// A new authoritative state was committed.
    Updated {
        /// State version.
        version: u64,
    },
    /// The engine rejected an action.
    Rejected {
        /// Who attempted it.
        player: PlayerId,
        /// Rejection text.
        message: String,
    },
    /// A player connected.
    PlayerConnected(PlayerId),
    /// A player disconnected.
    PlayerDisconnected(PlayerId),
    /// A player's channel failed.
    ConnectionError {
        /// Player id.
        player: PlayerId,
        /// Error text.
        error: String,
    },
    /// The game was finished.
    Finished,
}

/// Authoritative session.
pub struct HostSession<E: GameEngine, S: SnapshotStore> {
    /// Session address, used in logs and shared with clients out-of-band.
    id: Uuid,
    config: SyncConfig,
    engine: E,
    store: S,
    state: HostState,
    registry: ConnectionRegistry,
    notice_tx: broadcast::Sender<HostNotice>,
}

impl<E: GameEngine, S: SnapshotStore> HostSession<E, S> {
    /// Create an idle session.
    pub fn new(engine: E, store: S, config: SyncConfig) -> Self {
        let (notice_tx, _) = broadcast::channel(256);

        Self {
            id: Uuid::new_v4(),
            config,
            engine,
            store,
            state: HostState::Idle,
            registry: ConnectionRegistry::new(),
            notice_tx,
        }
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The host's own player id.
    pub fn host_player(&self) -> PlayerId {
        self.config.host_player
    }

    /// Lifecycle state.
    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Current authoritative snapshot.
    pub fn snapshot(&self) -> Option<&GameState> {
        match &self.state {
            HostState::Active(state) => Some(&**state),
            HostState::Idle => None,
        }
    }

    /// Whether `player` is connected over the network.
    pub fn is_online(&self, player: PlayerId) -> bool {
        self.registry.is_online(player)
    }

    /// Subscribe to UI notices.
    pub fn subscribe(&self) -> broadcast::Receiver<HostNotice> {
        self.notice_tx.subscribe()
    }

    fn notify(&self, notice: HostNotice) {
        // No subscribers is fine
        let _ = self.notice_tx.send(notice);
    }

    /// Resume a persisted game, if any.
    pub fn restore(&mut self) -> bool {
        match self.store.load() {
            Some(state) if state.validate().is_err() => {
                warn!(session = %self.id, "Stored game is inconsistent, not restored");
                false
            }
            Some(state) => {
                info!(session = %self.id, version = state.version, "Restored game");
                self.engine.set_game(state.clone());
                self.state = HostState::Active(Box::new(state));
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // TRANSPORT EVENTS
    // =========================================================================

    /// Dispatch a transport event.
    pub fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Opened { player, conn, sender } => self.on_open(player, conn, sender),
            HostEvent::Message { player, conn, text } => {
                if let Err(e) = self.handle_message(player, &text) {
                    warn!(session = %self.id, player, conn = conn.0, error = %e, "Dropped message");
                }
            }
            HostEvent::Closed { player, conn } => self.on_close(player, conn),
            HostEvent::Failed { player, conn, error } => self.on_error(player, conn, &error),
        }
    }

    /// Register a newly opened channel.
    pub fn on_open(&mut self, player: PlayerId, conn: ConnectionId, sender: mpsc::UnboundedSender<String>) {
        info!(session = %self.id, player, conn = conn.0, "Player connected");
        self.registry.add(player, conn, sender);
        self.notify(HostNotice::PlayerConnected(player));
    }

    /// Forget a closed channel.
    pub fn on_close(&mut self, player: PlayerId, conn: ConnectionId) {
        if self.registry.remove_connection(player, conn) {
            info!(session = %self.id, player, conn = conn.0, "Player disconnected");
            self.notify(HostNotice::PlayerDisconnected(player));
        } else {
            debug!(session = %self.id, player, conn = conn.0, "Stale close ignored");
        }
    }

    /// Forget a failed channel.
    pub fn on_error(&mut self, player: PlayerId, conn: ConnectionId, error: &str) {
        error!(session = %self.id, player, conn = conn.0, error, "Connection error");
        if self.registry.remove_connection(player, conn) {
            self.notify(HostNotice::ConnectionError {
                player,
                error: error.to_string(),
            });
        }
    }

    /// Handle one text frame from `player`.
    ///
    /// Unknown RPC names are logged and dropped. Malformed frames are
    /// returned to the transport.
    pub fn handle_message(&mut self, player: PlayerId, text: &str) -> Result<(), DecodeError> {
        let action = match Action::from_json(text) {
            Ok(action) => action,
            Err(DecodeError::UnknownRpc(name)) => {
                warn!(session = %self.id, player, rpc = %name, "Unknown RPC");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // Remote failures are already logged and noticed
        let _ = self.handle_action(Origin::Remote(player), action);
        Ok(())
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Authorize and apply an action.
    ///
    /// Returns the committed state, or `None` when nothing changed: a
    /// `requestGame`, or an action from someone other than the turn holder.
    #[instrument(skip(self), fields(session = %self.id))]
    pub fn handle_action(
        &mut self,
        origin: Origin,
        action: Action,
    ) -> Result<Option<GameState>, HostError> {
        let player = self.resolve(origin)?;

        let current = match &self.state {
            HostState::Active(state) => state,
            HostState::Idle => {
                debug!(player, rpc = action.name(), "No active game");
                return Err(HostError::NoActiveGame);
            }
        };

        if !action.is_mutating() {
            if let Origin::Remote(player) = origin {
                self.send_snapshot_to(player);
            }
            return Ok(None);
        }

        if player != current.player_turn {
            debug!(player, turn = current.player_turn, rpc = action.name(), "Not turn holder, dropped");
            return Ok(None);
        }

        let result = match action {
            Action::RotateFreeTile => self.engine.rotate_free_tile(Rotation::Ninety),
            Action::ShiftTiles { side_index } => self.engine.shift_tiles(side_index),
            Action::MovePlayer { x, y } => self.engine.move_player(player, Position::new(x, y)),
            Action::RequestGame => return Ok(None),
        };

        match result {
            Ok(state) => {
                info!(player, rpc = action.name(), version = state.version, "Action accepted");
                self.commit(state.clone());
                Ok(Some(state))
            }
            Err(message) => Err(self.reject(player, message)),
        }
    }

    /// Map an origin to the acting player.
    fn resolve(&self, origin: Origin) -> Result<PlayerId, HostError> {
        match origin {
            Origin::Host => Ok(self.config.host_player),
            Origin::LocalPlayer(player) if self.registry.is_online(player) => {
                Err(HostError::PlayerOnline(player))
            }
            Origin::LocalPlayer(player) | Origin::Remote(player) => Ok(player),
        }
    }

    fn reject(&self, player: PlayerId, message: String) -> HostError {
        warn!(session = %self.id, player, %message, "Action rejected");
        self.notify(HostNotice::Rejected {
            player,
            message: message.clone(),
        });
        HostError::Rejected(message)
    }

    /// Install a new authoritative state, persist it and broadcast it.
    fn commit(&mut self, state: GameState) {
        if let Err(e) = self.store.save(&state) {
            warn!(session = %self.id, error = %e, "Failed to persist state");
        }

        match HostMessage::snapshot(&state).to_json() {
            Ok(text) => {
                let delivered = self.registry.broadcast(&text);
                debug!(
                    session = %self.id,
                    version = state.version,
                    hash = %short_hex(&state.compute_hash()),
                    delivered,
                    "Snapshot broadcast"
                );
            }
            Err(e) => error!(session = %self.id, error = %e, "Failed to encode snapshot"),
        }

        let version = state.version;
        self.state = HostState::Active(Box::new(state));
        self.notify(HostNotice::Updated { version });
    }

    fn send_snapshot_to(&self, player: PlayerId) {
        let Some(state) = self.snapshot() else {
            return;
        };
        match HostMessage::snapshot(state).to_json() {
            Ok(text) => {
                if self.registry.send_to(player, &text) {
                    debug!(session = %self.id, player, version = state.version, "Snapshot sent");
                }
            }
            Err(e) => error!(session = %self.id, error = %e, "Failed to encode snapshot"),
        }
    }

    // =========================================================================
    // HOST CONTROLS
    // =========================================================================

    /// Dispatch a host command, logging failures.
    pub fn handle_command(&mut self, command: HostCommand) {
        let result = match command {
            HostCommand::Start(settings) => self.start_game(settings).map(|_| ()),
            HostCommand::Apply(action) => self.apply_local(action).map(|_| ()),
            HostCommand::ApplyFor(player, action) => {
                self.handle_action(Origin::LocalPlayer(player), action).map(|_| ())
            }
            HostCommand::SetGame(state) => self.set_game(*state),
            HostCommand::Undo => self.undo_move().map(|_| ()),
            HostCommand::RemovePlayer(player) => self.remove_player(player).map(|_| ()),
            HostCommand::Finish => {
                self.finish_game();
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(session = %self.id, error = %e, "Host command failed");
        }
    }

    /// Start a new game and broadcast it.
    pub fn start_game(&mut self, settings: GameStartSettings) -> Result<GameState, HostError> {
        let host_player = self.config.host_player;
        match self.engine.start_game(settings) {
            Ok(state) => {
                info!(session = %self.id, players = state.players.len(), "Game started");
                self.commit(state.clone());
                Ok(state)
            }
            Err(message) => Err(self.reject(host_player, message)),
        }
    }

    /// Act for the host's own player.
    pub fn apply_local(&mut self, action: Action) -> Result<Option<GameState>, HostError> {
        self.handle_action(Origin::Host, action)
    }

    /// Replace the authoritative state wholesale.
    pub fn set_game(&mut self, state: GameState) -> Result<(), HostError> {
        if let Err(e) = state.validate() {
            warn!(session = %self.id, error = %e, "Replacement state refused");
            return Err(HostError::InvalidState(e.to_string()));
        }
        self.engine.set_game(state.clone());
        self.commit(state);
        Ok(())
    }

    /// Step back one state.
    pub fn undo_move(&mut self) -> Result<GameState, HostError> {
        if self.snapshot().is_none() {
            return Err(HostError::NoActiveGame);
        }
        match self.engine.undo_move() {
            Ok(state) => {
                info!(session = %self.id, version = state.version, "Undo");
                self.commit(state.clone());
                Ok(state)
            }
            Err(message) => Err(self.reject(self.config.host_player, message)),
        }
    }

    /// Remove a player from the game, closing their connection if online.
    pub fn remove_player(&mut self, player: PlayerId) -> Result<GameState, HostError> {
        if self.snapshot().is_none() {
            return Err(HostError::NoActiveGame);
        }
        if let Some(conn) = self.registry.remove(player) {
            // Dropping the sender ends the socket writer, which closes the channel.
            info!(
                session = %self.id,
                player,
                conn = conn.id.0,
                open_for = ?conn.opened_at.elapsed(),
                "Dropping player connection"
            );
            self.notify(HostNotice::PlayerDisconnected(player));
        }
        match self.engine.remove_player(player) {
            Ok(state) => {
                self.commit(state.clone());
                Ok(state)
            }
            Err(message) => Err(self.reject(self.config.host_player, message)),
        }
    }

    /// End the game and clear persisted state. Connections stay open.
    pub fn finish_game(&mut self) {
        info!(session = %self.id, "Game finished");
        self.state = HostState::Idle;
        if let Err(e) = self.store.new_game() {
            warn!(session = %self.id, error = %e, "Failed to clear stored state");
        }
        self.notify(HostNotice::Finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::GameCore;
    use crate::game::tile::{Side, SideIndex};
    use crate::store::MemoryStore;

    type TestHost = HostSession<GameCore, MemoryStore>;

    fn host() -> TestHost {
        HostSession::new(GameCore::default(), MemoryStore::new(), SyncConfig::default())
    }

    fn started_host() -> TestHost {
        let mut host = host();
        host.start_game(GameStartSettings::with_players([0, 1])).unwrap();
        host
    }

    fn connect(host: &mut TestHost, player: PlayerId, conn: u64) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        host.on_open(player, ConnectionId(conn), tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<HostMessage> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(HostMessage::from_json(&text).unwrap());
        }
        out
    }

    fn shift_top0() -> String {
        Action::ShiftTiles { side_index: SideIndex::new(Side::Top, 0) }
            .to_json()
            .unwrap()
    }

    #[tokio::test]
    async fn test_idle_host_ignores_requests() {
        let mut host = host();
        let mut rx = connect(&mut host, 1, 1);

        host.handle_message(1, r#"{"name":"requestGame"}"#).unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(host.apply_local(Action::RotateFreeTile), Err(HostError::NoActiveGame));
    }

    #[tokio::test]
    async fn test_start_game_broadcasts_snapshot() {
        let mut host = host();
        let mut rx = connect(&mut host, 1, 1);

        let state = host.start_game(GameStartSettings::with_players([0, 1])).unwrap();
        assert_eq!(drain(&mut rx), vec![HostMessage::snapshot(&state)]);
        assert_eq!(host.snapshot(), Some(&state));
    }

    #[tokio::test]
    async fn test_request_game_answers_only_requester() {
        let mut host = started_host();
        let mut rx1 = connect(&mut host, 1, 1);
        let mut rx2 = connect(&mut host, 2, 2);

        host.handle_message(2, r#"{"name":"requestGame"}"#).unwrap();

        assert!(drain(&mut rx1).is_empty());
        let replies = drain(&mut rx2);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0], HostMessage::snapshot(host.snapshot().unwrap()));
    }

    #[tokio::test]
    async fn test_non_turn_holder_is_dropped() {
        let mut host = started_host();
        let mut rx = connect(&mut host, 1, 1);
        let before = host.snapshot().cloned();

        host.handle_message(1, r#"{"name":"movePlayer","x":3,"y":4}"#).unwrap();
        host.handle_message(1, &shift_top0()).unwrap();

        assert_eq!(host.snapshot().cloned(), before);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_turn_holder_action_is_broadcast_and_saved() {
        let mut host = started_host();
        let mut rx1 = connect(&mut host, 1, 1);
        let mut notices = host.subscribe();

        let state = host
            .apply_local(Action::ShiftTiles { side_index: SideIndex::new(Side::Top, 0) })
            .unwrap()
            .unwrap();

        assert_eq!(drain(&mut rx1), vec![HostMessage::snapshot(&state)]);
        assert_eq!(host.store.load(), Some(state.clone()));
        assert_eq!(notices.try_recv().unwrap(), HostNotice::Updated { version: state.version });
    }

    #[tokio::test]
    async fn test_rejection_is_local_only() {
        let mut host = started_host();
        let mut rx = connect(&mut host, 1, 1);
        let mut notices = host.subscribe();
        let before = host.snapshot().cloned();

        let err = host
            .apply_local(Action::MovePlayer { x: 0, y: 0 })
            .unwrap_err();
        assert_eq!(
            err,
            HostError::Rejected("Cannot move player: Player has to shift tiles first".to_string())
        );
        assert_eq!(host.snapshot().cloned(), before);
        assert!(drain(&mut rx).is_empty());
        assert!(matches!(notices.try_recv().unwrap(), HostNotice::Rejected { player: 0, .. }));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages() {
        let mut host = started_host();
        let _rx = connect(&mut host, 0, 1);

        assert_eq!(host.handle_message(0, r#"{"name":"setGame"}"#), Ok(()));
        assert!(matches!(host.handle_message(0, "{{{"), Err(DecodeError::Malformed(_))));
        assert_eq!(host.snapshot().map(|s| s.version), Some(0));
    }

    #[tokio::test]
    async fn test_close_and_error_remove_connection() {
        let mut host = started_host();
        let _rx1 = connect(&mut host, 1, 1);
        let _rx2 = connect(&mut host, 2, 2);

        host.handle_event(HostEvent::Closed { player: 1, conn: ConnectionId(1) });
        host.handle_event(HostEvent::Failed {
            player: 2,
            conn: ConnectionId(2),
            error: "reset".to_string(),
        });
        assert!(!host.is_online(1));
        assert!(!host.is_online(2));
    }

    #[tokio::test]
    async fn test_local_player_must_not_be_online() {
        let mut host = started_host();
        let _rx = connect(&mut host, 0, 1);

        let err = host
            .handle_action(Origin::LocalPlayer(0), Action::RotateFreeTile)
            .unwrap_err();
        assert_eq!(err, HostError::PlayerOnline(0));
    }

    #[tokio::test]
    async fn test_remove_online_player_drops_connection() {
        let mut host = started_host();
        let mut rx = connect(&mut host, 1, 1);

        let state = host.remove_player(1).unwrap();
        assert!(!host.is_online(1));
        assert!(!state.players.contains_key(&1));

        // Sender dropped: the channel is closed once drained.
        assert!(drain(&mut rx).is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_undo_broadcasts_previous_state() {
        let mut host = started_host();
        let initial = host.snapshot().cloned().unwrap();
        let mut rx = connect(&mut host, 1, 1);

        host.apply_local(Action::ShiftTiles { side_index: SideIndex::new(Side::Top, 0) })
            .unwrap();
        let undone = host.undo_move().unwrap();

        assert_eq!(undone, initial);
        let messages = drain(&mut rx);
        assert_eq!(messages.last(), Some(&HostMessage::snapshot(&initial)));
    }

    #[tokio::test]
    async fn test_restore_and_finish() {
        let mut first = started_host();
        first
            .apply_local(Action::ShiftTiles { side_index: SideIndex::new(Side::Top, 0) })
            .unwrap();
        let saved = first.snapshot().cloned().unwrap();

        let mut store = MemoryStore::new();
        store.save(&saved).unwrap();
        let mut second = HostSession::new(GameCore::default(), store, SyncConfig::default());
        assert!(second.restore());
        assert_eq!(second.snapshot(), Some(&saved));

        second.finish_game();
        assert_eq!(second.state(), &HostState::Idle);
        assert!(second.store.load().is_none());
    }

    #[tokio::test]
    async fn test_restore_skips_inconsistent_entry() {
        let mut store = MemoryStore::new();
        store.save(&GameState::new(&GameStartSettings::with_players([0, 1])).unwrap()).unwrap();
        let mut entry: serde_json::Value =
            serde_json::from_str(store.raw(crate::store::GAME_STATE_KEY).unwrap()).unwrap();
        if let Some(tiles) = entry["state"]["board"]["tiles"].as_array_mut() {
            tiles.truncate(3);
        }
        store.insert_raw(crate::store::GAME_STATE_KEY, entry.to_string());

        let mut host = HostSession::new(GameCore::default(), store, SyncConfig::default());
        assert!(!host.restore());
        assert_eq!(host.state(), &HostState::Idle);
        assert_eq!(host.handle_message(0, &shift_top0()), Ok(()));
        assert_eq!(host.apply_local(Action::RotateFreeTile), Err(HostError::NoActiveGame));
    }

    #[tokio::test]
    async fn test_set_game_refuses_inconsistent_state() {
        let mut host = started_host();
        let mut rx = connect(&mut host, 1, 1);
        let before = host.snapshot().cloned();
        let mut broken = before.clone().unwrap();
        broken.board.tiles.truncate(3);

        assert!(matches!(host.set_game(broken), Err(HostError::InvalidState(_))));
        assert_eq!(host.snapshot().cloned(), before);
        assert!(drain(&mut rx).is_empty());

        // The engine kept the good state too.
        assert!(host
            .apply_local(Action::ShiftTiles { side_index: SideIndex::new(Side::Top, 0) })
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_set_game_broadcasts() {
        let mut host = started_host();
        let mut rx = connect(&mut host, 1, 1);
        let mut replacement = host.snapshot().cloned().unwrap();
        replacement.player_turn = 1;

        host.handle_command(HostCommand::SetGame(Box::new(replacement.clone())));
        assert_eq!(drain(&mut rx), vec![HostMessage::snapshot(&replacement)]);
        assert_eq!(host.snapshot(), Some(&replacement));
    }
}
