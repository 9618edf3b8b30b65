//! Client Session
//!
//! Mirrors the host's state. Local actions are guarded on the turn, applied
//! optimistically through the same engine the host runs, and sent to the
//! host. Every snapshot that arrives replaces the mirror outright.

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::core::hash::short_hex;
use crate::game::engine::GameEngine;
use crate::game::player::{PlayerId, Position};
use crate::game::state::GameState;
use crate::game::tile::{Rotation, SideIndex};
use crate::network::animation::MovementAnimator;
use crate::network::protocol::{Action, DecodeError, HostMessage};
use crate::network::resync::ResyncTracker;

/// Client session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Only the host may do this.
    #[error("{0}")]
    Refused(&'static str),

    /// The local engine rejected the action.
    #[error("{0}")]
    Rejected(String),

    /// No snapshot received yet.
    #[error("No game received from host yet")]
    NoGame,

    /// The channel to the host is gone.
    #[error("Failed to send to host: {0}")]
    Send(String),

    /// A stored state contradicts itself.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Things the client's UI should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
    /// A snapshot replaced the mirror.
    Synced {
        /// State version.
        version: u64,
    },
    /// The local engine rejected an action.
    Rejected(String),
    /// A host-only command was attempted.
    Refused(&'static str),
    /// The host replied with an error.
    HostError(String),
    /// No snapshot arrived in time; a fresh one was requested.
    Resyncing,
    /// The connection closed.
    ConnectionClosed,
    /// The connection failed.
    ConnectionError(String),
}

/// Commands from the client's own controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Rotate the free tile a quarter turn.
    RotateFreeTile,
    /// Push the free tile in.
    ShiftTiles(SideIndex),
    /// Move a figure.
    MovePlayer {
        /// Player to move.
        id: PlayerId,
        /// Target column.
        x: usize,
        /// Target row.
        y: usize,
    },
    /// Leave the game if `id` is us.
    RemovePlayer(PlayerId),
    /// Leave the game.
    Finish,
}

/// Optimistic mirror of the host's game.
pub struct ClientSession<E: GameEngine> {
    player_id: PlayerId,
    engine: E,
    mirror: Option<GameState>,
    outbound: mpsc::UnboundedSender<String>,
    resync: ResyncTracker,
    animator: MovementAnimator,
    notice_tx: broadcast::Sender<ClientNotice>,
    disconnect_requested: bool,
}

impl<E: GameEngine> ClientSession<E> {
    /// Create a session for `player_id` sending RPCs on `outbound`.
    pub fn new(
        player_id: PlayerId,
        engine: E,
        outbound: mpsc::UnboundedSender<String>,
        config: &SyncConfig,
    ) -> Self {
        let (notice_tx, _) = broadcast::channel(256);

        Self {
            player_id,
            engine,
            mirror: None,
            outbound,
            resync: ResyncTracker::new(config.resync_timeout),
            animator: MovementAnimator::new(config.move_animation),
            notice_tx,
            disconnect_requested: false,
        }
    }

    /// This client's player.
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Local mirror.
    pub fn mirror(&self) -> Option<&GameState> {
        self.mirror.as_ref()
    }

    /// Resync watchdog.
    pub fn resync(&self) -> &ResyncTracker {
        &self.resync
    }

    /// Move animation.
    pub fn animator(&self) -> &MovementAnimator {
        &self.animator
    }

    /// Whether the user asked to leave.
    pub fn wants_disconnect(&self) -> bool {
        self.disconnect_requested
    }

    /// Subscribe to UI notices.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientNotice> {
        self.notice_tx.subscribe()
    }

    fn notify(&self, notice: ClientNotice) {
        let _ = self.notice_tx.send(notice);
    }

    /// Cell to draw `player` on, following any running animation.
    pub fn displayed_position(&self, player: PlayerId) -> Option<Position> {
        self.animator.displayed(player).or_else(|| {
            self.mirror
                .as_ref()
                .and_then(|s| s.players.get(&player))
                .map(|p| p.position)
        })
    }

    /// Seed the mirror from persisted state until the host answers.
    pub fn restore(&mut self, state: GameState) -> Result<(), ClientError> {
        state
            .validate()
            .map_err(|e| ClientError::InvalidState(e.to_string()))?;
        self.engine.set_game(state.clone());
        self.mirror = Some(state);
        Ok(())
    }

    fn send(&self, action: Action) -> Result<(), ClientError> {
        let text = action.to_json().map_err(|e| ClientError::Send(e.to_string()))?;
        self.outbound
            .send(text)
            .map_err(|_| ClientError::Send("channel closed".to_string()))
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Channel opened: ask for the current game.
    pub fn on_open(&mut self) -> Result<(), ClientError> {
        info!(player = self.player_id, "Connected to host");
        self.send(Action::RequestGame)
    }

    /// Channel closed. No reconnect is attempted.
    pub fn on_close(&mut self) {
        info!(player = self.player_id, "Connection to host closed");
        self.resync.disarm();
        self.notify(ClientNotice::ConnectionClosed);
    }

    /// Channel failed.
    pub fn on_error(&mut self, error: &str) {
        warn!(player = self.player_id, error, "Connection to host failed");
        self.resync.disarm();
        self.notify(ClientNotice::ConnectionError(error.to_string()));
    }

    /// Handle one text frame from the host.
    pub fn on_message(&mut self, text: &str, now: Instant) -> Result<(), DecodeError> {
        match HostMessage::from_json(text)? {
            HostMessage::Ok(state) => {
                self.resync.disarm();
                self.apply_snapshot(*state, now);
            }
            HostMessage::Err(message) => {
                self.resync.disarm();
                warn!(player = self.player_id, %message, "Host error");
                self.notify(ClientNotice::HostError(message));
            }
        }
        Ok(())
    }

    /// Replace the mirror with an authoritative snapshot.
    fn apply_snapshot(&mut self, state: GameState, now: Instant) {
        if self.mirror.as_ref() == Some(&state) {
            debug!(player = self.player_id, version = state.version, "Snapshot unchanged");
            self.notify(ClientNotice::Synced { version: state.version });
            return;
        }

        let moved = self.moved_player(&state);
        self.engine.set_game(state.clone());

        if let Some((player, from)) = moved {
            match self.engine.last_path() {
                Ok(path) => {
                    self.animator.start(player, from, path, now);
                }
                Err(e) => debug!(player, error = %e, "No path to animate"),
            }
        } else if let Some((player, target)) = self.animator.target() {
            // Snap if the figure no longer ends where the animation goes.
            let position = state.players.get(&player).map(|p| p.position);
            if position != Some(target) {
                self.animator.cancel();
            }
        }

        debug!(
            player = self.player_id,
            version = state.version,
            hash = %short_hex(&state.compute_hash()),
            "Snapshot applied"
        );
        let version = state.version;
        self.mirror = Some(state);
        self.notify(ClientNotice::Synced { version });
    }

    /// Player whose figure walked to a new cell in `next`, with its old cell.
    fn moved_player(&self, next: &GameState) -> Option<(PlayerId, Position)> {
        let last_move = next.last_move.as_ref()?;
        let old = self.mirror.as_ref()?.players.get(&last_move.player)?.position;
        let new = next.players.get(&last_move.player)?.position;
        (old != new && last_move.path.last() == Some(&new)).then_some((last_move.player, old))
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    /// Fire the resync request if its window lapsed.
    pub fn poll_resync(&mut self, now: Instant) -> bool {
        if !self.resync.poll(now) {
            return false;
        }
        info!(player = self.player_id, "No snapshot after local change, requesting game");
        self.notify(ClientNotice::Resyncing);
        if let Err(e) = self.send(Action::RequestGame) {
            warn!(player = self.player_id, error = %e, "Resync request failed");
        }
        true
    }

    /// Advance the move animation.
    pub fn animation_tick(&mut self, now: Instant) -> bool {
        self.animator.tick(now)
    }

    /// Earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.resync.deadline(), self.animator.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Guard, apply locally, send, arm the watchdog.
    ///
    /// Returns `false` when it is not our turn and nothing happened.
    fn mutate(
        &mut self,
        action: Action,
        now: Instant,
        apply: impl FnOnce(&mut E) -> Result<GameState, String>,
    ) -> Result<bool, ClientError> {
        let mirror = self.mirror.as_ref().ok_or(ClientError::NoGame)?;
        if mirror.player_turn != self.player_id {
            debug!(player = self.player_id, turn = mirror.player_turn, rpc = action.name(), "Not our turn");
            return Ok(false);
        }

        match apply(&mut self.engine) {
            Ok(state) => {
                debug!(player = self.player_id, rpc = action.name(), version = state.version, "Applied optimistically");
                let moved = self.moved_player(&state);
                if let Some((player, from)) = moved {
                    if let Ok(path) = self.engine.last_path() {
                        self.animator.start(player, from, path, now);
                    }
                }
                self.mirror = Some(state);
                self.send(action)?;
                self.resync.arm(now);
                Ok(true)
            }
            Err(message) => {
                warn!(player = self.player_id, rpc = action.name(), %message, "Rejected locally");
                self.notify(ClientNotice::Rejected(message.clone()));
                Err(ClientError::Rejected(message))
            }
        }
    }

    /// Rotate the free tile a quarter turn.
    pub fn rotate_free_tile(&mut self, now: Instant) -> Result<bool, ClientError> {
        self.mutate(Action::RotateFreeTile, now, |engine| {
            engine.rotate_free_tile(Rotation::Ninety)
        })
    }

    /// Push the free tile in.
    pub fn shift_tiles(&mut self, side_index: SideIndex, now: Instant) -> Result<bool, ClientError> {
        self.mutate(Action::ShiftTiles { side_index }, now, |engine| {
            engine.shift_tiles(side_index)
        })
    }

    /// Move our figure. Requests for other figures are ignored.
    pub fn move_player(
        &mut self,
        id: PlayerId,
        x: usize,
        y: usize,
        now: Instant,
    ) -> Result<bool, ClientError> {
        if id != self.player_id {
            debug!(player = self.player_id, id, "Cannot move another player's figure");
            return Ok(false);
        }
        self.mutate(Action::MovePlayer { x, y }, now, |engine| {
            engine.move_player(id, Position::new(x, y))
        })
    }

    fn refuse(&self, what: &'static str) -> ClientError {
        warn!(player = self.player_id, "{what}");
        self.notify(ClientNotice::Refused(what));
        ClientError::Refused(what)
    }

    /// Host only.
    pub fn set_game(&mut self, _state: GameState) -> Result<(), ClientError> {
        Err(self.refuse("Client cannot set game"))
    }

    /// Host only.
    pub fn start_game(&mut self) -> Result<(), ClientError> {
        Err(self.refuse("Client cannot start game"))
    }

    /// Host only.
    pub fn undo_move(&mut self) -> Result<(), ClientError> {
        Err(self.refuse("Client cannot undo move"))
    }

    /// Removing ourselves means leaving; anyone else is host only.
    pub fn remove_player(&mut self, id: PlayerId) -> Result<(), ClientError> {
        if id == self.player_id {
            self.finish_game();
            Ok(())
        } else {
            Err(self.refuse("Client cannot remove player"))
        }
    }

    /// Leave the game.
    pub fn finish_game(&mut self) {
        info!(player = self.player_id, "Leaving game");
        self.disconnect_requested = true;
    }

    /// Dispatch a client command, logging failures.
    pub fn handle_command(&mut self, command: ClientCommand, now: Instant) {
        let result = match command {
            ClientCommand::RotateFreeTile => self.rotate_free_tile(now).map(|_| ()),
            ClientCommand::ShiftTiles(side_index) => self.shift_tiles(side_index, now).map(|_| ()),
            ClientCommand::MovePlayer { id, x, y } => self.move_player(id, x, y, now).map(|_| ()),
            ClientCommand::RemovePlayer(id) => self.remove_player(id),
            ClientCommand::Finish => {
                self.finish_game();
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!(player = self.player_id, error = %e, "Client command failed");
        }
    }
}
