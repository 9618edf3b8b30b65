//! Engine Contract
//!
//! The synchronization layer only talks to the game through [`GameEngine`].
//! Every call is synchronous and returns either the new state or the
//! user-facing rejection message. [`GameCore`] is the labyrinth
//! implementation with a bounded undo history.

use std::collections::VecDeque;

use tracing::trace;

use crate::game::player::{PlayerId, Position};
use crate::game::state::{GameError, GameStartSettings, GameState, MovePlayerError};
use crate::game::tile::{Rotation, SideIndex};

/// Default number of states kept for undo.
pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// Deterministic game rules as seen by host and clients.
pub trait GameEngine {
    /// Start a fresh game, discarding any history.
    fn start_game(&mut self, settings: GameStartSettings) -> Result<GameState, String>;

    /// Rotate the free tile clockwise.
    fn rotate_free_tile(&mut self, rotation: Rotation) -> Result<GameState, String>;

    /// Push the free tile in.
    fn shift_tiles(&mut self, side_index: SideIndex) -> Result<GameState, String>;

    /// Move a figure.
    fn move_player(&mut self, id: PlayerId, position: Position) -> Result<GameState, String>;

    /// Remove a player.
    fn remove_player(&mut self, id: PlayerId) -> Result<GameState, String>;

    /// Step back one state.
    fn undo_move(&mut self) -> Result<GameState, String>;

    /// Replace the current state wholesale, discarding history.
    fn set_game(&mut self, state: GameState);

    /// Cells the turn holder can reach.
    fn currently_reachable(&self) -> Result<Vec<Position>, String>;

    /// Path of the latest figure move, empty if there was none.
    fn last_path(&self) -> Result<Vec<Position>, String>;
}

/// Labyrinth rules with undo history.
#[derive(Clone, Debug)]
pub struct GameCore {
    history: VecDeque<GameState>,
    history_size: usize,
}

impl Default for GameCore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl GameCore {
    /// Create an engine keeping up to `history_size` states (at least one).
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            history: VecDeque::with_capacity(history_size),
            history_size,
        }
    }

    /// Current state, if a game is loaded.
    pub fn current(&self) -> Option<&GameState> {
        self.history.back()
    }

    /// Number of states available for undo, including the current one.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn last(&self) -> Result<&GameState, GameError> {
        self.history.back().ok_or(GameError::NotStarted)
    }

    /// Apply `action` to a copy of the current state and record it.
    ///
    /// The stored state is untouched when the action fails.
    fn do_action<E>(
        &mut self,
        action: impl FnOnce(&mut GameState) -> Result<(), E>,
    ) -> Result<GameState, String>
    where
        GameError: From<E>,
    {
        let mut game = self.last().map_err(|e| e.to_string())?.clone();
        action(&mut game).map_err(|e| GameError::from(e).to_string())?;

        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(game.clone());
        trace!(version = game.version, history = self.history.len(), "Recorded state");
        Ok(game)
    }
}

impl GameEngine for GameCore {
    fn start_game(&mut self, settings: GameStartSettings) -> Result<GameState, String> {
        let game = GameState::new(&settings).map_err(|e| GameError::from(e).to_string())?;
        self.set_game(game.clone());
        Ok(game)
    }

    fn rotate_free_tile(&mut self, rotation: Rotation) -> Result<GameState, String> {
        // Rotation replaces the latest entry instead of adding an undo step.
        let game = self
            .history
            .back_mut()
            .ok_or_else(|| GameError::NotStarted.to_string())?;
        game.rotate_free_tile(rotation).map_err(|e| e.to_string())?;
        Ok(game.clone())
    }

    fn shift_tiles(&mut self, side_index: SideIndex) -> Result<GameState, String> {
        self.do_action(|game| game.shift_tiles(side_index))
    }

    fn move_player(&mut self, id: PlayerId, position: Position) -> Result<GameState, String> {
        self.do_action(|game| game.move_player(id, position))
    }

    fn remove_player(&mut self, id: PlayerId) -> Result<GameState, String> {
        self.do_action(|game| game.remove_player(id))
    }

    fn undo_move(&mut self) -> Result<GameState, String> {
        match self.history.len() {
            0 => Err(GameError::NotStarted.to_string()),
            1 => Err(GameError::NothingToUndo.to_string()),
            _ => {
                self.history.pop_back();
                self.last().cloned().map_err(|e| e.to_string())
            }
        }
    }

    fn set_game(&mut self, state: GameState) {
        self.history.clear();
        self.history.push_back(state);
    }

    fn currently_reachable(&self) -> Result<Vec<Position>, String> {
        let game = self.last().map_err(|e| e.to_string())?;
        game.currently_reachable()
            .ok_or_else(|| GameError::from(MovePlayerError::GameOver).to_string())
    }

    fn last_path(&self) -> Result<Vec<Position>, String> {
        let game = self.last().map_err(|e| e.to_string())?;
        Ok(game.last_move.as_ref().map(|m| m.path.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::GamePhase;
    use crate::game::tile::Side;

    fn started(history_size: usize) -> GameCore {
        let mut core = GameCore::new(history_size);
        core.start_game(GameStartSettings::with_players([0, 1])).unwrap();
        core
    }

    fn position_of(core: &GameCore, id: PlayerId) -> Position {
        core.current().unwrap().players[&id].position
    }

    #[test]
    fn test_actions_before_start() {
        let mut core = GameCore::default();
        let err = core.shift_tiles(SideIndex::new(Side::Top, 0)).unwrap_err();
        assert_eq!(err, "Cannot complete action: Game not started");
        assert!(core.rotate_free_tile(Rotation::Ninety).is_err());
        assert!(core.currently_reachable().is_err());
        assert!(core.last_path().is_err());
        assert!(core.undo_move().is_err());
    }

    #[test]
    fn test_start_game_rejection_message() {
        let mut core = GameCore::default();
        let err = core.start_game(GameStartSettings::default()).unwrap_err();
        assert_eq!(err, "Cannot start game: Not enough players");
        assert!(core.current().is_none());
    }

    #[test]
    fn test_failed_action_leaves_state() {
        let mut core = started(10);
        let before = core.current().cloned();

        let err = core.shift_tiles(SideIndex::new(Side::Top, 1)).unwrap_err();
        assert_eq!(err, "Cannot shift tiles: Specified row/column is not movable");
        assert_eq!(core.current().cloned(), before);
        assert_eq!(core.history_len(), 1);
    }

    #[test]
    fn test_shift_then_undo() {
        let mut core = started(10);
        let initial = core.current().cloned().unwrap();

        let shifted = core.shift_tiles(SideIndex::new(Side::Top, 0)).unwrap();
        assert_eq!(shifted.phase, GamePhase::MovePlayer);
        assert_eq!(core.history_len(), 2);

        assert_eq!(core.undo_move().unwrap(), initial);
        assert_eq!(
            core.undo_move().unwrap_err(),
            "Cannot undo move: Last state in history"
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let mut core = started(2);
        core.shift_tiles(SideIndex::new(Side::Top, 0)).unwrap();
        let here = position_of(&core, 0);
        core.move_player(0, here).unwrap();

        assert_eq!(core.history_len(), 2);
        assert!(core.undo_move().is_ok());
        assert!(core.undo_move().is_err());
    }

    #[test]
    fn test_rotate_does_not_add_history() {
        let mut core = started(10);
        let rotated = core.rotate_free_tile(Rotation::Ninety).unwrap();
        assert_eq!(core.history_len(), 1);
        assert_eq!(core.current(), Some(&rotated));
    }

    #[test]
    fn test_set_game_clears_history() {
        let mut core = started(10);
        let state = core.shift_tiles(SideIndex::new(Side::Top, 0)).unwrap();
        core.set_game(state.clone());
        assert_eq!(core.history_len(), 1);
        assert_eq!(core.current(), Some(&state));
    }

    #[test]
    fn test_last_path_after_move() {
        let mut core = started(10);
        assert_eq!(core.last_path().unwrap(), Vec::<Position>::new());

        core.shift_tiles(SideIndex::new(Side::Top, 0)).unwrap();
        let reachable = core.currently_reachable().unwrap();
        let target = *reachable.last().unwrap();
        let state = core.move_player(0, target).unwrap();

        assert_eq!(state.players[&0].position, target);
        let path = core.last_path().unwrap();
        assert_eq!(path.last().copied().unwrap_or(target), target);
        assert_eq!(path.is_empty(), reachable.len() == 1);
    }

    #[test]
    fn test_reachable_after_game_end() {
        let mut core = started(10);
        core.remove_player(0).unwrap();
        core.remove_player(1).unwrap();
        assert_eq!(
            core.currently_reachable().unwrap_err(),
            "Cannot move player: Game has ended"
        );
    }
}
