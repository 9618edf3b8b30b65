//! Game State Definitions
//!
//! The complete labyrinth game state and its deterministic transitions.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::core::rng::DeterministicRng;
use crate::game::board::{Board, BoardShapeError, NewBoardError, ShiftTileError};
use crate::game::player::{Player, PlayerId, Position, MAX_PLAYERS};
use crate::game::tile::{Item, Rotation, SideIndex};

/// Default number of distinct items on the board.
pub const DEFAULT_NUMBER_OF_ITEMS: u8 = 30;

/// Default number of items each player has to collect.
pub const DEFAULT_ITEMS_PER_PLAYER: u8 = 6;

/// Default board side length.
pub const DEFAULT_SIDE_LENGTH: usize = 7;

// =============================================================================
// ERRORS
// =============================================================================

/// Game creation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum NewGameError {
    /// No players given
    #[error("Not enough players")]
    NotEnoughPlayers,
    /// More players than seats
    #[error("Too many players")]
    TooManyPlayers,
    /// Board could not be built
    #[error(transparent)]
    Board(#[from] NewBoardError),
}

/// Move rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MovePlayerError {
    /// The game is over
    #[error("Game has ended")]
    GameOver,
    /// Tiles have not been shifted yet this turn
    #[error("Player has to shift tiles first")]
    WrongPhase,
    /// Unknown player id
    #[error("No such player exists")]
    InvalidPlayer,
    /// Someone else holds the turn
    #[error("It is not this player's turn")]
    NotPlayersTurn,
    /// Target outside the grid
    #[error("Position is not on the board")]
    InvalidPosition,
    /// No open path to the target
    #[error("Position is not reachable by player")]
    UnreachablePosition,
}

/// Removal rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RemovePlayerError {
    /// The game is over
    #[error("Game has ended")]
    GameOver,
    /// Unknown player id
    #[error("No such player exists")]
    InvalidPlayer,
}

/// Decoded state whose parts contradict each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum InvalidStateError {
    /// Board grid is inconsistent
    #[error("Invalid board: {0}")]
    Board(#[from] BoardShapeError),
    /// More players than seats
    #[error("Too many players")]
    TooManyPlayers,
    /// Player stored under a different id
    #[error("Player {0} is stored under another id")]
    MismatchedId(PlayerId),
    /// Position or seat outside the grid
    #[error("Player {0} is off the board")]
    PlayerOffBoard(PlayerId),
    /// Turn held by someone not playing
    #[error("Turn holder {0} is not playing")]
    UnknownTurnHolder(PlayerId),
    /// Last move walks outside the grid
    #[error("Last move leaves the board")]
    PathOffBoard,
}

/// Any engine rejection. `Display` gives the user-facing message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GameError {
    /// No game in progress
    #[error("Cannot complete action: Game not started")]
    NotStarted,
    /// Start settings rejected
    #[error("Cannot start game: {0}")]
    Start(#[from] NewGameError),
    /// Rotation after the game ended
    #[error("Cannot rotate tile: Game has ended")]
    RotateAfterEnd,
    /// Shift rejected
    #[error("Cannot shift tiles: {0}")]
    Shift(#[from] ShiftTileError),
    /// Move rejected
    #[error("Cannot move player: {0}")]
    Move(#[from] MovePlayerError),
    /// Removal rejected
    #[error("Cannot remove player: {0}")]
    Remove(#[from] RemovePlayerError),
    /// Only one state left in history
    #[error("Cannot undo move: Last state in history")]
    NothingToUndo,
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Parameters for a new game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStartSettings {
    /// Distinct items placed on the board
    pub number_of_items: u8,
    /// Items dealt to each player
    pub items_per_player: u8,
    /// Tiles per board side (odd, at least 3)
    pub side_length: usize,
    /// Participating players
    pub players: Vec<PlayerId>,
    /// Board seed
    #[serde(default)]
    pub seed: u64,
}

impl Default for GameStartSettings {
    fn default() -> Self {
        Self {
            number_of_items: DEFAULT_NUMBER_OF_ITEMS,
            items_per_player: DEFAULT_ITEMS_PER_PLAYER,
            side_length: DEFAULT_SIDE_LENGTH,
            players: Vec::new(),
            seed: 0,
        }
    }
}

impl GameStartSettings {
    /// Default settings for the given players.
    pub fn with_players(players: impl IntoIterator<Item = PlayerId>) -> Self {
        Self {
            players: players.into_iter().collect(),
            ..Self::default()
        }
    }
}

// =============================================================================
// GAME STATE
// =============================================================================

/// Turn phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GamePhase {
    /// Turn holder must shift a row or column
    MoveTiles = 0,
    /// Turn holder must move their figure
    MovePlayer = 1,
    /// Game over
    GameEnd = 2,
}

/// The most recent figure move.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMove {
    /// Who moved
    pub player: PlayerId,
    /// Cells walked, excluding the start cell
    pub path: Vec<Position>,
}

/// Complete game state.
///
/// Snapshots of this type are what the host broadcasts; clients replace
/// their mirror with it wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Bumped on every accepted transition
    pub version: u64,
    /// Tiles and free tile
    pub board: Board,
    /// Players by id, sent as `[[id, player], ...]`
    #[serde(with = "player_pairs")]
    pub players: BTreeMap<PlayerId, Player>,
    /// Current turn holder
    pub player_turn: PlayerId,
    /// Current phase
    pub phase: GamePhase,
    /// Set once somebody returns home with everything collected
    pub winner: Option<PlayerId>,
    /// Latest figure move, cleared by shifts
    pub last_move: Option<PlayerMove>,
}

impl GameState {
    /// Create a new game from start settings.
    pub fn new(settings: &GameStartSettings) -> Result<Self, NewGameError> {
        let ids: BTreeSet<PlayerId> = settings.players.iter().copied().collect();
        if ids.is_empty() {
            return Err(NewGameError::NotEnoughPlayers);
        }
        if ids.len() > MAX_PLAYERS {
            return Err(NewGameError::TooManyPlayers);
        }
        let ids: Vec<PlayerId> = ids.into_iter().collect();

        let mut rng = DeterministicRng::for_board(settings.seed, settings.side_length, &ids);
        let board = Board::generate(settings.side_length, settings.number_of_items, &mut rng)?;

        let mut items = board.items();
        rng.shuffle(&mut items);
        let per_player = (settings.items_per_player as usize).min(items.len() / ids.len());

        let players: BTreeMap<PlayerId, Player> = ids
            .iter()
            .zip(board.seats())
            .enumerate()
            .map(|(seat, (&id, corner))| {
                let to_collect: Vec<Item> = items
                    .iter()
                    .skip(seat * per_player)
                    .take(per_player)
                    .copied()
                    .collect();
                (id, Player::new(id, corner, to_collect))
            })
            .collect();

        Ok(Self {
            version: 0,
            board,
            players,
            player_turn: ids[0],
            phase: GamePhase::MoveTiles,
            winner: None,
            last_move: None,
        })
    }

    /// Check a decoded state before anything indexes into it.
    pub fn validate(&self) -> Result<(), InvalidStateError> {
        self.board.validate()?;
        if self.players.len() > MAX_PLAYERS {
            return Err(InvalidStateError::TooManyPlayers);
        }
        for (&id, player) in &self.players {
            if player.id != id {
                return Err(InvalidStateError::MismatchedId(id));
            }
            if !self.board.contains(player.position) || !self.board.contains(player.start_position) {
                return Err(InvalidStateError::PlayerOffBoard(id));
            }
        }
        if !self.is_over() && !self.players.contains_key(&self.player_turn) {
            return Err(InvalidStateError::UnknownTurnHolder(self.player_turn));
        }
        if let Some(last_move) = &self.last_move {
            if !last_move.path.iter().all(|&pos| self.board.contains(pos)) {
                return Err(InvalidStateError::PathOffBoard);
            }
        }
        Ok(())
    }

    /// Whether the game is over.
    #[inline]
    pub fn is_over(&self) -> bool {
        self.phase == GamePhase::GameEnd
    }

    /// Player holding the turn.
    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(&self.player_turn)
    }

    /// Rotate the free tile clockwise by `rotation`.
    pub fn rotate_free_tile(&mut self, rotation: Rotation) -> Result<(), GameError> {
        if self.is_over() {
            return Err(GameError::RotateAfterEnd);
        }
        let tile = &mut self.board.free_tile.tile;
        tile.rotation = tile.rotation + rotation;
        self.version += 1;
        Ok(())
    }

    /// Push the free tile in at `side_index`, carrying figures along.
    pub fn shift_tiles(&mut self, side_index: SideIndex) -> Result<(), ShiftTileError> {
        match self.phase {
            GamePhase::GameEnd => return Err(ShiftTileError::GameOver),
            GamePhase::MovePlayer => return Err(ShiftTileError::WrongPhase),
            GamePhase::MoveTiles => {}
        }

        self.board.shift(side_index)?;
        for player in self.players.values_mut() {
            player.position = self.board.shifted_position(side_index, player.position);
        }

        self.phase = GamePhase::MovePlayer;
        self.last_move = None;
        self.version += 1;
        Ok(())
    }

    /// Move the turn holder's figure to `position`.
    ///
    /// Collects the target item when the figure lands on it. A player with
    /// nothing left to collect wins by reaching their start corner;
    /// otherwise the turn passes on.
    pub fn move_player(&mut self, id: PlayerId, position: Position) -> Result<(), MovePlayerError> {
        match self.phase {
            GamePhase::GameEnd => return Err(MovePlayerError::GameOver),
            GamePhase::MoveTiles => return Err(MovePlayerError::WrongPhase),
            GamePhase::MovePlayer => {}
        }
        let from = self
            .players
            .get(&id)
            .map(|p| p.position)
            .ok_or(MovePlayerError::InvalidPlayer)?;
        if id != self.player_turn {
            return Err(MovePlayerError::NotPlayersTurn);
        }
        if !self.board.contains(position) {
            return Err(MovePlayerError::InvalidPosition);
        }
        let path = self
            .board
            .path(from, position)
            .ok_or(MovePlayerError::UnreachablePosition)?;

        let tile_item = self.board.tile(position).and_then(|t| t.item);
        let player = self
            .players
            .get_mut(&id)
            .ok_or(MovePlayerError::InvalidPlayer)?;
        player.position = position;

        let collected = tile_item.is_some_and(|item| player.try_collect(item));
        let won = player.has_collected_all() && position == player.start_position;

        if collected {
            if let Some(tile) = self.board.tile_mut(position) {
                tile.item = None;
            }
        }

        if won {
            self.winner = Some(id);
            self.phase = GamePhase::GameEnd;
        } else {
            self.player_turn = self.next_player_after(id).unwrap_or(id);
            self.phase = GamePhase::MoveTiles;
        }

        self.last_move = Some(PlayerMove { player: id, path });
        self.version += 1;
        Ok(())
    }

    /// Remove a player from the game.
    ///
    /// The turn passes on if it was theirs; removing the last player ends
    /// the game without a winner.
    pub fn remove_player(&mut self, id: PlayerId) -> Result<(), RemovePlayerError> {
        if self.is_over() {
            return Err(RemovePlayerError::GameOver);
        }
        if self.players.remove(&id).is_none() {
            return Err(RemovePlayerError::InvalidPlayer);
        }

        if self.players.is_empty() {
            self.phase = GamePhase::GameEnd;
        } else if self.player_turn == id {
            if let Some(next) = self.next_player_after(id) {
                self.player_turn = next;
            }
            self.phase = GamePhase::MoveTiles;
        }
        self.version += 1;
        Ok(())
    }

    /// Cells the turn holder can walk to right now.
    pub fn currently_reachable(&self) -> Option<Vec<Position>> {
        if self.is_over() {
            return None;
        }
        let player = self.current_player()?;
        Some(self.board.reachable(player.position))
    }

    /// Next player id after `id` in ascending order, wrapping around.
    fn next_player_after(&self, id: PlayerId) -> Option<PlayerId> {
        self.players
            .range(id.saturating_add(1)..)
            .next()
            .filter(|_| id < PlayerId::MAX)
            .or_else(|| self.players.iter().next())
            .map(|(&next, _)| next)
    }

    /// Compute a deterministic hash of the full state.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_game_state();

        hasher.update_u64(self.version);
        hasher.update_usize(self.board.side_length);
        for tile in self.board.tiles.iter().chain(std::iter::once(&self.board.free_tile.tile)) {
            hasher.update_u32(tile.id);
            hasher.update_u8(tile.variant as u8);
            hasher.update_u8(tile.rotation.quarter_turns());
            hasher.update_option_u8(tile.item.map(Item::get));
        }
        match self.board.free_tile.side_with_index {
            Some(si) => {
                hasher.update_bool(true);
                hasher.update_u8(si.side as u8);
                hasher.update_usize(si.index);
            }
            None => hasher.update_bool(false),
        }

        // BTreeMap iteration is sorted by id
        hasher.update_usize(self.players.len());
        for (id, player) in &self.players {
            hasher.update_u8(*id);
            hasher.update_usize(player.position.x);
            hasher.update_usize(player.position.y);
            hasher.update_usize(player.start_position.x);
            hasher.update_usize(player.start_position.y);
            hasher.update_usize(player.collected.len());
            for item in &player.collected {
                hasher.update_u8(item.get());
            }
            hasher.update_usize(player.to_collect.len());
            for item in &player.to_collect {
                hasher.update_u8(item.get());
            }
        }

        hasher.update_u8(self.player_turn);
        hasher.update_u8(self.phase as u8);
        hasher.update_option_u8(self.winner);
        match &self.last_move {
            Some(m) => {
                hasher.update_bool(true);
                hasher.update_u8(m.player);
                hasher.update_usize(m.path.len());
                for pos in &m.path {
                    hasher.update_usize(pos.x);
                    hasher.update_usize(pos.y);
                }
            }
            None => hasher.update_bool(false),
        }

        hasher.finalize()
    }
}

/// Player map wire schema: an ordered list of `[id, player]` pairs.
///
/// Keys must be unique; a repeated id fails to decode.
mod player_pairs {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::game::player::{Player, PlayerId};

    pub fn serialize<S: Serializer>(
        players: &BTreeMap<PlayerId, Player>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(players.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PlayerId, Player>, D::Error> {
        let pairs = Vec::<(PlayerId, Player)>::deserialize(deserializer)?;
        let mut players = BTreeMap::new();
        for (id, player) in pairs {
            if players.insert(id, player).is_some() {
                return Err(D::Error::custom(format!("duplicate player id {id}")));
            }
        }
        Ok(players)
    }
}
