//! Game Logic Module
//!
//! The labyrinth rules the sync layer drives. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `tile`: Tiles, rotations, board sides
//! - `player`: Player ids, positions, item queues
//! - `board`: Board generation, shifting, path finding
//! - `state`: Game state and its transitions
//! - `engine`: The engine contract and the history-keeping `GameCore`

pub mod tile;
pub mod player;
pub mod board;
pub mod state;
pub mod engine;

// Re-export key types
pub use tile::{Item, Rotation, Side, SideIndex, Tile, TileVariant, FreeTile};
pub use player::{Player, PlayerId, Position};
pub use board::{Board, BoardShapeError, ShiftTileError};
pub use state::{
    GameError, GamePhase, GameStartSettings, GameState, InvalidStateError, MovePlayerError,
    NewGameError, PlayerMove,
};
pub use engine::{GameCore, GameEngine};
