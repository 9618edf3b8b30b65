//! Players and board positions.

use serde::{Serialize, Deserialize};

use crate::game::tile::Item;

/// Player identifier, unique per session.
///
/// Clients announce their id when they connect; the host keys every
/// connection and every turn check on it.
pub type PlayerId = u8;

/// Maximum number of players (four corners and four edge midpoints).
pub const MAX_PLAYERS: usize = 8;

/// Cell on the board, `x` is the column and `y` the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Column
    pub x: usize,
    /// Row
    pub y: usize,
}

impl Position {
    /// Create a new position.
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// A player's figure and item queues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Player identifier
    pub id: PlayerId,
    /// Current cell
    pub position: Position,
    /// Seat the player must return to after collecting everything
    pub start_position: Position,
    /// Items already collected, in order
    pub collected: Vec<Item>,
    /// Items still to collect; the current target is the last one
    pub to_collect: Vec<Item>,
}

impl Player {
    /// Create a player standing on its start corner.
    pub fn new(id: PlayerId, start_position: Position, to_collect: Vec<Item>) -> Self {
        Self {
            id,
            position: start_position,
            start_position,
            collected: Vec::new(),
            to_collect,
        }
    }

    /// Item the player is currently looking for.
    pub fn current_item(&self) -> Option<Item> {
        self.to_collect.last().copied()
    }

    /// Whether all items have been collected.
    pub fn has_collected_all(&self) -> bool {
        self.to_collect.is_empty()
    }

    /// Collect the current target if it is `item`.
    pub fn try_collect(&mut self, item: Item) -> bool {
        if self.current_item() == Some(item) {
            self.to_collect.pop();
            self.collected.push(item);
            true
        } else {
            false
        }
    }
}
