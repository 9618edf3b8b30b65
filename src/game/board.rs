//! Board Layout
//!
//! Square grid of tiles plus one free tile. Tiles where both coordinates are
//! odd are fixed; every row and column at an even index can be shifted by
//! pushing the free tile in from one of its ends.

use std::collections::VecDeque;
use std::mem;

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;
use crate::game::player::Position;
use crate::game::tile::{FreeTile, Item, Rotation, Side, SideIndex, Tile, TileVariant};

/// Smallest playable board.
pub const MIN_SIDE_LENGTH: usize = 3;

/// Board construction failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum NewBoardError {
    /// Fewer than [`MIN_SIDE_LENGTH`] tiles per side
    #[error("Side length too small")]
    TooSmall,
    /// Even side length leaves no fixed tile pattern
    #[error("Invalid side length")]
    EvenLength,
}

/// Shift rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ShiftTileError {
    /// The game is over
    #[error("Game has ended")]
    GameOver,
    /// Tiles were already shifted this turn
    #[error("Player has to end turn by moving figure")]
    WrongPhase,
    /// Index past the board edge
    #[error("No such row/column exists")]
    OutOfBounds,
    /// Row or column contains fixed tiles
    #[error("Specified row/column is not movable")]
    UnMovable,
    /// Would push the free tile back where it just fell out
    #[error("Tile cannot be pushed back in where it was previously pushed out")]
    UndoMove,
    /// Tile grid does not match the side length
    #[error("Board layout is inconsistent")]
    InvalidBoard,
}

/// Decoded board whose parts contradict each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum BoardShapeError {
    /// Side length is unusable
    #[error(transparent)]
    SideLength(#[from] NewBoardError),
    /// Grid does not hold `side_length²` tiles
    #[error("Expected {expected} tiles, found {found}")]
    TileCount {
        /// `side_length²`
        expected: usize,
        /// Tiles present
        found: usize,
    },
}

/// Tile grid stored row-major.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// `side_length * side_length` tiles, row-major
    pub tiles: Vec<Tile>,
    /// Tiles per row and column
    pub side_length: usize,
    /// Tile outside the grid
    pub free_tile: FreeTile,
}

impl Board {
    /// Lay out a new board from a seeded RNG.
    ///
    /// Corners get inward-facing L tiles, fixed cells get T tiles, and items
    /// `1..=number_of_items` are scattered over the non-corner cells (as many
    /// as fit).
    pub fn generate(
        side_length: usize,
        number_of_items: u8,
        rng: &mut DeterministicRng,
    ) -> Result<Self, NewBoardError> {
        check_side_length(side_length)?;

        let n = side_length;
        let mut tiles = Vec::with_capacity(n * n);
        for y in 0..n {
            for x in 0..n {
                let (variant, rotation) = match corner_rotation(n, x, y) {
                    Some(rotation) => (TileVariant::LShape, rotation),
                    None if is_fixed(x, y) => (TileVariant::TShape, random_rotation(rng)),
                    None => (random_variant(rng), random_rotation(rng)),
                };
                tiles.push(Tile {
                    id: (y * n + x) as u32,
                    variant,
                    rotation,
                    item: None,
                });
            }
        }

        let mut slots: Vec<usize> = (0..n * n)
            .filter(|&i| corner_rotation(n, i % n, i / n).is_none())
            .collect();
        rng.shuffle(&mut slots);
        for (&slot, number) in slots.iter().zip(1..=number_of_items) {
            tiles[slot].item = Item::new(number);
        }

        let free_tile = FreeTile {
            tile: Tile {
                id: (n * n) as u32,
                variant: random_variant(rng),
                rotation: random_rotation(rng),
                item: None,
            },
            side_with_index: None,
        };

        Ok(Self { tiles, side_length, free_tile })
    }

    /// Check that the grid matches the side length.
    ///
    /// Every index computed from an on-board position is in range once this
    /// passes.
    pub fn validate(&self) -> Result<(), BoardShapeError> {
        check_side_length(self.side_length)?;
        let expected = self.side_length.checked_mul(self.side_length).unwrap_or(usize::MAX);
        if self.tiles.len() != expected {
            return Err(BoardShapeError::TileCount {
                expected,
                found: self.tiles.len(),
            });
        }
        Ok(())
    }

    /// The four corners, clockwise from the top-left.
    pub fn corners(&self) -> [Position; 4] {
        let last = self.side_length - 1;
        [
            Position::new(0, 0),
            Position::new(last, 0),
            Position::new(last, last),
            Position::new(0, last),
        ]
    }

    /// Starting cells: the corners clockwise from the top-left, then the
    /// middle of each edge clockwise from the top.
    pub fn seats(&self) -> [Position; 8] {
        let [top_left, top_right, bottom_right, bottom_left] = self.corners();
        let last = self.side_length - 1;
        let mid = last / 2;
        [
            top_left,
            top_right,
            bottom_right,
            bottom_left,
            Position::new(mid, 0),
            Position::new(last, mid),
            Position::new(mid, last),
            Position::new(0, mid),
        ]
    }

    /// Whether `pos` lies on the board.
    #[inline]
    pub fn contains(&self, pos: Position) -> bool {
        pos.x < self.side_length && pos.y < self.side_length
    }

    /// Tile at `pos`.
    pub fn tile(&self, pos: Position) -> Option<&Tile> {
        if self.contains(pos) {
            self.tiles.get(pos.y * self.side_length + pos.x)
        } else {
            None
        }
    }

    /// Mutable tile at `pos`.
    pub fn tile_mut(&mut self, pos: Position) -> Option<&mut Tile> {
        if self.contains(pos) {
            let n = self.side_length;
            self.tiles.get_mut(pos.y * n + pos.x)
        } else {
            None
        }
    }

    /// Every item still lying on the board, ascending.
    pub fn items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.tiles.iter().filter_map(|t| t.item).collect();
        items.sort();
        items
    }

    /// Push the free tile in at `side_index`.
    ///
    /// The tile falling out at the far end becomes the new free tile.
    pub fn shift(&mut self, side_index: SideIndex) -> Result<(), ShiftTileError> {
        if side_index.index >= self.side_length {
            return Err(ShiftTileError::OutOfBounds);
        }
        if side_index.index % 2 != 0 {
            return Err(ShiftTileError::UnMovable);
        }
        if self.free_tile.side_with_index == Some(side_index) {
            return Err(ShiftTileError::UndoMove);
        }
        if self.validate().is_err() {
            return Err(ShiftTileError::InvalidBoard);
        }

        let n = self.side_length;
        let mut carried = self.free_tile.tile.clone();
        for pos in self.line(side_index) {
            let slot = self
                .tiles
                .get_mut(pos.y * n + pos.x)
                .ok_or(ShiftTileError::InvalidBoard)?;
            carried = mem::replace(slot, carried);
        }

        self.free_tile = FreeTile {
            tile: carried,
            side_with_index: Some(SideIndex::new(side_index.side.opposite(), side_index.index)),
        };
        Ok(())
    }

    /// Where a figure standing on `pos` ends up after `side_index` is shifted.
    ///
    /// Figures pushed off the far end wrap onto the inserted tile.
    pub fn shifted_position(&self, side_index: SideIndex, pos: Position) -> Position {
        let line = self.line(side_index);
        match line.iter().position(|&p| p == pos) {
            Some(k) => line[(k + 1) % line.len()],
            None => pos,
        }
    }

    /// Cells of a row or column, ordered from the pushing side inward.
    fn line(&self, side_index: SideIndex) -> Vec<Position> {
        let n = self.side_length;
        let i = side_index.index;
        match side_index.side {
            Side::Top => (0..n).map(|y| Position::new(i, y)).collect(),
            Side::Bottom => (0..n).rev().map(|y| Position::new(i, y)).collect(),
            Side::Left => (0..n).map(|x| Position::new(x, i)).collect(),
            Side::Right => (0..n).rev().map(|x| Position::new(x, i)).collect(),
        }
    }

    fn neighbor(&self, pos: Position, side: Side) -> Option<Position> {
        let next = match side {
            Side::Top => Position::new(pos.x, pos.y.checked_sub(1)?),
            Side::Right => Position::new(pos.x + 1, pos.y),
            Side::Bottom => Position::new(pos.x, pos.y + 1),
            Side::Left => Position::new(pos.x.checked_sub(1)?, pos.y),
        };
        self.contains(next).then_some(next)
    }

    /// Neighbours connected to `pos` through matching openings.
    fn open_neighbors(&self, pos: Position) -> Vec<Position> {
        let Some(tile) = self.tile(pos) else {
            return Vec::new();
        };
        Side::ALL
            .into_iter()
            .filter(|&side| tile.is_open(side))
            .filter_map(|side| {
                let next = self.neighbor(pos, side)?;
                let other = self.tile(next)?;
                other.is_open(side.opposite()).then_some(next)
            })
            .collect()
    }

    /// All cells reachable from `from`, including `from`, in BFS order.
    pub fn reachable(&self, from: Position) -> Vec<Position> {
        if !self.contains(from) || self.validate().is_err() {
            return Vec::new();
        }
        let n = self.side_length;
        let mut visited = vec![false; n * n];
        let mut order = Vec::new();
        let mut queue = VecDeque::from([from]);
        visited[from.y * n + from.x] = true;

        while let Some(pos) = queue.pop_front() {
            order.push(pos);
            for next in self.open_neighbors(pos) {
                let idx = next.y * n + next.x;
                if !visited[idx] {
                    visited[idx] = true;
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Shortest path from `from` to `to`, excluding `from`.
    ///
    /// `None` when `to` is unreachable; empty when `from == to`.
    pub fn path(&self, from: Position, to: Position) -> Option<Vec<Position>> {
        if !self.contains(from) || !self.contains(to) || self.validate().is_err() {
            return None;
        }
        let n = self.side_length;
        let mut previous: Vec<Option<Position>> = vec![None; n * n];
        let mut visited = vec![false; n * n];
        let mut queue = VecDeque::from([from]);
        visited[from.y * n + from.x] = true;

        while let Some(pos) = queue.pop_front() {
            if pos == to {
                let mut path = Vec::new();
                let mut current = pos;
                while current != from {
                    path.push(current);
                    current = previous[current.y * n + current.x]?;
                }
                path.reverse();
                return Some(path);
            }
            for next in self.open_neighbors(pos) {
                let idx = next.y * n + next.x;
                if !visited[idx] {
                    visited[idx] = true;
                    previous[idx] = Some(pos);
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

fn check_side_length(side_length: usize) -> Result<(), NewBoardError> {
    if side_length < MIN_SIDE_LENGTH {
        return Err(NewBoardError::TooSmall);
    }
    if side_length % 2 == 0 {
        return Err(NewBoardError::EvenLength);
    }
    Ok(())
}

/// Fixed cells never move.
#[inline]
pub fn is_fixed(x: usize, y: usize) -> bool {
    x % 2 == 1 && y % 2 == 1
}

fn corner_rotation(n: usize, x: usize, y: usize) -> Option<Rotation> {
    let last = n - 1;
    match (x, y) {
        (0, 0) => Some(Rotation::Ninety),
        (x, 0) if x == last => Some(Rotation::OneEighty),
        (x, y) if x == last && y == last => Some(Rotation::TwoSeventy),
        (0, y) if y == last => Some(Rotation::Zero),
        _ => None,
    }
}

fn random_rotation(rng: &mut DeterministicRng) -> Rotation {
    Rotation::from_quarter_turns(rng.next_int(4) as u8)
}

fn random_variant(rng: &mut DeterministicRng) -> TileVariant {
    match rng.next_int(3) {
        0 => TileVariant::LShape,
        1 => TileVariant::TShape,
        _ => TileVariant::IShape,
    }
}
