//! Tiles, rotations and board sides.

use std::num::NonZeroU8;
use std::ops::Add;

use serde::{Serialize, Deserialize};

// =============================================================================
// SIDE
// =============================================================================

/// The side of the board a row or column is pushed from.
///
/// Row/column indices always run left to right or top to bottom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    /// Row `y = 0`
    Top = 0,
    /// Column `x = side_length - 1`
    Right = 1,
    /// Row `y = side_length - 1`
    Bottom = 2,
    /// Column `x = 0`
    Left = 3,
}

impl Side {
    /// All sides, clockwise from the top.
    pub const ALL: [Side; 4] = [Side::Top, Side::Right, Side::Bottom, Side::Left];

    /// The side across the board.
    pub fn opposite(self) -> Side {
        match self {
            Side::Top => Side::Bottom,
            Side::Right => Side::Left,
            Side::Bottom => Side::Top,
            Side::Left => Side::Right,
        }
    }

    /// Opening bit for this side.
    #[inline]
    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A row or column addressed from one side of the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SideIndex {
    /// Side the free tile is pushed in from
    pub side: Side,
    /// Row or column index
    pub index: usize,
}

impl SideIndex {
    /// Create a new side index.
    pub const fn new(side: Side, index: usize) -> Self {
        Self { side, index }
    }
}

// =============================================================================
// ROTATION
// =============================================================================

/// Clockwise tile rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub enum Rotation {
    /// No rotation
    #[default]
    Zero,
    /// Quarter turn
    Ninety,
    /// Half turn
    OneEighty,
    /// Three quarter turns
    TwoSeventy,
}

impl Rotation {
    /// Number of clockwise quarter turns.
    #[inline]
    pub fn quarter_turns(self) -> u8 {
        match self {
            Rotation::Zero => 0,
            Rotation::Ninety => 1,
            Rotation::OneEighty => 2,
            Rotation::TwoSeventy => 3,
        }
    }

    /// Rotation from a quarter-turn count (taken modulo 4).
    pub fn from_quarter_turns(turns: u8) -> Rotation {
        match turns % 4 {
            0 => Rotation::Zero,
            1 => Rotation::Ninety,
            2 => Rotation::OneEighty,
            _ => Rotation::TwoSeventy,
        }
    }
}

impl Add for Rotation {
    type Output = Rotation;

    fn add(self, rhs: Rotation) -> Rotation {
        Rotation::from_quarter_turns(self.quarter_turns() + rhs.quarter_turns())
    }
}

// =============================================================================
// TILE
// =============================================================================

/// Tile shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TileVariant {
    /// Corner: open top and right at zero rotation
    LShape = 0,
    /// Junction: open right, bottom and left at zero rotation
    TShape = 1,
    /// Straight: open top and bottom at zero rotation
    IShape = 2,
}

impl TileVariant {
    /// Opening mask at zero rotation.
    fn base_openings(self) -> u8 {
        match self {
            TileVariant::LShape => Side::Top.bit() | Side::Right.bit(),
            TileVariant::TShape => Side::Right.bit() | Side::Bottom.bit() | Side::Left.bit(),
            TileVariant::IShape => Side::Top.bit() | Side::Bottom.bit(),
        }
    }
}

/// Collectible item. Zero is reserved for "no item".
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(pub NonZeroU8);

impl Item {
    /// Create an item, `None` for zero.
    pub fn new(value: u8) -> Option<Item> {
        NonZeroU8::new(value).map(Item)
    }

    /// Raw item number.
    #[inline]
    pub fn get(self) -> u8 {
        self.0.get()
    }
}

/// A single board tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Stable identifier, follows the tile when it is shifted
    pub id: u32,
    /// Shape
    pub variant: TileVariant,
    /// Clockwise rotation
    pub rotation: Rotation,
    /// Item printed on the tile
    pub item: Option<Item>,
}

impl Tile {
    /// Opening mask after rotation (bit per [`Side`]).
    pub fn openings(&self) -> u8 {
        let base = self.variant.base_openings();
        let turns = self.rotation.quarter_turns();
        ((base << turns) | (base >> (4 - turns))) & 0x0F
    }

    /// Whether the tile has an opening toward `side`.
    #[inline]
    pub fn is_open(&self, side: Side) -> bool {
        self.openings() & side.bit() != 0
    }
}

/// The tile outside the board waiting to be pushed in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTile {
    /// The tile itself
    pub tile: Tile,
    /// Where the tile was pushed out, `None` before the first shift
    pub side_with_index: Option<SideIndex>,
}
