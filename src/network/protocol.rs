//! Network Protocol
//!
//! JSON message types exchanged between host and clients.
//!
//! ## Message Flow
//!
//! ```text
//! Client                                Host
//!   |                                     |
//!   |-- requestGame --------------------->|
//!   |<-------------------- Ok(GameState) -|
//!   |                                     |
//!   |-- shiftTiles {side_index} --------->|  (turn holder only)
//!   |<-------------------- Ok(GameState) -|  (to every client)
//!   |                                     |
//!   |-- movePlayer {x, y} --------------->|
//!   |<-------------------- Ok(GameState) -|
//! ```

use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;

use crate::game::state::GameState;
use crate::game::tile::SideIndex;

// =============================================================================
// ERRORS
// =============================================================================

/// Wire payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not valid JSON or not the expected shape.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Well-formed RPC with a name nobody handles.
    #[error("Unknown RPC: {0}")]
    UnknownRpc(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

// =============================================================================
// CLIENT -> HOST
// =============================================================================

/// RPC sent by a client.
///
/// Carries no player id: the host takes it from the connection the message
/// arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum Action {
    /// Rotate the free tile a quarter turn clockwise.
    RotateFreeTile,

    /// Push the free tile in.
    ShiftTiles {
        /// Row or column to push
        side_index: SideIndex,
    },

    /// Move the sender's figure.
    MovePlayer {
        /// Target column
        x: usize,
        /// Target row
        y: usize,
    },

    /// Ask for the current snapshot. Never changes state.
    RequestGame,
}

impl Action {
    /// Wire names of all known RPCs.
    pub const NAMES: [&'static str; 4] = ["rotateFreeTile", "shiftTiles", "movePlayer", "requestGame"];

    /// Wire name of this action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::RotateFreeTile => Self::NAMES[0],
            Action::ShiftTiles { .. } => Self::NAMES[1],
            Action::MovePlayer { .. } => Self::NAMES[2],
            Action::RequestGame => Self::NAMES[3],
        }
    }

    /// Whether the action changes state (and so is turn-gated).
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::RequestGame)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode an RPC, telling unknown names apart from garbage.
    pub fn from_json(s: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(s)?;
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::Malformed("missing RPC name".to_string()))?;

        if !Self::NAMES.contains(&name) {
            return Err(DecodeError::UnknownRpc(name.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

// =============================================================================
// HOST -> CLIENT
// =============================================================================

/// Host reply, a `Result` envelope on the wire:
/// `{"type": "Ok", "value": GameState}` or `{"type": "Err", "value": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum HostMessage {
    /// Full authoritative snapshot.
    Ok(Box<GameState>),
    /// Error text.
    Err(String),
}

impl HostMessage {
    /// Wrap a snapshot.
    pub fn snapshot(state: &GameState) -> Self {
        HostMessage::Ok(Box::new(state.clone()))
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a host reply. Snapshots must be internally consistent.
    pub fn from_json(s: &str) -> Result<Self, DecodeError> {
        let message: Self = serde_json::from_str(s)?;
        if let HostMessage::Ok(state) = &message {
            state
                .validate()
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        }
        Ok(message)
    }
}
