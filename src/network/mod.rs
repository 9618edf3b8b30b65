//! Network Layer
//!
//! Host-authoritative synchronization of a [`GameState`](crate::game::state::GameState)
//! across peers. The host applies turn-gated actions and broadcasts full
//! snapshots; clients apply their own actions optimistically and adopt every
//! snapshot they receive. This layer carries no game rules of its own; all of
//! those run through `game/`.

pub mod animation;
pub mod client;
pub mod host;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod resync;
pub mod server;

#[cfg(test)]
mod scenarios;

pub use animation::MovementAnimator;
pub use client::{ClientCommand, ClientError, ClientNotice, ClientSession};
pub use host::{HostCommand, HostError, HostEvent, HostNotice, HostSession, HostState, Origin};
pub use peer::{connect_url, ClientPeer};
pub use protocol::{Action, DecodeError, HostMessage};
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use resync::ResyncTracker;
pub use server::{player_from_uri, SyncServer, SyncServerError};
