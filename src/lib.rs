//! # Labyrinth Sync
//!
//! Host-authoritative multiplayer synchronization for a labyrinth board game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LABYRINTH SYNC                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded Xorshift128+ for board generation  │
//! │  └── hash.rs     - State digests for logs                    │
//! │                                                              │
//! │  game/           - Game rules (deterministic)                │
//! │  ├── tile.rs     - Tiles, rotations, board sides             │
//! │  ├── player.rs   - Players and their item queues             │
//! │  ├── board.rs    - Generation, shifting, path finding        │
//! │  ├── state.rs    - Game state transitions                    │
//! │  └── engine.rs   - Engine contract with undo history         │
//! │                                                              │
//! │  network/        - Synchronization (non-deterministic)       │
//! │  ├── protocol.rs - RPC and snapshot wire format              │
//! │  ├── host.rs     - Authoritative session                     │
//! │  ├── client.rs   - Optimistic mirror                         │
//! │  ├── resync.rs   - Missing-snapshot watchdog                 │
//! │  ├── animation.rs- Figure move playback                      │
//! │  ├── registry.rs - Open connections                          │
//! │  ├── server.rs   - WebSocket host transport                  │
//! │  └── peer.rs     - WebSocket client transport                │
//! │                                                              │
//! │  config.rs       - Defaults and environment overrides        │
//! │  store.rs        - Snapshot persistence                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! The host owns the only authoritative [`GameState`]. It accepts a mutating
//! action only from the current turn holder and broadcasts the full resulting
//! state. Clients run the same engine to apply their own actions at once, then
//! take whatever the host sends. Because board generation is seeded and the
//! rules never read the clock, host and client engines agree on every
//! outcome.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use config::{ServerConfig, SyncConfig};
pub use core::rng::DeterministicRng;
pub use game::engine::{GameCore, GameEngine};
pub use game::player::{PlayerId, Position};
pub use game::state::{GamePhase, GameStartSettings, GameState};
pub use network::client::ClientSession;
pub use network::host::HostSession;
pub use network::protocol::{Action, HostMessage};
pub use store::{FileStore, MemoryStore, SnapshotStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
