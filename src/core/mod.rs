//! Core deterministic primitives.
//!
//! Shared by host and clients so both sides derive identical boards and
//! identical state digests.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::DeterministicRng;
pub use hash::{StateHash, StateHasher};
