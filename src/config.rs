//! Configuration
//!
//! Defaults suit a local game; `ServerConfig::from_env` overrides them from
//! `LABYRINTH_*` environment variables. Unparsable values keep the default.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::game::engine::DEFAULT_HISTORY_SIZE;
use crate::game::player::PlayerId;
use crate::network::animation::DEFAULT_MOVE_ANIMATION;
use crate::network::resync::DEFAULT_RESYNC_TIMEOUT;

/// Default WebSocket port.
pub const DEFAULT_PORT: u16 = 8080;

/// Timing and identity shared by host and client sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long a client waits for a snapshot after an optimistic change.
    pub resync_timeout: Duration,
    /// Duration of a whole figure move animation.
    pub move_animation: Duration,
    /// States the engine keeps for undo.
    pub history_size: usize,
    /// Player controlled by the host itself.
    pub host_player: PlayerId,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resync_timeout: DEFAULT_RESYNC_TIMEOUT,
            move_animation: DEFAULT_MOVE_ANIMATION,
            history_size: DEFAULT_HISTORY_SIZE,
            host_player: 0,
        }
    }
}

/// Host process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Directory for persisted snapshots; in-memory when `None`.
    pub store_dir: Option<PathBuf>,
    /// Session timing.
    pub sync: SyncConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            store_dir: None,
            sync: SyncConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let sync = SyncConfig {
            resync_timeout: env_parse::<u64>("LABYRINTH_RESYNC_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.sync.resync_timeout),
            move_animation: env_parse::<u64>("LABYRINTH_ANIMATION_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.sync.move_animation),
            history_size: defaults.sync.history_size,
            host_player: env_parse("LABYRINTH_HOST_PLAYER").unwrap_or(defaults.sync.host_player),
        };

        Self {
            bind_addr: env_parse("LABYRINTH_BIND").unwrap_or(defaults.bind_addr),
            store_dir: std::env::var("LABYRINTH_STORE_DIR").ok().map(PathBuf::from),
            sync,
            version: defaults.version,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring invalid environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert!(config.store_dir.is_none());
        assert_eq!(config.sync.resync_timeout, Duration::from_millis(1000));
        assert_eq!(config.sync.history_size, 10);
        assert_eq!(config.sync.host_player, 0);
    }

    #[test]
    fn test_from_env_overrides() {
        // Only this test touches these keys.
        std::env::set_var("LABYRINTH_RESYNC_MS", "250");
        std::env::set_var("LABYRINTH_HOST_PLAYER", "not-a-number");
        std::env::set_var("LABYRINTH_BIND", "127.0.0.1:9001");

        let config = ServerConfig::from_env();
        assert_eq!(config.sync.resync_timeout, Duration::from_millis(250));
        assert_eq!(config.sync.host_player, 0);
        assert_eq!(config.bind_addr, "127.0.0.1:9001".parse().unwrap());

        std::env::remove_var("LABYRINTH_RESYNC_MS");
        std::env::remove_var("LABYRINTH_HOST_PLAYER");
        std::env::remove_var("LABYRINTH_BIND");
    }
}
