//! Snapshot Persistence
//!
//! Versioned key/value storage for the host's authoritative state so a
//! restarted host can resume a game. Entries whose version does not match,
//! that fail to decode or whose state is inconsistent are discarded on load.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::game::state::GameState;

/// Current entry format version.
pub const STORE_VERSION: u32 = 1;

/// Key the game state is stored under.
pub const GAME_STATE_KEY: &str = "game-state";

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// State could not be serialized.
    #[error("Failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistence contract used by the host.
pub trait SnapshotStore {
    /// Persist `state`, replacing any previous entry.
    fn save(&mut self, state: &GameState) -> Result<(), StoreError>;

    /// Load the stored state, `None` if absent, outdated or unreadable.
    fn load(&self) -> Option<GameState>;

    /// Forget the stored state.
    fn new_game(&mut self) -> Result<(), StoreError>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Box<S> {
    fn save(&mut self, state: &GameState) -> Result<(), StoreError> {
        (**self).save(state)
    }

    fn load(&self) -> Option<GameState> {
        (**self).load()
    }

    fn new_game(&mut self) -> Result<(), StoreError> {
        (**self).new_game()
    }
}

/// On-disk/in-memory entry layout.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<T> {
    version: u32,
    saved_at: DateTime<Utc>,
    state: T,
}

fn encode_entry(state: &GameState) -> Result<String, StoreError> {
    let entry = StoredEntry {
        version: STORE_VERSION,
        saved_at: Utc::now(),
        state,
    };
    Ok(serde_json::to_string(&entry)?)
}

fn decode_entry(text: &str) -> Option<GameState> {
    match serde_json::from_str::<StoredEntry<GameState>>(text) {
        Ok(entry) if entry.version == STORE_VERSION => match entry.state.validate() {
            Ok(()) => {
                debug!(saved_at = %entry.saved_at, version = entry.state.version, "Loaded snapshot");
                Some(entry.state)
            }
            Err(e) => {
                warn!(error = %e, "Discarding inconsistent snapshot");
                None
            }
        },
        Ok(entry) => {
            warn!(found = entry.version, expected = STORE_VERSION, "Discarding outdated snapshot");
            None
        }
        Err(e) => {
            warn!(error = %e, "Discarding unreadable snapshot");
            None
        }
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-memory key/value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry text, if present.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Overwrite a raw entry.
    pub fn insert_raw(&mut self, key: &str, text: impl Into<String>) {
        self.entries.insert(key.to_string(), text.into());
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&mut self, state: &GameState) -> Result<(), StoreError> {
        let text = encode_entry(state)?;
        self.entries.insert(GAME_STATE_KEY.to_string(), text);
        Ok(())
    }

    fn load(&self) -> Option<GameState> {
        self.entries.get(GAME_STATE_KEY).and_then(|text| decode_entry(text))
    }

    fn new_game(&mut self) -> Result<(), StoreError> {
        self.entries.remove(GAME_STATE_KEY);
        Ok(())
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SnapshotStore for FileStore {
    fn save(&mut self, state: &GameState) -> Result<(), StoreError> {
        let text = encode_entry(state)?;
        // Write then rename so a crash never leaves a torn file.
        let tmp = self.path(&format!("{GAME_STATE_KEY}.tmp"));
        fs::write(&tmp, text)?;
        fs::rename(&tmp, self.path(GAME_STATE_KEY))?;
        Ok(())
    }

    fn load(&self) -> Option<GameState> {
        match fs::read_to_string(self.path(GAME_STATE_KEY)) {
            Ok(text) => decode_entry(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(error = %e, "Failed to read snapshot");
                None
            }
        }
    }

    fn new_game(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(self.path(GAME_STATE_KEY)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
