//! Chunk persistence: the store interface and two implementations.
#![forbid(unsafe_code)]

mod dir;
mod memory;

use std::path::PathBuf;

use loam_world::{BlockChange, ChunkCoord};
use serde::{Deserialize, Serialize};

pub use dir::DirChunkStore;
pub use memory::{MemoryChunkStore, MemoryChunkStoreStats};

/// What gets persisted per chunk: its ordered edit overlay. Block data is
/// reproduced by regenerating and replaying the overlay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub coord: ChunkCoord,
    #[serde(default)]
    pub changes: Vec<BlockChange>,
}

impl ChunkRecord {
    pub fn new(coord: ChunkCoord, changes: Vec<BlockChange>) -> Self {
        Self { coord, changes }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Decode {
        path: PathBuf,
        reason: String,
    },
    Encode(String),
    MissingWorldData,
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io { path, source } => write!(f, "io error at {}: {}", path.display(), source),
            StoreError::Decode { path, reason } => {
                write!(f, "cannot decode {}: {}", path.display(), reason)
            }
            StoreError::Encode(reason) => write!(f, "cannot encode record: {}", reason),
            StoreError::MissingWorldData => write!(f, "store has no world data"),
            StoreError::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Persistent chunk storage keyed by chunk coordinate.
///
/// Implementations must accept concurrent saves of distinct chunks and
/// serialize saves of the same chunk. `save` overwrites whatever was stored
/// for the coordinate before.
pub trait ChunkStore: Send + Sync {
    /// Edits recorded for the chunk; empty when it was never saved.
    fn load_overlay(&self, coord: ChunkCoord) -> Result<Vec<BlockChange>, StoreError>;

    fn save(&self, record: &ChunkRecord) -> Result<(), StoreError>;

    fn has_world_data(&self) -> bool;

    fn load_seed(&self) -> Result<i64, StoreError>;

    fn save_seed(&self, seed: i64) -> Result<(), StoreError>;
}
