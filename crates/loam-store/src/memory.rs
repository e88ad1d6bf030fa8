use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use loam_world::{BlockChange, ChunkCoord};

use crate::{ChunkRecord, ChunkStore, StoreError};

#[derive(Default, Debug, Clone, Copy)]
pub struct MemoryChunkStoreStats {
    pub chunk_entries: usize,
    pub block_changes: usize,
    pub saves: u64,
}

#[derive(Default)]
struct Inner {
    overlays: HashMap<ChunkCoord, Vec<BlockChange>>,
    saves: HashMap<ChunkCoord, u64>,
    total_saves: u64,
    seed: Option<i64>,
}

/// In-process store; handy for tests and remote-backed sessions that keep
/// nothing on disk.
#[derive(Default)]
pub struct MemoryChunkStore {
    inner: Mutex<Inner>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: i64) -> Self {
        let store = Self::default();
        store.lock().seed = Some(seed);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of times `coord` was saved.
    pub fn saves_of(&self, coord: ChunkCoord) -> u64 {
        self.lock().saves.get(&coord).copied().unwrap_or(0)
    }

    pub fn stored_coords(&self) -> Vec<ChunkCoord> {
        self.lock().overlays.keys().copied().collect()
    }

    pub fn stats(&self) -> MemoryChunkStoreStats {
        let inner = self.lock();
        MemoryChunkStoreStats {
            chunk_entries: inner.overlays.len(),
            block_changes: inner.overlays.values().map(Vec::len).sum(),
            saves: inner.total_saves,
        }
    }
}

impl ChunkStore for MemoryChunkStore {
    fn load_overlay(&self, coord: ChunkCoord) -> Result<Vec<BlockChange>, StoreError> {
        Ok(self.lock().overlays.get(&coord).cloned().unwrap_or_default())
    }

    fn save(&self, record: &ChunkRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.overlays.insert(record.coord, record.changes.clone());
        *inner.saves.entry(record.coord).or_default() += 1;
        inner.total_saves += 1;
        Ok(())
    }

    fn has_world_data(&self) -> bool {
        self.lock().seed.is_some()
    }

    fn load_seed(&self) -> Result<i64, StoreError> {
        self.lock().seed.ok_or(StoreError::MissingWorldData)
    }

    fn save_seed(&self, seed: i64) -> Result<(), StoreError> {
        self.lock().seed = Some(seed);
        Ok(())
    }
}
