use std::sync::Arc;

use hashbrown::HashMap;
use loam_world::ChunkCoord;

use crate::chunk::{Chunk, ChunkState};

/// A lookup hit an entry that no longer describes the requested chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaleEntry {
    pub coord: ChunkCoord,
    pub slot: usize,
}

/// Every chunk the world currently tracks, keyed by coordinate.
///
/// Chunks live in a flat list; a map points each coordinate at its slot and
/// the most recent hit is remembered for repeated lookups of the same chunk.
#[derive(Default)]
pub struct ChunkIndex {
    chunks: Vec<Arc<Chunk>>,
    positions: HashMap<ChunkCoord, usize>,
    last: Option<usize>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// `Ok(None)` when the coordinate is not tracked; `Err` when its entry is
    /// stale and must be repaired before retrying.
    pub fn find(&mut self, coord: ChunkCoord) -> Result<Option<Arc<Chunk>>, StaleEntry> {
        if let Some(chunk) = self.last.and_then(|slot| self.chunks.get(slot)) {
            if chunk.coord() == coord && chunk.state() != ChunkState::Unloading {
                return Ok(Some(Arc::clone(chunk)));
            }
        }
        let Some(&slot) = self.positions.get(&coord) else {
            return Ok(None);
        };
        match self.chunks.get(slot) {
            Some(chunk) if chunk.coord() == coord && chunk.state() != ChunkState::Unloading => {
                self.last = Some(slot);
                Ok(Some(Arc::clone(chunk)))
            }
            _ => Err(StaleEntry { coord, slot }),
        }
    }

    /// Drops chunks that are on their way out and re-derives the coordinate
    /// map, so the entry behind `stale` no longer resolves.
    pub fn repair(&mut self, stale: StaleEntry) {
        let before = self.chunks.len();
        self.chunks.retain(|c| c.state() != ChunkState::Unloading);
        log::debug!(
            target: "stream",
            "index repair at {} (slot {}): dropped {} stale chunk(s)",
            stale.coord,
            stale.slot,
            before - self.chunks.len()
        );
        self.rebuild_positions();
    }

    fn rebuild_positions(&mut self) {
        self.positions.clear();
        for (slot, chunk) in self.chunks.iter().enumerate() {
            self.positions.insert(chunk.coord(), slot);
        }
        self.last = None;
    }

    pub fn insert(&mut self, chunk: Arc<Chunk>) {
        let slot = self.chunks.len();
        self.positions.insert(chunk.coord(), slot);
        self.chunks.push(chunk);
        self.last = Some(slot);
    }

    /// Removes `chunk` if it is the one tracked at its coordinate.
    pub fn remove(&mut self, chunk: &Chunk) -> bool {
        let Some(&slot) = self.positions.get(&chunk.coord()) else {
            return false;
        };
        if self.chunks.get(slot).map(|c| c.id()) != Some(chunk.id()) {
            return false;
        }
        self.positions.remove(&chunk.coord());
        self.chunks.swap_remove(slot);
        if let Some(moved) = self.chunks.get(slot) {
            self.positions.insert(moved.coord(), slot);
        }
        self.last = None;
        true
    }

    pub fn snapshot(&self) -> Vec<Arc<Chunk>> {
        self.chunks.clone()
    }

    pub fn drain(&mut self) -> Vec<Arc<Chunk>> {
        self.positions.clear();
        self.last = None;
        std::mem::take(&mut self.chunks)
    }

    #[cfg(test)]
    pub(crate) fn point_at(&mut self, coord: ChunkCoord, slot: usize) {
        self.positions.insert(coord, slot);
        self.last = None;
    }
}
