use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use loam_store::{ChunkRecord, StoreError};
use loam_world::{Block, BlockChange, CHUNK_MASK, CHUNK_VOLUME, ChunkCoord, chunk_index};

/// Lifecycle of a tracked chunk.
///
/// `Ungenerated -> Queued -> Generating -> Loaded -> Unloading`, with
/// `Queued`/`Generating` falling back to `Ungenerated` on failure or shutdown.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    Ungenerated = 0,
    Queued = 1,
    Generating = 2,
    Loaded = 3,
    Unloading = 4,
}

impl ChunkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ChunkState::Ungenerated,
            1 => ChunkState::Queued,
            2 => ChunkState::Generating,
            3 => ChunkState::Loaded,
            _ => ChunkState::Unloading,
        }
    }
}

/// Opaque per-chunk handle owned by a renderer.
pub type RenderHandle = std::sync::Arc<dyn Any + Send + Sync>;

// Neighbour bits, one per face.
pub const NEIGHBOR_NEG_X: u8 = 1 << 0;
pub const NEIGHBOR_POS_X: u8 = 1 << 1;
pub const NEIGHBOR_NEG_Y: u8 = 1 << 2;
pub const NEIGHBOR_POS_Y: u8 = 1 << 3;
pub const NEIGHBOR_NEG_Z: u8 = 1 << 4;
pub const NEIGHBOR_POS_Z: u8 = 1 << 5;

pub(crate) const NEIGHBOR_OFFSETS: [((i32, i32, i32), u8); 6] = [
    ((-1, 0, 0), NEIGHBOR_NEG_X),
    ((1, 0, 0), NEIGHBOR_POS_X),
    ((0, -1, 0), NEIGHBOR_NEG_Y),
    ((0, 1, 0), NEIGHBOR_POS_Y),
    ((0, 0, -1), NEIGHBOR_NEG_Z),
    ((0, 0, 1), NEIGHBOR_POS_Z),
];

struct ChunkData {
    blocks: Option<Box<[Block]>>,
    changes: Vec<BlockChange>,
}

/// One 16^3 region of the world.
///
/// Block data and the edit overlay sit behind a single lock so that an edit
/// either lands before generation finishes (and is replayed) or after it
/// (and is written straight into the blocks). The state is readable without
/// that lock.
pub struct Chunk {
    id: u64,
    coord: ChunkCoord,
    state: AtomicU8,
    data: Mutex<ChunkData>,
    dirty: AtomicBool,
    detached: AtomicBool,
    persist_failures: AtomicU32,
    neighbors: AtomicU8,
    render: Mutex<Option<RenderHandle>>,
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("coord", &self.coord)
            .field("state", &self.state())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl Chunk {
    /// A fresh `Ungenerated` chunk carrying the edits persisted for it.
    pub fn new(id: u64, coord: ChunkCoord, overlay: Vec<BlockChange>) -> Self {
        Self {
            id,
            coord,
            state: AtomicU8::new(ChunkState::Ungenerated as u8),
            data: Mutex::new(ChunkData {
                blocks: None,
                changes: overlay,
            }),
            dirty: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            persist_failures: AtomicU32::new(0),
            neighbors: AtomicU8::new(0),
            render: Mutex::new(None),
        }
    }

    fn lock_data(&self) -> MutexGuard<'_, ChunkData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    #[inline]
    pub fn state(&self) -> ChunkState {
        ChunkState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.state() == ChunkState::Loaded
    }

    /// Atomically moves `from -> to`; false when the chunk was not in `from`.
    pub(crate) fn try_transition(&self, from: ChunkState, to: ChunkState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_state(&self, to: ChunkState) {
        self.state.store(to as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Dropped from the world while a worker was still generating it.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    #[inline]
    pub fn persist_failures(&self) -> u32 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn neighbors(&self) -> u8 {
        self.neighbors.load(Ordering::Relaxed)
    }

    pub(crate) fn set_neighbors(&self, mask: u8) {
        self.neighbors.store(mask, Ordering::Relaxed);
    }

    pub fn attach_render(&self, handle: RenderHandle) {
        *self.render.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn render_handle(&self) -> Option<RenderHandle> {
        self.render
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains_world(&self, wx: i32, wy: i32, wz: i32) -> bool {
        ChunkCoord::from_world(wx, wy, wz) == self.coord
    }

    /// Block at a world position inside this chunk; `None` until loaded.
    pub fn block_world(&self, wx: i32, wy: i32, wz: i32) -> Option<Block> {
        if !self.contains_world(wx, wy, wz) {
            return None;
        }
        let idx = local_index(wx, wy, wz);
        let data = self.lock_data();
        data.blocks.as_ref().and_then(|b| b.get(idx).copied())
    }

    /// Copy of the block array; `None` until loaded.
    pub fn blocks(&self) -> Option<Vec<Block>> {
        self.lock_data().blocks.as_ref().map(|b| b.to_vec())
    }

    pub fn non_air_count(&self) -> usize {
        self.lock_data()
            .blocks
            .as_ref()
            .map_or(0, |b| b.iter().filter(|blk| !blk.is_air()).count())
    }

    pub fn changes(&self) -> Vec<BlockChange> {
        self.lock_data().changes.clone()
    }

    /// Records an edit at a world position inside this chunk.
    ///
    /// Applied immediately when loaded, otherwise kept for replay once the
    /// chunk is generated. `None` when the position is outside the chunk or
    /// the chunk is on its way out of the world.
    pub fn apply_edit(&self, wx: i32, wy: i32, wz: i32, block: Block) -> Option<BlockChange> {
        if !self.contains_world(wx, wy, wz) {
            return None;
        }
        let mut data = self.lock_data();
        if self.state() == ChunkState::Unloading || self.is_detached() {
            return None;
        }
        let idx = local_index(wx, wy, wz);
        let before = data
            .blocks
            .as_ref()
            .and_then(|b| b.get(idx).copied())
            .unwrap_or(Block::AIR);
        let change = BlockChange::new(
            (wx & CHUNK_MASK) as usize,
            (wy & CHUNK_MASK) as usize,
            (wz & CHUNK_MASK) as usize,
            before,
            block,
        )?;
        if let Some(blocks) = data.blocks.as_mut() {
            change.apply(blocks);
        }
        data.changes.push(change);
        self.dirty.store(true, Ordering::Release);
        Some(change)
    }

    /// Installs generated blocks, replays the overlay, persists, and marks
    /// the chunk `Loaded`, all under the data lock.
    ///
    /// A failed save still leaves the chunk `Loaded` but dirty; the error is
    /// returned so the caller can count it.
    pub(crate) fn finish_generation(
        &self,
        mut blocks: Box<[Block]>,
        save: impl FnOnce(&ChunkRecord) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut data = self.lock_data();
        for change in &data.changes {
            change.apply(&mut blocks);
        }
        data.blocks = Some(blocks);
        // A detached chunk was flushed on its way out and takes no edits
        // since; a successor at the same coordinate may own newer changes.
        let result = if self.is_detached() && !self.is_dirty() {
            Ok(())
        } else {
            self.save_locked(&data, save)
        };
        self.set_state(ChunkState::Loaded);
        result
    }

    /// Writes the overlay through `save`, clearing the dirty flag on success.
    pub(crate) fn persist(
        &self,
        save: impl FnOnce(&ChunkRecord) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let data = self.lock_data();
        self.save_locked(&data, save)
    }

    fn save_locked(
        &self,
        data: &ChunkData,
        save: impl FnOnce(&ChunkRecord) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let record = ChunkRecord::new(self.coord, data.changes.clone());
        match save(&record) {
            Ok(()) => {
                self.dirty.store(false, Ordering::Release);
                self.persist_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Takes the chunk out of service before its final flush.
    ///
    /// A chunk mid-generation is only flagged detached; its worker finishes
    /// and persists it. Returns the state to restore if the flush fails.
    pub(crate) fn begin_unload(&self) -> ChunkState {
        let _data = self.lock_data();
        loop {
            let current = self.state();
            match current {
                ChunkState::Unloading => return current,
                ChunkState::Generating => {
                    self.detached.store(true, Ordering::Release);
                    return current;
                }
                _ => {
                    if self.try_transition(current, ChunkState::Unloading) {
                        return current;
                    }
                }
            }
        }
    }

    /// Puts a chunk back in service after a failed final flush.
    pub(crate) fn abort_unload(&self, previous: ChunkState) {
        let _data = self.lock_data();
        if previous == ChunkState::Generating {
            self.detached.store(false, Ordering::Release);
        } else if self.state() == ChunkState::Unloading {
            // A queued job was skipped meanwhile; it must be queued again.
            let restored = if previous == ChunkState::Loaded {
                ChunkState::Loaded
            } else {
                ChunkState::Ungenerated
            };
            self.set_state(restored);
        }
    }
}

#[inline]
fn local_index(wx: i32, wy: i32, wz: i32) -> usize {
    chunk_index(
        (wx & CHUNK_MASK) as usize,
        (wy & CHUNK_MASK) as usize,
        (wz & CHUNK_MASK) as usize,
    )
}

/// An all-air buffer the size of one chunk.
pub(crate) fn empty_blocks() -> Box<[Block]> {
    vec![Block::AIR; CHUNK_VOLUME].into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stone() -> Box<[Block]> {
        vec![Block::STONE; CHUNK_VOLUME].into_boxed_slice()
    }

    #[test]
    fn transitions_are_exclusive() {
        let c = Chunk::new(1, ChunkCoord::new(0, 0, 0), Vec::new());
        assert!(c.try_transition(ChunkState::Ungenerated, ChunkState::Queued));
        assert!(!c.try_transition(ChunkState::Ungenerated, ChunkState::Queued));
        assert_eq!(c.state(), ChunkState::Queued);
    }

    #[test]
    fn edits_before_load_are_replayed() {
        let c = Chunk::new(1, ChunkCoord::new(1, 0, 0), Vec::new());
        let change = c.apply_edit(17, 3, 4, Block::SNOW).unwrap();
        assert_eq!(change.before, Block::AIR);
        assert!(c.is_dirty());
        assert_eq!(c.block_world(17, 3, 4), None);

        c.finish_generation(stone(), |_| Ok(())).unwrap();
        assert!(c.is_loaded());
        assert!(!c.is_dirty());
        assert_eq!(c.block_world(17, 3, 4), Some(Block::SNOW));
        assert_eq!(c.block_world(18, 3, 4), Some(Block::STONE));
    }

    #[test]
    fn edits_after_load_record_previous_block() {
        let c = Chunk::new(1, ChunkCoord::new(0, 0, 0), Vec::new());
        c.finish_generation(stone(), |_| Ok(())).unwrap();
        let change = c.apply_edit(0, 0, 0, Block::AIR).unwrap();
        assert_eq!(change.before, Block::STONE);
        assert_eq!(c.block_world(0, 0, 0), Some(Block::AIR));
        assert!(c.apply_edit(16, 0, 0, Block::AIR).is_none());
    }

    #[test]
    fn failed_save_keeps_loaded_and_dirty() {
        let c = Chunk::new(1, ChunkCoord::new(0, 0, 0), Vec::new());
        let res = c.finish_generation(stone(), |_| Err(StoreError::Unavailable("down".into())));
        assert!(res.is_err());
        assert!(c.is_loaded());
        assert!(c.is_dirty());
        assert_eq!(c.persist_failures(), 1);
        c.persist(|_| Ok(())).unwrap();
        assert!(!c.is_dirty());
        assert_eq!(c.persist_failures(), 0);
    }

    #[test]
    fn unloading_chunk_rejects_edits() {
        let c = Chunk::new(1, ChunkCoord::new(0, 0, 0), Vec::new());
        c.finish_generation(stone(), |_| Ok(())).unwrap();
        assert_eq!(c.begin_unload(), ChunkState::Loaded);
        assert!(c.apply_edit(1, 1, 1, Block::DIRT).is_none());
        c.abort_unload(ChunkState::Loaded);
        assert!(c.is_loaded());
        assert!(c.apply_edit(1, 1, 1, Block::DIRT).is_some());
    }

    #[test]
    fn generating_chunk_is_detached_not_unloaded() {
        let c = Chunk::new(1, ChunkCoord::new(0, 0, 0), Vec::new());
        c.set_state(ChunkState::Generating);
        assert_eq!(c.begin_unload(), ChunkState::Generating);
        assert!(c.is_detached());
        assert_eq!(c.state(), ChunkState::Generating);
        let mut saves = 0;
        c.finish_generation(stone(), |_| {
            saves += 1;
            Ok(())
        })
        .unwrap();
        assert!(c.is_loaded());
        assert_eq!(saves, 0);
    }

    #[test]
    fn restored_generating_chunk_still_saves() {
        let c = Chunk::new(1, ChunkCoord::new(0, 0, 0), Vec::new());
        c.set_state(ChunkState::Generating);
        let prev = c.begin_unload();
        c.abort_unload(prev);
        assert!(!c.is_detached());
        let mut saves = 0;
        c.finish_generation(stone(), |_| {
            saves += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(saves, 1);
    }

    #[test]
    fn queued_chunk_restores_as_ungenerated() {
        let c = Chunk::new(1, ChunkCoord::new(0, 0, 0), Vec::new());
        c.set_state(ChunkState::Queued);
        let prev = c.begin_unload();
        assert_eq!(c.state(), ChunkState::Unloading);
        c.abort_unload(prev);
        assert_eq!(c.state(), ChunkState::Ungenerated);
    }
}
