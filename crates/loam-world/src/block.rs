use serde::{Deserialize, Serialize};

use crate::coords::{CHUNK_SIZE, chunk_index};

// Compact voxel representation used at runtime
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Debug, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub state: BlockState,
}

pub type BlockId = u16;
pub type BlockState = u16;

impl Block {
    pub const AIR: Block = Block::new(0);
    pub const STONE: Block = Block::new(1);
    pub const DIRT: Block = Block::new(2);
    pub const GRASS: Block = Block::new(3);
    pub const SAND: Block = Block::new(4);
    pub const WATER: Block = Block::new(5);
    pub const SNOW: Block = Block::new(6);

    #[inline]
    pub const fn new(id: BlockId) -> Self {
        Self { id, state: 0 }
    }

    #[inline]
    pub fn is_air(self) -> bool {
        self.id == 0
    }
}

/// A player edit recorded against a chunk, replayed over freshly generated
/// data so edits survive unload and regeneration.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BlockChange {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub before: Block,
    pub after: Block,
}

impl BlockChange {
    /// Builds a change from chunk-local coordinates; `None` when outside the chunk.
    pub fn new(x: usize, y: usize, z: usize, before: Block, after: Block) -> Option<Self> {
        if x >= CHUNK_SIZE || y >= CHUNK_SIZE || z >= CHUNK_SIZE {
            return None;
        }
        Some(Self {
            x: x as u8,
            y: y as u8,
            z: z as u8,
            before,
            after,
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        chunk_index(
            usize::from(self.x),
            usize::from(self.y),
            usize::from(self.z),
        )
    }

    /// Writes this change into a dense chunk block array.
    #[inline]
    pub fn apply(&self, blocks: &mut [Block]) {
        if let Some(slot) = blocks.get_mut(self.index()) {
            *slot = self.after;
        }
    }
}
