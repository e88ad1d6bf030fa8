use serde::{Deserialize, Serialize};

pub const CHUNK_SHIFT: i32 = 4;
pub const CHUNK_SIZE: usize = 1 << CHUNK_SHIFT;
pub const CHUNK_MASK: i32 = (1 << CHUNK_SHIFT) - 1;
pub const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

/// MetaChunk tiles span `TILE_SIZE` blocks on x and z.
pub const TILE_SHIFT: i32 = 8;
pub const TILE_SIZE: usize = 1 << TILE_SHIFT;
pub const TILE_MASK: i32 = (1 << TILE_SHIFT) - 1;

/// Linear index of a local block position inside a chunk.
#[inline]
pub fn chunk_index(x: usize, y: usize, z: usize) -> usize {
    (y * CHUNK_SIZE + z) * CHUNK_SIZE + x
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkCoord {
    #[inline]
    pub const fn new(cx: i32, cy: i32, cz: i32) -> Self {
        Self { cx, cy, cz }
    }

    /// Chunk containing the world block position.
    #[inline]
    pub const fn from_world(wx: i32, wy: i32, wz: i32) -> Self {
        Self {
            cx: wx >> CHUNK_SHIFT,
            cy: wy >> CHUNK_SHIFT,
            cz: wz >> CHUNK_SHIFT,
        }
    }

    /// World position of the chunk's minimum corner.
    #[inline]
    pub const fn origin(self) -> (i32, i32, i32) {
        (
            self.cx << CHUNK_SHIFT,
            self.cy << CHUNK_SHIFT,
            self.cz << CHUNK_SHIFT,
        )
    }

    #[inline]
    pub fn with_y(self, cy: i32) -> Self {
        Self { cy, ..self }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            cx: self.cx + dx,
            cy: self.cy + dy,
            cz: self.cz + dz,
        }
    }

    #[inline]
    pub fn distance_sq(self, other: ChunkCoord) -> i64 {
        let dx = i64::from(self.cx - other.cx);
        let dy = i64::from(self.cy - other.cy);
        let dz = i64::from(self.cz - other.cz);
        dx * dx + dy * dy + dz * dz
    }

    /// The MetaChunk tile this chunk lies in. Chunks never straddle tiles.
    #[inline]
    pub const fn tile(self) -> TileCoord {
        TileCoord {
            mx: self.cx >> (TILE_SHIFT - CHUNK_SHIFT),
            mz: self.cz >> (TILE_SHIFT - CHUNK_SHIFT),
        }
    }
}

impl From<(i32, i32, i32)> for ChunkCoord {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

impl From<ChunkCoord> for (i32, i32, i32) {
    fn from(value: ChunkCoord) -> Self {
        (value.cx, value.cy, value.cz)
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.cx, self.cy, self.cz)
    }
}

/// Coordinate of a MetaChunk tile (world x/z shifted by `TILE_SHIFT`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub mx: i32,
    pub mz: i32,
}

impl TileCoord {
    #[inline]
    pub const fn new(mx: i32, mz: i32) -> Self {
        Self { mx, mz }
    }

    #[inline]
    pub const fn from_world(wx: i32, wz: i32) -> Self {
        Self {
            mx: wx >> TILE_SHIFT,
            mz: wz >> TILE_SHIFT,
        }
    }

    #[inline]
    pub const fn origin(self) -> (i32, i32) {
        (self.mx << TILE_SHIFT, self.mz << TILE_SHIFT)
    }

    #[inline]
    pub fn distance_sq(self, other: TileCoord) -> i64 {
        let dx = i64::from(self.mx - other.mx);
        let dz = i64::from(self.mz - other.mz);
        dx * dx + dz * dz
    }

    /// Well-mixed 64-bit hash; neighbouring tiles land in different buckets.
    #[inline]
    pub fn mix_hash(self) -> u64 {
        let x = u64::from(self.mx as u32).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let z = u64::from(self.mz as u32).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
        let h = x ^ z.rotate_left(31);
        h ^ (h >> 29)
    }
}
