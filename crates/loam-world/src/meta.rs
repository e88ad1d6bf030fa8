use std::sync::atomic::AtomicU64;

use serde::{Deserialize, Serialize};

use crate::coords::{TILE_MASK, TILE_SIZE, TileCoord};
use crate::generator::{GenError, TileMaps};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Biome {
    Ocean,
    Beach,
    #[default]
    Plains,
    Forest,
    Desert,
    Tundra,
    Mountain,
}

impl Biome {
    /// Coarse climate classification from surface height and heat (0..1).
    pub fn classify(height: f32, heat: f32) -> Self {
        if height < -2.0 {
            Biome::Ocean
        } else if height < 2.0 {
            Biome::Beach
        } else if height > 48.0 {
            Biome::Mountain
        } else if heat < 0.25 {
            Biome::Tundra
        } else if heat > 0.75 {
            Biome::Desert
        } else if heat > 0.45 {
            Biome::Forest
        } else {
            Biome::Plains
        }
    }
}

/// Precomputed height/heat/biome maps for one `TILE_SIZE`² region.
///
/// Immutable once built, so tiles are shared across threads behind `Arc`
/// without further locking.
#[derive(Debug)]
pub struct MetaChunk {
    tile: TileCoord,
    heights: Box<[f32]>,
    heat: Box<[f32]>,
    biomes: Box<[Biome]>,
    pub compute_time_us: u32,
    pub reuse_count: AtomicU64,
}

impl MetaChunk {
    pub const AREA: usize = TILE_SIZE * TILE_SIZE;

    /// Wraps generator output. Fails instead of publishing a tile with
    /// missing entries.
    pub fn from_maps(tile: TileCoord, maps: TileMaps, compute_time_us: u32) -> Result<Self, GenError> {
        let TileMaps {
            heights,
            heat,
            biomes,
        } = maps;
        for (name, len) in [
            ("height", heights.len()),
            ("heat", heat.len()),
            ("biome", biomes.len()),
        ] {
            if len != Self::AREA {
                return Err(GenError::IncompleteTile {
                    tile,
                    map: name,
                    len,
                });
            }
        }
        Ok(Self {
            tile,
            heights: heights.into_boxed_slice(),
            heat: heat.into_boxed_slice(),
            biomes: biomes.into_boxed_slice(),
            compute_time_us,
            reuse_count: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn tile(&self) -> TileCoord {
        self.tile
    }

    #[inline]
    pub fn contains_world(&self, wx: i32, wz: i32) -> bool {
        TileCoord::from_world(wx, wz) == self.tile
    }

    #[inline]
    fn idx(wx: i32, wz: i32) -> usize {
        ((wz & TILE_MASK) as usize) * TILE_SIZE + (wx & TILE_MASK) as usize
    }

    /// Terrain height at a world column. Only the low bits of the position
    /// are used; callers pick the tile.
    #[inline]
    pub fn height_at(&self, wx: i32, wz: i32) -> f32 {
        self.heights[Self::idx(wx, wz)]
    }

    #[inline]
    pub fn heat_at(&self, wx: i32, wz: i32) -> f32 {
        self.heat[Self::idx(wx, wz)]
    }

    #[inline]
    pub fn biome_at(&self, wx: i32, wz: i32) -> Biome {
        self.biomes[Self::idx(wx, wz)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_maps_are_rejected() {
        let maps = TileMaps {
            heights: vec![0.0; MetaChunk::AREA],
            heat: vec![0.5; MetaChunk::AREA - 1],
            biomes: vec![Biome::Plains; MetaChunk::AREA],
        };
        let err = MetaChunk::from_maps(TileCoord::new(0, 0), maps, 0).unwrap_err();
        assert!(matches!(err, GenError::IncompleteTile { map: "heat", .. }));
    }

    #[test]
    fn lookups_use_local_bits() {
        let mut heights = vec![0.0; MetaChunk::AREA];
        heights[3 * TILE_SIZE + 7] = 12.5;
        let maps = TileMaps {
            heights,
            heat: vec![0.5; MetaChunk::AREA],
            biomes: vec![Biome::Forest; MetaChunk::AREA],
        };
        let tile = TileCoord::new(-1, 2);
        let meta = MetaChunk::from_maps(tile, maps, 0).unwrap();
        let (ox, oz) = tile.origin();
        assert_eq!(meta.height_at(ox + 7, oz + 3), 12.5);
        assert!(meta.contains_world(ox + 7, oz + 3));
        assert!(!meta.contains_world(ox + 256, oz));
        assert_eq!(meta.biome_at(ox, oz), Biome::Forest);
    }
}
