use fastnoise_lite::{FastNoiseLite, NoiseType};

use crate::block::Block;
use crate::coords::{CHUNK_SIZE, CHUNK_VOLUME, ChunkCoord, TILE_SIZE, TileCoord, chunk_index};
use crate::meta::{Biome, MetaChunk};

#[derive(Debug)]
pub enum GenError {
    IncompleteTile {
        tile: TileCoord,
        map: &'static str,
        len: usize,
    },
    BufferSize(usize),
    Failed(String),
}

impl std::fmt::Display for GenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenError::IncompleteTile { tile, map, len } => write!(
                f,
                "tile ({}, {}) {} map has {} entries, expected {}",
                tile.mx,
                tile.mz,
                map,
                len,
                MetaChunk::AREA
            ),
            GenError::BufferSize(len) => {
                write!(f, "chunk buffer has {} blocks, expected {}", len, CHUNK_VOLUME)
            }
            GenError::Failed(msg) => write!(f, "generation failed: {}", msg),
        }
    }
}

impl std::error::Error for GenError {}

/// Raw per-tile maps produced by a generator, row-major by z then x.
#[derive(Clone, Debug, Default)]
pub struct TileMaps {
    pub heights: Vec<f32>,
    pub heat: Vec<f32>,
    pub biomes: Vec<Biome>,
}

/// Everything a generator may look at while filling one chunk.
pub struct GenContext<'a> {
    pub seed: i64,
    pub coord: ChunkCoord,
    pub meta: &'a MetaChunk,
}

/// Terrain generation entry points. Implementations must be safe to call
/// concurrently for distinct chunks and tiles.
pub trait TerrainGenerator: Send + Sync {
    fn generate_tile(&self, seed: i64, tile: TileCoord) -> Result<TileMaps, GenError>;

    /// Fills `blocks` (length `CHUNK_VOLUME`, indexed by `chunk_index`).
    fn generate_chunk(&self, ctx: &GenContext<'_>, blocks: &mut [Block]) -> Result<(), GenError>;
}

pub const SEA_LEVEL: i32 = 0;

/// Default two-octave simplex heightfield with a heat map and biome classes.
#[derive(Clone, Debug)]
pub struct NoiseTerrain {
    pub base_height: f32,
    pub amplitude: f32,
    pub height_frequency: f32,
    pub heat_frequency: f32,
}

impl Default for NoiseTerrain {
    fn default() -> Self {
        Self {
            base_height: 8.0,
            amplitude: 40.0,
            height_frequency: 0.004,
            heat_frequency: 0.0015,
        }
    }
}

#[inline]
fn fold_seed(seed: i64) -> i32 {
    (seed ^ (seed >> 32)) as i32
}

impl NoiseTerrain {
    fn noises(&self, seed: i64) -> (FastNoiseLite, FastNoiseLite, FastNoiseLite) {
        let seed = fold_seed(seed);
        let mut terrain = FastNoiseLite::with_seed(seed);
        terrain.set_noise_type(Some(NoiseType::OpenSimplex2));
        terrain.set_frequency(Some(self.height_frequency));
        let mut detail = FastNoiseLite::with_seed(seed ^ 99_173);
        detail.set_noise_type(Some(NoiseType::OpenSimplex2));
        detail.set_frequency(Some(self.height_frequency * 4.0));
        let mut heat = FastNoiseLite::with_seed(seed ^ 0x1203_5F31);
        heat.set_noise_type(Some(NoiseType::OpenSimplex2));
        heat.set_frequency(Some(self.heat_frequency));
        (terrain, detail, heat)
    }

    fn surface_block(biome: Biome) -> Block {
        match biome {
            Biome::Ocean | Biome::Beach | Biome::Desert => Block::SAND,
            Biome::Tundra | Biome::Mountain => Block::SNOW,
            Biome::Plains | Biome::Forest => Block::GRASS,
        }
    }
}

impl TerrainGenerator for NoiseTerrain {
    fn generate_tile(&self, seed: i64, tile: TileCoord) -> Result<TileMaps, GenError> {
        let (terrain, detail, heat_noise) = self.noises(seed);
        let (ox, oz) = tile.origin();
        let mut maps = TileMaps {
            heights: Vec::with_capacity(MetaChunk::AREA),
            heat: Vec::with_capacity(MetaChunk::AREA),
            biomes: Vec::with_capacity(MetaChunk::AREA),
        };
        for lz in 0..TILE_SIZE {
            for lx in 0..TILE_SIZE {
                let x = (ox + lx as i32) as f32;
                let z = (oz + lz as i32) as f32;
                let n = terrain.get_noise_2d(x, z) + 0.25 * detail.get_noise_2d(x, z);
                let height = self.base_height + n * self.amplitude;
                // Higher ground runs colder.
                let lapse = (height.max(0.0) / 256.0).min(0.3);
                let heat = ((heat_noise.get_noise_2d(x, z) * 0.5 + 0.5) - lapse).clamp(0.0, 1.0);
                maps.heights.push(height);
                maps.heat.push(heat);
                maps.biomes.push(Biome::classify(height, heat));
            }
        }
        Ok(maps)
    }

    fn generate_chunk(&self, ctx: &GenContext<'_>, blocks: &mut [Block]) -> Result<(), GenError> {
        if blocks.len() != CHUNK_VOLUME {
            return Err(GenError::BufferSize(blocks.len()));
        }
        let (ox, oy, oz) = ctx.coord.origin();
        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let wx = ox + x as i32;
                let wz = oz + z as i32;
                let h = ctx.meta.height_at(wx, wz).floor() as i32;
                let biome = ctx.meta.biome_at(wx, wz);
                let surface = Self::surface_block(biome);
                for y in 0..CHUNK_SIZE {
                    let wy = oy + y as i32;
                    let block = if wy > h {
                        if wy <= SEA_LEVEL { Block::WATER } else { Block::AIR }
                    } else if wy == h {
                        surface
                    } else if wy > h - 4 {
                        if surface == Block::SAND { Block::SAND } else { Block::DIRT }
                    } else {
                        Block::STONE
                    };
                    blocks[chunk_index(x, y, z)] = block;
                }
            }
        }
        Ok(())
    }
}
