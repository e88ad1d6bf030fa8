//! World coordinates, blocks, configuration, and coarse per-tile terrain data.
#![forbid(unsafe_code)]

pub mod block;
pub mod config;
pub mod coords;
pub mod generator;
pub mod meta;
mod meta_store;

pub use block::{Block, BlockChange};
pub use config::{WorldConfig, load_config_from_path};
pub use coords::{
    CHUNK_MASK, CHUNK_SHIFT, CHUNK_SIZE, CHUNK_VOLUME, ChunkCoord, TILE_MASK, TILE_SHIFT,
    TILE_SIZE, TileCoord, chunk_index,
};
pub use generator::{GenContext, GenError, NoiseTerrain, TerrainGenerator, TileMaps};
pub use meta::{Biome, MetaChunk};
pub use meta_store::{MetaChunkStore, MetaChunkStoreStats};
