use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use loam_world::{
    Biome, Block, GenContext, GenError, MetaChunk, MetaChunkStore, NoiseTerrain, TILE_SIZE,
    TerrainGenerator, TileCoord, TileMaps,
};

/// Heights encode the world position so stitched regions can be checked.
#[derive(Default)]
struct PlaneGen {
    calls: Mutex<HashMap<TileCoord, usize>>,
    total: AtomicUsize,
}

impl PlaneGen {
    fn calls_for(&self, tile: TileCoord) -> usize {
        self.calls.lock().unwrap().get(&tile).copied().unwrap_or(0)
    }
}

impl TerrainGenerator for PlaneGen {
    fn generate_tile(&self, _seed: i64, tile: TileCoord) -> Result<TileMaps, GenError> {
        *self.calls.lock().unwrap().entry(tile).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        thread::yield_now();
        let (ox, oz) = tile.origin();
        let mut maps = TileMaps::default();
        for lz in 0..TILE_SIZE as i32 {
            for lx in 0..TILE_SIZE as i32 {
                maps.heights.push(((ox + lx) * 1000 + (oz + lz)) as f32);
                maps.heat.push(0.5);
                maps.biomes.push(Biome::Plains);
            }
        }
        Ok(maps)
    }

    fn generate_chunk(&self, _ctx: &GenContext<'_>, blocks: &mut [Block]) -> Result<(), GenError> {
        blocks.fill(Block::STONE);
        Ok(())
    }
}

struct BrokenGen;

impl TerrainGenerator for BrokenGen {
    fn generate_tile(&self, _seed: i64, _tile: TileCoord) -> Result<TileMaps, GenError> {
        Ok(TileMaps {
            heights: vec![0.0; 10],
            heat: vec![0.0; MetaChunk::AREA],
            biomes: vec![Biome::Ocean; MetaChunk::AREA],
        })
    }

    fn generate_chunk(&self, _ctx: &GenContext<'_>, _blocks: &mut [Block]) -> Result<(), GenError> {
        Err(GenError::Failed("broken".into()))
    }
}

#[test]
fn concurrent_misses_generate_each_tile_once() {
    let generator = Arc::new(PlaneGen::default());
    let store = Arc::new(MetaChunkStore::new(7, generator.clone(), 8, 2));
    store.set_view(TileCoord::new(0, 0), 64);
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let tile = TileCoord::new(i % 2, 0);
                store.get(tile).unwrap().tile()
            })
        })
        .collect();
    for h in handles {
        let tile = h.join().unwrap();
        assert!(tile == TileCoord::new(0, 0) || tile == TileCoord::new(1, 0));
    }
    assert_eq!(generator.calls_for(TileCoord::new(0, 0)), 1);
    assert_eq!(generator.calls_for(TileCoord::new(1, 0)), 1);
    assert_eq!(store.live_count(), 2);
}

#[test]
fn repeated_gets_share_one_tile() {
    let generator = Arc::new(PlaneGen::default());
    let store = MetaChunkStore::new(1, generator.clone(), 4, 2);
    let a = store.get(TileCoord::new(3, -2)).unwrap();
    let b = store.get(TileCoord::new(3, -2)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(generator.total.load(Ordering::SeqCst), 1);
    let stats = store.stats();
    assert!(stats.cache.hits >= 1);
    assert_eq!(stats.generated, 1);
}

#[test]
fn eviction_drops_farthest_tile() {
    let generator = Arc::new(PlaneGen::default());
    let store = MetaChunkStore::new(1, generator, 4, 2);
    // render distance 1 -> capacity (2/16 + 4)^2 = 16
    store.set_view(TileCoord::new(0, 0), 1);
    assert_eq!(store.capacity(), 16);
    for mx in 0..4 {
        for mz in 0..4 {
            store.get(TileCoord::new(mx, mz)).unwrap();
        }
    }
    assert_eq!(store.live_count(), 16);
    store.get(TileCoord::new(-1, 0)).unwrap();
    assert_eq!(store.live_count(), 16);
    assert!(store.peek(TileCoord::new(3, 3)).is_none());
    assert!(store.peek(TileCoord::new(-1, 0)).is_some());
    assert_eq!(store.stats().evictions, 1);
}

#[test]
fn evicted_tile_is_regenerated_identically() {
    let generator = Arc::new(PlaneGen::default());
    let store = MetaChunkStore::new(1, generator.clone(), 1, 1);
    store.set_view(TileCoord::new(100, 100), 0);
    let first = store.get(TileCoord::new(0, 0)).unwrap();
    for i in 0..20 {
        store.get(TileCoord::new(100 + i, 100)).unwrap();
    }
    assert!(store.peek(TileCoord::new(0, 0)).is_none());
    let again = store.get(TileCoord::new(0, 0)).unwrap();
    assert_eq!(generator.calls_for(TileCoord::new(0, 0)), 2);
    assert_eq!(first.height_at(5, 9), again.height_at(5, 9));
}

#[test]
fn front_cache_only_holds_live_tiles_under_churn() {
    let generator = Arc::new(PlaneGen::default());
    let store = Arc::new(MetaChunkStore::new(1, generator, 4, 4));
    // capacity 16 with 48 tiles in play forces constant eviction
    store.set_view(TileCoord::new(0, 0), 0);
    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..400 {
                    let mx = (i * 7 + t * 5) % 24;
                    let tile = TileCoord::new(mx, i % 2);
                    assert_eq!(store.get(tile).unwrap().tile(), tile);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let live = store.live_tiles();
    assert!(live.len() <= store.capacity());
    for tile in store.cached_tiles() {
        assert!(live.contains(&tile), "cached tile {:?} is not live", tile);
    }
}

#[test]
fn incomplete_tile_is_never_published() {
    let store = MetaChunkStore::new(1, Arc::new(BrokenGen), 4, 2);
    let err = store.get(TileCoord::new(0, 0)).unwrap_err();
    assert!(matches!(err, GenError::IncompleteTile { map: "height", .. }));
    assert!(store.peek(TileCoord::new(0, 0)).is_none());
    assert_eq!(store.live_count(), 0);
}

#[test]
fn height_region_stitches_across_tiles() {
    let store = MetaChunkStore::new(1, Arc::new(PlaneGen::default()), 8, 2);
    store.set_view(TileCoord::new(0, 0), 32);
    let (x, z, w, d) = (-3, 250, 6, 10);
    let map = store.height_region(x, z, w, d).unwrap();
    assert_eq!(map.len(), w * d);
    for dz in 0..d {
        for dx in 0..w {
            let wx = x + dx as i32;
            let wz = z + dz as i32;
            assert_eq!(map[dz * w + dx], (wx * 1000 + wz) as f32);
        }
    }
    let tiles = store.live_tiles();
    assert_eq!(tiles.len(), 4);
    let biomes = store.biome_region(x, z, w, d).unwrap();
    assert!(biomes.iter().all(|b| *b == Biome::Plains));
    assert!(store.heat_region(0, 0, 0, 4).unwrap().is_empty());
}

#[test]
fn noise_tiles_are_deterministic() {
    let terrain = NoiseTerrain::default();
    let a = terrain.generate_tile(99, TileCoord::new(1, -1)).unwrap();
    let b = terrain.generate_tile(99, TileCoord::new(1, -1)).unwrap();
    assert_eq!(a.heights, b.heights);
    assert_eq!(a.biomes, b.biomes);
    assert_eq!(a.heights.len(), MetaChunk::AREA);
    assert!(a.heat.iter().all(|h| (0.0..=1.0).contains(h)));
}
