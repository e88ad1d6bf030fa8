use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use loam_cache::{BoundedCache, BoundedCacheStats};

use crate::coords::{CHUNK_SHIFT, TILE_SHIFT, TILE_SIZE, TileCoord};
use crate::generator::{GenError, TerrainGenerator};
use crate::meta::{Biome, MetaChunk};

const CHUNKS_PER_TILE: i32 = 1 << (TILE_SHIFT - CHUNK_SHIFT);
/// Extra tiles per axis kept beyond the window so an observer pacing along a
/// tile edge does not regenerate the same tiles over and over.
const CAPACITY_SLACK: i32 = 4;

#[derive(Clone, Copy, Debug, Default)]
pub struct MetaChunkStoreStats {
    pub live: usize,
    pub capacity: usize,
    pub generated: u64,
    pub evictions: u64,
    pub cache: BoundedCacheStats,
}

/// Lazily generated MetaChunk tiles, bounded by distance to the observer.
pub struct MetaChunkStore {
    seed: i64,
    generator: Arc<dyn TerrainGenerator>,
    live: RwLock<Vec<Arc<MetaChunk>>>,
    creating: Mutex<HashMap<TileCoord, Arc<Mutex<()>>>>,
    front: BoundedCache<Arc<MetaChunk>>,
    observer_mx: AtomicI32,
    observer_mz: AtomicI32,
    window_chunks: AtomicI32,
    generated: AtomicU64,
    evictions: AtomicU64,
}

impl MetaChunkStore {
    pub fn new(
        seed: i64,
        generator: Arc<dyn TerrainGenerator>,
        cache_buckets: usize,
        cache_associativity: usize,
    ) -> Self {
        Self {
            seed,
            generator,
            live: RwLock::new(Vec::new()),
            creating: Mutex::new(HashMap::new()),
            front: BoundedCache::new(cache_buckets, cache_associativity),
            observer_mx: AtomicI32::new(0),
            observer_mz: AtomicI32::new(0),
            window_chunks: AtomicI32::new(0),
            generated: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn seed(&self) -> i64 {
        self.seed
    }

    /// Records the observer position and window size that drive eviction.
    pub fn set_view(&self, observer: TileCoord, render_distance: i32) {
        self.observer_mx.store(observer.mx, Ordering::Relaxed);
        self.observer_mz.store(observer.mz, Ordering::Relaxed);
        self.window_chunks
            .store(render_distance.max(0) * 2, Ordering::Relaxed);
    }

    #[inline]
    fn observer(&self) -> TileCoord {
        TileCoord::new(
            self.observer_mx.load(Ordering::Relaxed),
            self.observer_mz.load(Ordering::Relaxed),
        )
    }

    /// Live-tile bound for the current window: every tile the window can
    /// touch plus a margin on each axis.
    pub fn capacity(&self) -> usize {
        let across = self.window_chunks.load(Ordering::Relaxed) / CHUNKS_PER_TILE + CAPACITY_SLACK;
        (across * across) as usize
    }

    #[inline]
    fn bucket_of(&self, tile: TileCoord) -> usize {
        self.front.bucket_index(tile.mix_hash())
    }

    /// Returns the tile, generating it on first use.
    pub fn get(&self, tile: TileCoord) -> Result<Arc<MetaChunk>, GenError> {
        let bucket = self.bucket_of(tile);
        if let Some(meta) = self.front.find_by(bucket, |m| m.tile() == tile) {
            meta.reuse_count.fetch_add(1, Ordering::Relaxed);
            return Ok(meta);
        }
        if let Some(meta) = self.promote(tile, bucket) {
            meta.reuse_count.fetch_add(1, Ordering::Relaxed);
            return Ok(meta);
        }

        let gate = {
            let mut creating = self.creating.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(creating.entry(tile).or_default())
        };
        let result = {
            let _held = gate.lock().unwrap_or_else(PoisonError::into_inner);
            // Another thread may have finished this tile while we waited.
            match self.peek(tile) {
                Some(meta) => Ok(meta),
                None => self.create(tile),
            }
        };
        {
            let mut creating = self.creating.lock().unwrap_or_else(PoisonError::into_inner);
            if creating.get(&tile).is_some_and(|g| Arc::ptr_eq(g, &gate)) {
                creating.remove(&tile);
            }
        }
        let meta = result?;
        self.promote(tile, bucket);
        Ok(meta)
    }

    /// Caches a live tile in front of the live list. Holding the read lock
    /// across the insert orders it before any eviction of the same tile, so
    /// the eviction's `remove_by` always sees it.
    fn promote(&self, tile: TileCoord, bucket: usize) -> Option<Arc<MetaChunk>> {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        let meta = live.iter().find(|m| m.tile() == tile).cloned()?;
        self.front.insert(Arc::clone(&meta), bucket);
        Some(meta)
    }

    /// Returns the tile only if it is already live.
    pub fn peek(&self, tile: TileCoord) -> Option<Arc<MetaChunk>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.tile() == tile)
            .cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn live_tiles(&self) -> Vec<TileCoord> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|m| m.tile())
            .collect()
    }

    /// Tiles currently held by the front cache.
    pub fn cached_tiles(&self) -> Vec<TileCoord> {
        (0..self.front.bucket_count())
            .flat_map(|b| self.front.bucket_entries(b))
            .map(|m| m.tile())
            .collect()
    }

    fn create(&self, tile: TileCoord) -> Result<Arc<MetaChunk>, GenError> {
        let t0 = Instant::now();
        let maps = self.generator.generate_tile(self.seed, tile)?;
        let t_us = t0.elapsed().as_micros().min(u128::from(u32::MAX)) as u32;
        let meta = Arc::new(MetaChunk::from_maps(tile, maps, t_us)?);
        self.generated.fetch_add(1, Ordering::Relaxed);
        log::trace!(target: "gen", "meta tile ({}, {}) built in {}us", tile.mx, tile.mz, t_us);

        let evicted = {
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            live.push(Arc::clone(&meta));
            self.evict_over_capacity(&mut live)
        };
        for old in evicted {
            let bucket = self.bucket_of(old);
            // Racing misses may have cached the tile more than once.
            while self.front.remove_by(bucket, |m| m.tile() == old).is_some() {}
        }
        Ok(meta)
    }

    fn evict_over_capacity(&self, live: &mut Vec<Arc<MetaChunk>>) -> Vec<TileCoord> {
        let capacity = self.capacity();
        let observer = self.observer();
        let mut evicted = Vec::new();
        while live.len() > capacity {
            let Some((idx, _)) = live
                .iter()
                .enumerate()
                .max_by_key(|(_, m)| m.tile().distance_sq(observer))
            else {
                break;
            };
            let old = live.swap_remove(idx);
            evicted.push(old.tile());
        }
        if !evicted.is_empty() {
            self.evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        }
        evicted
    }

    fn region<T: Copy + Default>(
        &self,
        x: i32,
        z: i32,
        width: usize,
        depth: usize,
        sample: impl Fn(&MetaChunk, i32, i32) -> T,
    ) -> Result<Vec<T>, GenError> {
        let mut out = vec![T::default(); width * depth];
        if width == 0 || depth == 0 {
            return Ok(out);
        }
        let x_end = x + width as i32;
        let z_end = z + depth as i32;
        let mut pz = z & !((TILE_SIZE as i32) - 1);
        while pz < z_end {
            let mut px = x & !((TILE_SIZE as i32) - 1);
            while px < x_end {
                let meta = self.get(TileCoord::from_world(px, pz))?;
                let (xs, xe) = (px.max(x), (px + TILE_SIZE as i32).min(x_end));
                let (zs, ze) = (pz.max(z), (pz + TILE_SIZE as i32).min(z_end));
                for wz in zs..ze {
                    let row = (wz - z) as usize * width;
                    for wx in xs..xe {
                        out[row + (wx - x) as usize] = sample(&meta, wx, wz);
                    }
                }
                px += TILE_SIZE as i32;
            }
            pz += TILE_SIZE as i32;
        }
        Ok(out)
    }

    /// Heights for the `width`×`depth` rectangle starting at (`x`, `z`),
    /// row-major by z.
    pub fn height_region(&self, x: i32, z: i32, width: usize, depth: usize) -> Result<Vec<f32>, GenError> {
        self.region(x, z, width, depth, |m, wx, wz| m.height_at(wx, wz))
    }

    pub fn heat_region(&self, x: i32, z: i32, width: usize, depth: usize) -> Result<Vec<f32>, GenError> {
        self.region(x, z, width, depth, |m, wx, wz| m.heat_at(wx, wz))
    }

    pub fn biome_region(&self, x: i32, z: i32, width: usize, depth: usize) -> Result<Vec<Biome>, GenError> {
        self.region(x, z, width, depth, |m, wx, wz| m.biome_at(wx, wz))
    }

    pub fn stats(&self) -> MetaChunkStoreStats {
        MetaChunkStoreStats {
            live: self.live_count(),
            capacity: self.capacity(),
            generated: self.generated.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cache: self.front.stats(),
        }
    }
}
