use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use hashbrown::HashMap;
use loam_store::{ChunkStore, StoreError};
use loam_world::{
    Block, BlockChange, CHUNK_VOLUME, ChunkCoord, GenError, MetaChunk, MetaChunkStore,
    MetaChunkStoreStats, TerrainGenerator, TileCoord, WorldConfig,
};
use rayon::prelude::*;

use crate::chunk::{Chunk, ChunkState, NEIGHBOR_OFFSETS};
use crate::error::WorldError;
use crate::index::ChunkIndex;
use crate::queue::GenerationQueue;
use crate::remote::ChunkRequester;
use crate::window::{VisibleWindow, WindowShape};
use crate::workers::{
    Counters, GenOutcome, GenReport, GenerationWorkers, Shared, finish_chunk,
    note_persist_failure, process_job,
};

/// Lookups that hit stale index entries are retried this many times.
pub const MAX_LOOKUP_ATTEMPTS: u32 = 3;

/// Chunks this far (or farther) from the window centre on x or z are dropped
/// when they are not part of the window.
const STRAY_MARGIN: i32 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeekSummary {
    /// False when the window was already in place.
    pub moved: bool,
    pub reused: usize,
    pub created: usize,
    pub queued: usize,
    pub unloaded: usize,
    /// Chunks that should have left but could not be flushed.
    pub retained: usize,
    pub pruned: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub reports: usize,
    pub loaded: usize,
    pub failed: usize,
    pub requeued: usize,
    pub flushed: usize,
    pub pruned: usize,
    pub ticks: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub dequeued: usize,
    pub flushed: usize,
    pub elapsed_ms: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WorldStats {
    pub known: usize,
    pub windowed: usize,
    pub loaded: usize,
    pub queued: usize,
    pub inflight: usize,
    pub generated: u64,
    pub generation_failures: u64,
    pub persist_failures: u64,
    pub unloaded: u64,
    pub requests: u64,
    pub game_time: u64,
    pub meta: MetaChunkStoreStats,
}

enum Source {
    Local {
        queue: Arc<GenerationQueue>,
        workers: GenerationWorkers,
    },
    Remote {
        requester: Arc<dyn ChunkRequester>,
    },
}

struct GameClock {
    tick: Duration,
    last: Instant,
    game_time: u64,
    behind: bool,
}

impl GameClock {
    fn new(tick: Duration, now: Instant) -> Self {
        Self {
            tick: tick.max(Duration::from_millis(1)),
            last: now,
            game_time: 0,
            behind: false,
        }
    }

    /// Advances by at most one tick; a caller that fell further behind
    /// skips the missed ticks.
    fn advance(&mut self, now: Instant) -> u64 {
        if now < self.last + self.tick {
            return 0;
        }
        self.last += self.tick;
        self.game_time += 1;
        if self.last + self.tick < now {
            if !self.behind {
                let skipped = now.duration_since(self.last).as_millis() / self.tick.as_millis();
                log::warn!(target: "stream", "{} updates skipped", skipped);
                self.behind = true;
            }
            self.last = now;
        } else {
            self.behind = false;
        }
        1
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn persist_chunk(shared: &Shared, chunk: &Chunk) -> Result<(), StoreError> {
    chunk
        .persist(|rec| shared.store.save(rec))
        .inspect_err(|e| note_persist_failure(chunk, shared, e))
}

fn resolve_seed(config: &WorldConfig, store: &dyn ChunkStore) -> Result<i64, StoreError> {
    if store.has_world_data() {
        let seed = store.load_seed()?;
        log::info!(target: "stream", "loaded world seed {}", seed);
        return Ok(seed);
    }
    let seed = config.seed.unwrap_or_else(rand::random::<i64>);
    store.save_seed(seed)?;
    log::info!(target: "stream", "new world with seed {}", seed);
    Ok(seed)
}

/// Streams chunks around a moving observer.
///
/// Tracks every chunk it has handed out, keeps a visible window of chunks
/// around the observer, generates missing chunks on a worker pool (or asks a
/// remote source for them), and writes edits back to the chunk store.
/// All methods take `&self`; share the world behind an `Arc`.
pub struct World {
    config: WorldConfig,
    shared: Arc<Shared>,
    index: Mutex<ChunkIndex>,
    window: RwLock<Arc<VisibleWindow>>,
    seek_lock: Mutex<Option<(i32, i32, i32)>>,
    render_distance: AtomicI32,
    source: Source,
    reports_tx: Sender<GenReport>,
    reports_rx: Receiver<GenReport>,
    clock: Mutex<GameClock>,
    last_flush: Mutex<Instant>,
    next_chunk_id: AtomicU64,
    closed: AtomicBool,
}

impl World {
    /// Opens a world that generates its own chunks.
    pub fn open(
        config: WorldConfig,
        store: Arc<dyn ChunkStore>,
        generator: Arc<dyn TerrainGenerator>,
    ) -> Result<Self, WorldError> {
        let shared = Self::make_shared(&config, store, generator)?;
        let (reports_tx, reports_rx) = unbounded();
        let queue = Arc::new(GenerationQueue::new(config.queue_capacity()));
        let workers = GenerationWorkers::spawn(
            config.worker_count(),
            Arc::clone(&shared),
            Arc::clone(&queue),
            reports_tx.clone(),
        )?;
        log::info!(
            target: "stream",
            "world open: {} workers, queue capacity {}",
            workers.count(),
            queue.capacity()
        );
        Ok(Self::assemble(
            config,
            shared,
            Source::Local { queue, workers },
            reports_tx,
            reports_rx,
        ))
    }

    /// Opens a world whose chunks are supplied through `deliver_chunk` in
    /// answer to requests sent through `requester`. The generator is only
    /// used for MetaChunk data.
    pub fn open_remote(
        config: WorldConfig,
        store: Arc<dyn ChunkStore>,
        generator: Arc<dyn TerrainGenerator>,
        requester: Arc<dyn ChunkRequester>,
    ) -> Result<Self, WorldError> {
        let shared = Self::make_shared(&config, store, generator)?;
        let (reports_tx, reports_rx) = unbounded();
        log::info!(target: "stream", "world open with remote chunk source");
        Ok(Self::assemble(
            config,
            shared,
            Source::Remote { requester },
            reports_tx,
            reports_rx,
        ))
    }

    fn make_shared(
        config: &WorldConfig,
        store: Arc<dyn ChunkStore>,
        generator: Arc<dyn TerrainGenerator>,
    ) -> Result<Arc<Shared>, WorldError> {
        let seed = resolve_seed(config, store.as_ref())?;
        let metas = MetaChunkStore::new(
            seed,
            Arc::clone(&generator),
            config.meta_cache_buckets,
            config.meta_cache_associativity,
        );
        Ok(Arc::new(Shared {
            seed,
            store,
            generator,
            metas,
            counters: Counters::default(),
        }))
    }

    fn assemble(
        config: WorldConfig,
        shared: Arc<Shared>,
        source: Source,
        reports_tx: Sender<GenReport>,
        reports_rx: Receiver<GenReport>,
    ) -> Self {
        let now = Instant::now();
        Self {
            render_distance: AtomicI32::new(config.render_distance()),
            clock: Mutex::new(GameClock::new(Duration::from_millis(config.tick_ms), now)),
            last_flush: Mutex::new(now),
            config,
            shared,
            index: Mutex::new(ChunkIndex::new()),
            window: RwLock::new(Arc::new(VisibleWindow::empty())),
            seek_lock: Mutex::new(None),
            source,
            reports_tx,
            reports_rx,
            next_chunk_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn seed(&self) -> i64 {
        self.shared.seed
    }

    #[inline]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    #[inline]
    pub fn metas(&self) -> &MetaChunkStore {
        &self.shared.metas
    }

    /// MetaChunk covering the world column `(wx, wz)`, created on demand.
    pub fn meta_chunk(&self, wx: i32, wz: i32) -> Result<Arc<MetaChunk>, WorldError> {
        Ok(self.shared.metas.get(TileCoord::from_world(wx, wz))?)
    }

    #[inline]
    pub fn is_remote(&self) -> bool {
        matches!(self.source, Source::Remote { .. })
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), WorldError> {
        if self.is_closed() {
            return Err(WorldError::Closed);
        }
        Ok(())
    }

    fn lock_index(&self) -> MutexGuard<'_, ChunkIndex> {
        lock(&self.index)
    }

    /// The currently published window.
    pub fn window(&self) -> Arc<VisibleWindow> {
        Arc::clone(&self.window.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish_window(&self, window: VisibleWindow) {
        *self.window.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(window);
    }

    #[inline]
    pub fn render_distance(&self) -> i32 {
        self.render_distance.load(Ordering::Relaxed)
    }

    // ---- lookup ----

    /// Chunk containing the world position; never fails for a live world
    /// unless the store cannot be read.
    pub fn get_chunk(&self, wx: i32, wy: i32, wz: i32) -> Result<Arc<Chunk>, WorldError> {
        self.chunk_at(ChunkCoord::from_world(wx, wy, wz))
    }

    /// Chunk at `coord`, created `Ungenerated` when not yet tracked.
    pub fn chunk_at(&self, coord: ChunkCoord) -> Result<Arc<Chunk>, WorldError> {
        self.ensure_open()?;
        if let Some(chunk) = self.window().get(coord) {
            if chunk.is_loaded() {
                return Ok(chunk);
            }
        }
        for attempt in 1..=MAX_LOOKUP_ATTEMPTS {
            let found = self.lock_index().find(coord);
            match found {
                Ok(Some(chunk)) => return Ok(chunk),
                Ok(None) => {}
                Err(stale) => {
                    log::warn!(target: "stream", "stale index entry for {} (attempt {})", coord, attempt);
                    self.lock_index().repair(stale);
                    continue;
                }
            }
            // Read the overlay before taking the index lock, then re-check.
            let overlay = self.shared.store.load_overlay(coord)?;
            let mut index = self.lock_index();
            match index.find(coord) {
                Ok(Some(chunk)) => return Ok(chunk),
                Ok(None) => {
                    let id = self.next_chunk_id.fetch_add(1, Ordering::Relaxed);
                    let chunk = Arc::new(Chunk::new(id, coord, overlay));
                    index.insert(Arc::clone(&chunk));
                    return Ok(chunk);
                }
                Err(stale) => {
                    log::warn!(target: "stream", "stale index entry for {} (attempt {})", coord, attempt);
                    index.repair(stale);
                }
            }
        }
        log::error!(target: "stream", "giving up on chunk {} after {} lookups", coord, MAX_LOOKUP_ATTEMPTS);
        Err(WorldError::IndexCorrupted {
            coord,
            attempts: MAX_LOOKUP_ATTEMPTS,
        })
    }

    /// Tracked chunk at `coord`, without creating one.
    pub fn peek_chunk(&self, coord: ChunkCoord) -> Option<Arc<Chunk>> {
        if let Some(chunk) = self.window().get(coord) {
            return Some(chunk);
        }
        self.lock_index().find(coord).ok().flatten()
    }

    // ---- generation ----

    /// Schedules `chunk` for generation; `Ok(false)` when it is already
    /// queued, in progress or loaded. Blocks while the queue is full.
    pub fn queue_chunk(&self, chunk: &Arc<Chunk>) -> Result<bool, WorldError> {
        self.ensure_open()?;
        match &self.source {
            Source::Local { queue, .. } => Ok(queue.enqueue(chunk)?),
            Source::Remote { requester } => self.request_chunk(requester.as_ref(), chunk),
        }
    }

    fn request_chunk(
        &self,
        requester: &dyn ChunkRequester,
        chunk: &Chunk,
    ) -> Result<bool, WorldError> {
        if !chunk.try_transition(ChunkState::Ungenerated, ChunkState::Queued) {
            return Ok(false);
        }
        self.shared.counters.requests.fetch_add(1, Ordering::Relaxed);
        match requester.send_request(chunk.coord()) {
            Ok(()) => Ok(true),
            Err(e) => {
                chunk.try_transition(ChunkState::Queued, ChunkState::Ungenerated);
                Err(e.into())
            }
        }
    }

    /// Generates the chunk at a world position on the calling thread, or
    /// waits for the worker already generating it.
    pub fn generate_now(&self, wx: i32, wy: i32, wz: i32) -> Result<Arc<Chunk>, WorldError> {
        let coord = ChunkCoord::from_world(wx, wy, wz);
        let mut chunk = self.chunk_at(coord)?;
        loop {
            self.ensure_open()?;
            let state = chunk.state();
            match state {
                ChunkState::Loaded => return Ok(chunk),
                _ if self.is_remote() => return Err(WorldError::RemoteSource),
                ChunkState::Ungenerated | ChunkState::Queued => {
                    // Claiming a queued chunk makes its worker skip it.
                    if chunk.try_transition(state, ChunkState::Generating) {
                        let report = process_job(&chunk, &self.shared);
                        let _ = self.reports_tx.send(report.clone());
                        if report.outcome == GenOutcome::GenerationFailed {
                            return Err(WorldError::Gen(GenError::Failed(
                                report.error.unwrap_or_default(),
                            )));
                        }
                        return Ok(chunk);
                    }
                }
                ChunkState::Generating => thread::sleep(Duration::from_millis(1)),
                ChunkState::Unloading => chunk = self.chunk_at(coord)?,
            }
        }
    }

    /// Hands a remotely generated chunk to the world. `Ok(false)` when the
    /// chunk is not tracked or was not waiting for data.
    pub fn deliver_chunk(&self, coord: ChunkCoord, blocks: Vec<Block>) -> Result<bool, WorldError> {
        self.ensure_open()?;
        if blocks.len() != CHUNK_VOLUME {
            return Err(GenError::BufferSize(blocks.len()).into());
        }
        let Some(chunk) = self.peek_chunk(coord) else {
            log::debug!(target: "stream", "dropping unsolicited chunk {}", coord);
            return Ok(false);
        };
        let claimed = chunk.try_transition(ChunkState::Queued, ChunkState::Generating)
            || chunk.try_transition(ChunkState::Ungenerated, ChunkState::Generating);
        if !claimed {
            return Ok(false);
        }
        let t0 = Instant::now();
        let (outcome, error, t_persist_ms) =
            finish_chunk(&chunk, blocks.into_boxed_slice(), &self.shared);
        let _ = self.reports_tx.send(GenReport {
            coord,
            chunk_id: chunk.id(),
            outcome,
            error,
            detached: chunk.is_detached(),
            t_total_ms: t0.elapsed().as_millis().min(u128::from(u32::MAX)) as u32,
            t_meta_ms: 0,
            t_gen_ms: 0,
            t_persist_ms,
        });
        Ok(true)
    }

    // ---- edits ----

    /// Writes `block` at a world position and saves the chunk's overlay.
    ///
    /// Chunks that are not loaded yet keep the edit and apply it once
    /// generated. A failed save leaves the chunk dirty for the next flush.
    pub fn set_block(
        &self,
        wx: i32,
        wy: i32,
        wz: i32,
        block: Block,
    ) -> Result<BlockChange, WorldError> {
        let coord = ChunkCoord::from_world(wx, wy, wz);
        for _ in 0..MAX_LOOKUP_ATTEMPTS {
            let chunk = self.chunk_at(coord)?;
            // `None` means the chunk started unloading; look it up again.
            if let Some(change) = chunk.apply_edit(wx, wy, wz, block) {
                let _ = persist_chunk(&self.shared, &chunk);
                return Ok(change);
            }
        }
        Err(WorldError::IndexCorrupted {
            coord,
            attempts: MAX_LOOKUP_ATTEMPTS,
        })
    }

    pub fn remove_block(&self, wx: i32, wy: i32, wz: i32) -> Result<BlockChange, WorldError> {
        self.set_block(wx, wy, wz, Block::AIR)
    }

    /// Block at a world position, if its chunk is tracked and loaded.
    pub fn block_at(&self, wx: i32, wy: i32, wz: i32) -> Option<Block> {
        self.peek_chunk(ChunkCoord::from_world(wx, wy, wz))?
            .block_world(wx, wy, wz)
    }

    // ---- window maintenance ----

    /// Moves the visible window to the observer at `(x, y, z)`.
    ///
    /// Chunks still in range are carried over, new ones are created and
    /// queued, and chunks that fell out are flushed and dropped. Calling it
    /// again before the observer crosses a window boundary does nothing.
    pub fn seek(&self, x: i32, y: i32, z: i32, render_distance: i32) -> Result<SeekSummary, WorldError> {
        self.ensure_open()?;
        let t0 = Instant::now();
        let rd = render_distance.max(1);
        let mut observer = lock(&self.seek_lock);
        *observer = Some((x, y, z));
        self.render_distance.store(rd, Ordering::Relaxed);
        self.shared.metas.set_view(TileCoord::from_world(x, z), rd);

        let shape = WindowShape::around(x, y, z, rd, self.config.vertical_radius);
        let old = self.window();
        let mut summary = SeekSummary::default();
        if old.shape() == shape {
            return Ok(summary);
        }
        summary.moved = true;

        let mut previous: HashMap<ChunkCoord, Arc<Chunk>> =
            old.chunks().into_iter().map(|c| (c.coord(), c)).collect();
        let mut slots = Vec::with_capacity(shape.volume());
        let mut fresh = Vec::new();
        for coord in shape.coords() {
            let chunk = match previous.remove(&coord) {
                Some(chunk) => {
                    summary.reused += 1;
                    chunk
                }
                None => {
                    summary.created += 1;
                    self.chunk_at(coord)?
                }
            };
            if chunk.state() == ChunkState::Ungenerated {
                fresh.push(Arc::clone(&chunk));
            }
            slots.push(Arc::downgrade(&chunk));
        }
        self.publish_window(VisibleWindow::new(shape, slots));

        for chunk in previous.into_values() {
            if self.retire(&chunk) {
                summary.unloaded += 1;
            } else {
                summary.retained += 1;
            }
        }
        summary.pruned = self.prune_strays(shape);

        for chunk in &fresh {
            if self.queue_chunk(chunk)? {
                summary.queued += 1;
            }
        }
        log::debug!(
            target: "stream",
            "seek to {} rd={}: reused={} created={} queued={} unloaded={} retained={} pruned={} in {}ms",
            ChunkCoord::from_world(x, y, z),
            rd,
            summary.reused,
            summary.created,
            summary.queued,
            summary.unloaded,
            summary.retained,
            summary.pruned,
            t0.elapsed().as_millis()
        );
        Ok(summary)
    }

    /// Changes the render distance and re-seeks around the last observer.
    pub fn set_render_distance(&self, render_distance: i32) -> Result<SeekSummary, WorldError> {
        let rd = render_distance.max(1);
        self.render_distance.store(rd, Ordering::Relaxed);
        let last = *lock(&self.seek_lock);
        match last {
            Some((x, y, z)) => self.seek(x, y, z, rd),
            None => Ok(SeekSummary::default()),
        }
    }

    /// Flushes and forgets `chunk`. False when it had unsaved edits that
    /// could not be written; it then stays tracked.
    fn retire(&self, chunk: &Chunk) -> bool {
        for _ in 0..MAX_LOOKUP_ATTEMPTS {
            if chunk.is_dirty() && persist_chunk(&self.shared, chunk).is_err() {
                return false;
            }
            let mut index = self.lock_index();
            let previous = chunk.begin_unload();
            if chunk.is_dirty() {
                // Edited between the flush and the unload.
                chunk.abort_unload(previous);
                continue;
            }
            index.remove(chunk);
            self.shared.counters.unloaded.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Drops tracked chunks outside the window that lie far from it.
    fn prune_strays(&self, shape: WindowShape) -> usize {
        if shape.volume() == 0 {
            return 0;
        }
        let center = shape.center();
        let limit = shape.render_distance() + STRAY_MARGIN;
        let strays: Vec<_> = self
            .lock_index()
            .snapshot()
            .into_iter()
            .filter(|c| {
                let coord = c.coord();
                !shape.contains(coord)
                    && ((coord.cx - center.cx).abs() >= limit || (coord.cz - center.cz).abs() >= limit)
            })
            .collect();
        strays.iter().filter(|c| self.retire(c)).count()
    }

    // ---- housekeeping ----

    /// Per-tick housekeeping: drains worker results, refreshes neighbour
    /// masks, re-queues window chunks whose generation failed, runs the
    /// periodic flush, and advances game time.
    pub fn update(&self, now: Instant) -> Result<UpdateSummary, WorldError> {
        self.ensure_open()?;
        let mut summary = UpdateSummary::default();
        for report in self.reports_rx.try_iter() {
            summary.reports += 1;
            match report.outcome {
                GenOutcome::Loaded | GenOutcome::PersistFailed => summary.loaded += 1,
                GenOutcome::GenerationFailed => summary.failed += 1,
            }
            log::trace!(
                target: "gen",
                "chunk {} {:?}: total={}ms meta={}ms gen={}ms persist={}ms",
                report.coord,
                report.outcome,
                report.t_total_ms,
                report.t_meta_ms,
                report.t_gen_ms,
                report.t_persist_ms
            );
        }

        let window = self.window();
        for chunk in window.chunks() {
            match chunk.state() {
                ChunkState::Loaded => {
                    let mut mask = 0u8;
                    for ((dx, dy, dz), bit) in NEIGHBOR_OFFSETS {
                        let near = window.get(chunk.coord().offset(dx, dy, dz));
                        if near.is_some_and(|n| n.is_loaded()) {
                            mask |= bit;
                        }
                    }
                    chunk.set_neighbors(mask);
                }
                ChunkState::Ungenerated => {
                    if self.requeue(&chunk)? {
                        summary.requeued += 1;
                    }
                }
                _ => {}
            }
        }

        let interval = Duration::from_millis(self.config.flush_interval_ms);
        let flush_due = {
            let mut last = lock(&self.last_flush);
            if now.saturating_duration_since(*last) >= interval {
                *last = now;
                true
            } else {
                false
            }
        };
        if flush_due {
            summary.flushed = self.flush_dirty();
            summary.pruned = self.prune_strays(window.shape());
        }

        summary.ticks = lock(&self.clock).advance(now);
        Ok(summary)
    }

    /// Re-queues without blocking the tick; a full queue or an unreachable
    /// remote is retried next update.
    fn requeue(&self, chunk: &Arc<Chunk>) -> Result<bool, WorldError> {
        match &self.source {
            Source::Local { queue, .. } => Ok(queue.try_enqueue(chunk)?),
            Source::Remote { requester } => match self.request_chunk(requester.as_ref(), chunk) {
                Ok(sent) => Ok(sent),
                Err(WorldError::Request(e)) => {
                    log::warn!(target: "stream", "re-request of {} failed: {}", chunk.coord(), e);
                    Ok(false)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Saves every tracked chunk with unsaved edits; returns how many saved.
    pub fn flush_dirty(&self) -> usize {
        let dirty: Vec<_> = self
            .lock_index()
            .snapshot()
            .into_iter()
            .filter(|c| c.is_dirty())
            .collect();
        let shared = &*self.shared;
        dirty
            .par_iter()
            .filter(|c| persist_chunk(shared, c).is_ok())
            .count()
    }

    /// Game ticks elapsed since the world was opened.
    pub fn game_time(&self) -> u64 {
        lock(&self.clock).game_time
    }

    pub fn queue_len(&self) -> usize {
        match &self.source {
            Source::Local { queue, .. } => queue.len(),
            Source::Remote { .. } => 0,
        }
    }

    pub fn stats(&self) -> WorldStats {
        let (known, loaded) = {
            let index = self.lock_index();
            let chunks = index.snapshot();
            (chunks.len(), chunks.iter().filter(|c| c.is_loaded()).count())
        };
        let inflight = match &self.source {
            Source::Local { workers, .. } => workers.inflight(),
            Source::Remote { .. } => 0,
        };
        let c = &self.shared.counters;
        WorldStats {
            known,
            windowed: self.window().chunks().len(),
            loaded,
            queued: self.queue_len(),
            inflight,
            generated: c.generated.load(Ordering::Relaxed),
            generation_failures: c.generation_failures.load(Ordering::Relaxed),
            persist_failures: c.persist_failures.load(Ordering::Relaxed),
            unloaded: c.unloaded.load(Ordering::Relaxed),
            requests: c.requests.load(Ordering::Relaxed),
            game_time: self.game_time(),
            meta: self.shared.metas.stats(),
        }
    }

    // ---- shutdown ----

    /// Stops the workers and writes every loaded or edited chunk to the
    /// store. Queued work is discarded. Subsequent calls do nothing; every
    /// other operation fails with `WorldError::Closed` afterwards.
    pub fn cleanup(&self) -> Result<CleanupSummary, WorldError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(CleanupSummary::default());
        }
        let t0 = Instant::now();
        let mut summary = CleanupSummary::default();
        if let Source::Local { queue, workers } = &self.source {
            queue.close();
            workers.join();
            for chunk in queue.drain() {
                if chunk.try_transition(ChunkState::Queued, ChunkState::Ungenerated) {
                    summary.dequeued += 1;
                }
            }
        }
        for _ in self.reports_rx.try_iter() {}

        let chunks = self.lock_index().drain();
        self.publish_window(VisibleWindow::empty());
        let shared = &*self.shared;
        let pending: Vec<_> = chunks
            .iter()
            .filter(|c| c.is_loaded() || c.is_dirty())
            .collect();
        let failed: Vec<ChunkCoord> = pending
            .par_iter()
            .filter_map(|c| persist_chunk(shared, c).err().map(|_| c.coord()))
            .collect();
        for chunk in &chunks {
            chunk.begin_unload();
        }
        summary.flushed = pending.len() - failed.len();
        summary.elapsed_ms = t0.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        log::info!(
            target: "stream",
            "world closed: {} chunk(s) flushed, {} failed, {} dequeued in {}ms",
            summary.flushed,
            failed.len(),
            summary.dequeued,
            summary.elapsed_ms
        );
        if failed.is_empty() {
            Ok(summary)
        } else {
            Err(WorldError::Unflushed(failed))
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.cleanup() {
                log::error!(target: "stream", "cleanup on drop: {}", e);
            }
        }
    }
}
