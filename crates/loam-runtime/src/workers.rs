use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};
use loam_store::{ChunkStore, StoreError};
use loam_world::{Block, ChunkCoord, GenContext, GenError, MetaChunkStore, TerrainGenerator};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::chunk::{Chunk, ChunkState, empty_blocks};
use crate::error::WorldError;
use crate::queue::GenerationQueue;

/// Consecutive failed saves of one chunk before it is reported as an error.
pub const PERSIST_FAILURE_ALERT: u32 = 3;

#[derive(Default)]
pub(crate) struct Counters {
    pub generated: AtomicU64,
    pub generation_failures: AtomicU64,
    pub persist_failures: AtomicU64,
    pub unloaded: AtomicU64,
    pub requests: AtomicU64,
}

/// State shared by the world and every generation worker.
pub(crate) struct Shared {
    pub seed: i64,
    pub store: Arc<dyn ChunkStore>,
    pub generator: Arc<dyn TerrainGenerator>,
    pub metas: MetaChunkStore,
    pub counters: Counters,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenOutcome {
    Loaded,
    /// Loaded, but the first save failed; the chunk stays dirty.
    PersistFailed,
    /// The chunk went back to `Ungenerated`.
    GenerationFailed,
}

/// Result of one finished chunk, drained by `World::update`.
#[derive(Clone, Debug)]
pub struct GenReport {
    pub coord: ChunkCoord,
    pub chunk_id: u64,
    pub outcome: GenOutcome,
    pub error: Option<String>,
    pub detached: bool,
    pub t_total_ms: u32,
    pub t_meta_ms: u32,
    pub t_gen_ms: u32,
    pub t_persist_ms: u32,
}

#[inline]
fn elapsed_ms(t0: Instant) -> u32 {
    t0.elapsed().as_millis().min(u128::from(u32::MAX)) as u32
}

fn generate_blocks(
    shared: &Shared,
    coord: ChunkCoord,
    t_meta_ms: &mut u32,
) -> Result<Box<[Block]>, GenError> {
    // Both tile and chunk generation run user code; a panic in either must
    // not unwind into the pool.
    match panic::catch_unwind(AssertUnwindSafe(|| run_generator(shared, coord, t_meta_ms))) {
        Ok(res) => res,
        Err(_) => Err(GenError::Failed(format!("generator panicked on {}", coord))),
    }
}

fn run_generator(
    shared: &Shared,
    coord: ChunkCoord,
    t_meta_ms: &mut u32,
) -> Result<Box<[Block]>, GenError> {
    let t0 = Instant::now();
    let meta = shared.metas.get(coord.tile())?;
    *t_meta_ms = elapsed_ms(t0);
    let ctx = GenContext {
        seed: shared.seed,
        coord,
        meta: meta.as_ref(),
    };
    let mut blocks = empty_blocks();
    shared.generator.generate_chunk(&ctx, &mut blocks)?;
    Ok(blocks)
}

pub(crate) fn note_persist_failure(chunk: &Chunk, shared: &Shared, e: &StoreError) {
    shared.counters.persist_failures.fetch_add(1, Ordering::Relaxed);
    let failures = chunk.persist_failures();
    if failures >= PERSIST_FAILURE_ALERT {
        log::error!(
            target: "stream",
            "chunk {} failed to persist {} times in a row: {}",
            chunk.coord(),
            failures,
            e
        );
    } else {
        log::warn!(target: "stream", "chunk {} not persisted: {}", chunk.coord(), e);
    }
}

/// Installs `blocks` into a chunk that is `Generating` and persists it.
pub(crate) fn finish_chunk(
    chunk: &Chunk,
    blocks: Box<[Block]>,
    shared: &Shared,
) -> (GenOutcome, Option<String>, u32) {
    let t0 = Instant::now();
    let res = chunk.finish_generation(blocks, |rec| shared.store.save(rec));
    let t_persist_ms = elapsed_ms(t0);
    shared.counters.generated.fetch_add(1, Ordering::Relaxed);
    match res {
        Ok(()) => (GenOutcome::Loaded, None, t_persist_ms),
        Err(e) => {
            note_persist_failure(chunk, shared, &e);
            (GenOutcome::PersistFailed, Some(e.to_string()), t_persist_ms)
        }
    }
}

/// Generates a chunk the caller has moved to `Generating`.
pub(crate) fn process_job(chunk: &Chunk, shared: &Shared) -> GenReport {
    let t_job_start = Instant::now();
    let coord = chunk.coord();
    let mut t_meta_ms = 0;
    let t0 = Instant::now();
    let generated = generate_blocks(shared, coord, &mut t_meta_ms);
    let t_gen_ms = elapsed_ms(t0).saturating_sub(t_meta_ms);

    let (outcome, error, t_persist_ms) = match generated {
        Ok(blocks) => finish_chunk(chunk, blocks, shared),
        Err(e) => {
            chunk.try_transition(ChunkState::Generating, ChunkState::Ungenerated);
            shared
                .counters
                .generation_failures
                .fetch_add(1, Ordering::Relaxed);
            log::warn!(target: "gen", "chunk {} generation failed: {}", coord, e);
            (GenOutcome::GenerationFailed, Some(e.to_string()), 0)
        }
    };
    let detached = chunk.is_detached();
    if detached {
        log::debug!(target: "gen", "chunk {} finished after leaving the world", coord);
    }
    GenReport {
        coord,
        chunk_id: chunk.id(),
        outcome,
        error,
        detached,
        t_total_ms: elapsed_ms(t_job_start),
        t_meta_ms,
        t_gen_ms,
        t_persist_ms,
    }
}

/// Fixed pool of threads pulling from the generation queue.
pub(crate) struct GenerationWorkers {
    _pool: ThreadPool,
    done_rx: Receiver<()>,
    inflight: Arc<AtomicUsize>,
    count: usize,
}

impl GenerationWorkers {
    pub fn spawn(
        count: usize,
        shared: Arc<Shared>,
        queue: Arc<GenerationQueue>,
        reports: Sender<GenReport>,
    ) -> Result<Self, WorldError> {
        let count = count.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(count)
            .thread_name(|i| format!("loam-gen-{i}"))
            .build()
            .map_err(|e| WorldError::Spawn(e.to_string()))?;
        // Each worker holds a sender; the channel disconnects once all exit.
        let (done_tx, done_rx) = bounded::<()>(0);
        let inflight = Arc::new(AtomicUsize::new(0));
        for _ in 0..count {
            let done_tx = done_tx.clone();
            let shared = Arc::clone(&shared);
            let queue = Arc::clone(&queue);
            let reports = reports.clone();
            let inflight = Arc::clone(&inflight);
            pool.spawn(move || {
                let _done = done_tx;
                while let Ok(chunk) = queue.take() {
                    if !chunk.try_transition(ChunkState::Queued, ChunkState::Generating) {
                        log::trace!(target: "gen", "skip {}: {:?}", chunk.coord(), chunk.state());
                        continue;
                    }
                    inflight.fetch_add(1, Ordering::Relaxed);
                    let report = process_job(&chunk, &shared);
                    inflight.fetch_sub(1, Ordering::Relaxed);
                    let _ = reports.send(report);
                }
            });
        }
        log::debug!(target: "gen", "started {} generation workers", count);
        Ok(Self {
            _pool: pool,
            done_rx,
            inflight,
            count,
        })
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Waits for every worker to leave its loop. The queue must be closed.
    pub fn join(&self) {
        while self.done_rx.recv().is_ok() {}
    }
}
