use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::{Receiver, Sender, unbounded};
use loam_runtime::{ChunkRequester, RequestError, World};
use loam_store::{ChunkStore, DirChunkStore, MemoryChunkStore};
use loam_world::{
    Block, CHUNK_VOLUME, ChunkCoord, GenContext, MetaChunkStore, NoiseTerrain, TerrainGenerator,
    WorldConfig, load_config_from_path,
};

const FRAME: Duration = Duration::from_millis(16);
const STATS_EVERY: u32 = 50;

/// Walks an observer through a generated world, streaming chunks around it.
#[derive(Parser, Debug)]
#[command(name = "loam", version, about)]
struct Args {
    /// TOML world configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Persist chunks under this directory (in-memory when absent)
    #[arg(long)]
    save_dir: Option<PathBuf>,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    render_distance: Option<i32>,
    #[arg(long, default_value_t = 300)]
    ticks: u32,
    /// Blocks walked per tick
    #[arg(long, default_value_t = 3)]
    step: i32,
    /// Fetch chunks through a loopback "server" thread instead of local workers
    #[arg(long)]
    remote_echo: bool,
}

struct EchoRequester {
    tx: Sender<ChunkCoord>,
}

impl ChunkRequester for EchoRequester {
    fn send_request(&self, coord: ChunkCoord) -> Result<(), RequestError> {
        self.tx
            .send(coord)
            .map_err(|e| RequestError(e.to_string()))
    }
}

/// Answers chunk requests the way a server would: generate, then reply.
fn spawn_echo_server(
    seed: i64,
    requests: Receiver<ChunkCoord>,
    replies: Sender<(ChunkCoord, Vec<Block>)>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("loam-echo".into())
        .spawn(move || {
            let terrain: Arc<dyn TerrainGenerator> = Arc::new(NoiseTerrain::default());
            let metas = MetaChunkStore::new(seed, Arc::clone(&terrain), 16, 2);
            while let Ok(coord) = requests.recv() {
                let meta = match metas.get(coord.tile()) {
                    Ok(meta) => meta,
                    Err(e) => {
                        log::warn!(target: "gen", "echo: tile for {}: {}", coord, e);
                        continue;
                    }
                };
                let ctx = GenContext {
                    seed,
                    coord,
                    meta: meta.as_ref(),
                };
                let mut blocks = vec![Block::AIR; CHUNK_VOLUME];
                if let Err(e) = terrain.generate_chunk(&ctx, &mut blocks) {
                    log::warn!(target: "gen", "echo: chunk {}: {}", coord, e);
                    continue;
                }
                if replies.send((coord, blocks)).is_err() {
                    break;
                }
            }
        })
}

fn load_config(args: &Args) -> Result<WorldConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => WorldConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(rd) = args.render_distance {
        config.render_distance = rd;
    }
    Ok(config)
}

fn log_stats(world: &World, tick: u32) {
    let s = world.stats();
    log::info!(
        "tick {} (game time {}): known={} windowed={} loaded={} queued={} inflight={} generated={} failed={} unsaved={} | meta live={}/{} hit rate {:.0}%",
        tick,
        s.game_time,
        s.known,
        s.windowed,
        s.loaded,
        s.queued,
        s.inflight,
        s.generated,
        s.generation_failures,
        s.persist_failures,
        s.meta.live,
        s.meta.capacity,
        s.meta.cache.hit_rate() * 100.0
    );
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;
    let rd = config.render_distance();

    let store: Arc<dyn ChunkStore> = match &args.save_dir {
        Some(dir) => Arc::new(DirChunkStore::open(dir)?),
        None => Arc::new(MemoryChunkStore::new()),
    };
    let terrain: Arc<dyn TerrainGenerator> = Arc::new(NoiseTerrain::default());

    let (reply_tx, reply_rx) = unbounded::<(ChunkCoord, Vec<Block>)>();
    let mut echo_server = None;
    let world = if args.remote_echo {
        let (req_tx, req_rx) = unbounded();
        let world = World::open_remote(
            config,
            store,
            terrain,
            Arc::new(EchoRequester { tx: req_tx }),
        )?;
        echo_server = Some(spawn_echo_server(world.seed(), req_rx, reply_tx)?);
        world
    } else {
        World::open(config, store, terrain)?
    };
    log::info!("seed {} render distance {}", world.seed(), rd);

    let (mut x, y, mut z) = (0i32, 0i32, 0i32);
    let t0 = Instant::now();
    for tick in 0..args.ticks {
        x += args.step;
        // Drift sideways every few ticks so the walk is not axis-aligned.
        if tick % 4 == 0 {
            z += args.step / 2;
        }
        world.seek(x, y, z, rd)?;
        for (coord, blocks) in reply_rx.try_iter() {
            world.deliver_chunk(coord, blocks)?;
        }
        world.update(Instant::now())?;
        if tick % STATS_EVERY == 0 {
            log_stats(&world, tick);
        }
        thread::sleep(FRAME);
    }

    // Leave a marker where the walk ended.
    if !world.is_remote() {
        let chunk = world.generate_now(x, y, z)?;
        let change = world.set_block(x, y, z, Block::STONE)?;
        log::info!(
            "placed {:?} at ({}, {}, {}) in chunk {} (was {:?})",
            change.after,
            x,
            y,
            z,
            chunk.coord(),
            change.before
        );
    }

    log_stats(&world, args.ticks);
    let summary = world.cleanup()?;
    log::info!(
        "done in {:.1}s: {} chunk(s) flushed",
        t0.elapsed().as_secs_f32(),
        summary.flushed
    );
    drop(world);
    if let Some(server) = echo_server {
        let _ = server.join();
    }
    Ok(())
}
