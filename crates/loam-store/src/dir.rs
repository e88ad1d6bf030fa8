use std::fs;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use loam_world::{BlockChange, ChunkCoord};
use serde::{Deserialize, Serialize};

use crate::{ChunkRecord, ChunkStore, StoreError};

const LOCK_STRIPES: usize = 32;
const WORLD_FILE: &str = "world.toml";
const CHUNK_DIR: &str = "chunks";

#[derive(Serialize, Deserialize)]
struct WorldFile {
    seed: i64,
}

/// One TOML file per chunk under `<root>/chunks`, plus `<root>/world.toml`.
///
/// Writes to the same coordinate are serialized through a striped lock;
/// each write lands in a temp file that is renamed over the old one.
pub struct DirChunkStore {
    root: PathBuf,
    stripes: Vec<Mutex<()>>,
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl DirChunkStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let chunks = root.join(CHUNK_DIR);
        fs::create_dir_all(&chunks).map_err(|e| io_err(&chunks, e))?;
        log::debug!("chunk store opened at {}", root.display());
        Ok(Self {
            root,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, coord: ChunkCoord) -> PathBuf {
        self.root
            .join(CHUNK_DIR)
            .join(format!("c.{}.{}.{}.toml", coord.cx, coord.cy, coord.cz))
    }

    fn stripe(&self, coord: ChunkCoord) -> &Mutex<()> {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        coord.hash(&mut h);
        &self.stripes[(h.finish() % LOCK_STRIPES as u64) as usize]
    }

    fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| io_err(path, e))
    }
}

impl ChunkStore for DirChunkStore {
    fn load_overlay(&self, coord: ChunkCoord) -> Result<Vec<BlockChange>, StoreError> {
        let path = self.chunk_path(coord);
        let _held = self.stripe(coord).lock().unwrap_or_else(PoisonError::into_inner);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path, e)),
        };
        let record: ChunkRecord = toml::from_str(&text).map_err(|e| StoreError::Decode {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if record.coord != coord {
            return Err(StoreError::Decode {
                path,
                reason: format!("record is for chunk {}", record.coord),
            });
        }
        Ok(record.changes)
    }

    fn save(&self, record: &ChunkRecord) -> Result<(), StoreError> {
        let text = toml::to_string(record).map_err(|e| StoreError::Encode(e.to_string()))?;
        let path = self.chunk_path(record.coord);
        let _held = self
            .stripe(record.coord)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Self::write_atomic(&path, &text)
    }

    fn has_world_data(&self) -> bool {
        self.root.join(WORLD_FILE).is_file()
    }

    fn load_seed(&self) -> Result<i64, StoreError> {
        let path = self.root.join(WORLD_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::MissingWorldData),
            Err(e) => return Err(io_err(&path, e)),
        };
        let world: WorldFile = toml::from_str(&text).map_err(|e| StoreError::Decode {
            path,
            reason: e.to_string(),
        })?;
        Ok(world.seed)
    }

    fn save_seed(&self, seed: i64) -> Result<(), StoreError> {
        let text =
            toml::to_string(&WorldFile { seed }).map_err(|e| StoreError::Encode(e.to_string()))?;
        Self::write_atomic(&self.root.join(WORLD_FILE), &text)
    }
}
