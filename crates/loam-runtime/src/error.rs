use loam_store::StoreError;
use loam_world::{ChunkCoord, GenError};

use crate::queue::QueueError;
use crate::remote::RequestError;

#[derive(Debug)]
pub enum WorldError {
    /// The world was cleaned up; no further operations are accepted.
    Closed,
    /// Repeated lookups kept hitting stale index entries.
    IndexCorrupted { coord: ChunkCoord, attempts: u32 },
    Store(StoreError),
    Gen(GenError),
    Request(RequestError),
    /// Generation workers could not be started.
    Spawn(String),
    /// Operation needs local generation but chunks come from a remote source.
    RemoteSource,
    /// Chunks that could not be written during cleanup.
    Unflushed(Vec<ChunkCoord>),
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::Closed => write!(f, "world is shut down"),
            WorldError::IndexCorrupted { coord, attempts } => write!(
                f,
                "chunk index lookup for {} failed after {} attempts",
                coord, attempts
            ),
            WorldError::Store(e) => write!(f, "chunk store: {}", e),
            WorldError::Gen(e) => write!(f, "{}", e),
            WorldError::Request(e) => write!(f, "{}", e),
            WorldError::Spawn(e) => write!(f, "cannot start generation workers: {}", e),
            WorldError::RemoteSource => {
                write!(f, "chunks for this world are generated remotely")
            }
            WorldError::Unflushed(coords) => {
                write!(f, "{} chunk(s) could not be flushed", coords.len())?;
                if let Some(first) = coords.first() {
                    write!(f, " (first: {})", first)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for WorldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorldError::Store(e) => Some(e),
            WorldError::Gen(e) => Some(e),
            WorldError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for WorldError {
    fn from(e: StoreError) -> Self {
        WorldError::Store(e)
    }
}

impl From<GenError> for WorldError {
    fn from(e: GenError) -> Self {
        WorldError::Gen(e)
    }
}

impl From<RequestError> for WorldError {
    fn from(e: RequestError) -> Self {
        WorldError::Request(e)
    }
}

impl From<QueueError> for WorldError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Closed => WorldError::Closed,
        }
    }
}
