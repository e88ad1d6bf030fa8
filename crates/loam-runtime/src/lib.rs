//! Chunk streaming: chunk lifecycle, generation workers, the visible window
//! and the `World` that ties them to a chunk store.
#![forbid(unsafe_code)]

pub mod chunk;
mod error;
pub mod index;
pub mod queue;
mod remote;
pub mod window;
mod workers;
mod world;

pub use chunk::{Chunk, ChunkState, RenderHandle};
pub use error::WorldError;
pub use index::{ChunkIndex, StaleEntry};
pub use queue::{GenerationQueue, QueueError};
pub use remote::{ChunkRequester, RequestError};
pub use window::{VisibleWindow, WindowShape, anchor_max};
pub use workers::{GenOutcome, GenReport, PERSIST_FAILURE_ALERT};
pub use world::{CleanupSummary, MAX_LOOKUP_ATTEMPTS, SeekSummary, UpdateSummary, World, WorldStats};
