use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use hashbrown::HashSet;

use crate::chunk::{Chunk, ChunkState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was shut down; nothing more is accepted or handed out.
    Closed,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Closed => write!(f, "generation queue is shut down"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Bounded, de-duplicating FIFO of chunks awaiting generation.
///
/// A chunk is admitted only by moving it `Ungenerated -> Queued`, and at most
/// once until a worker takes it. Producers block while the queue is full;
/// closing the queue wakes every blocked producer and consumer with
/// `QueueError::Closed`.
pub struct GenerationQueue {
    tx: Sender<Arc<Chunk>>,
    rx: Receiver<Arc<Chunk>>,
    members: Mutex<HashSet<u64>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    closed: AtomicBool,
    capacity: usize,
}

impl GenerationQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Self {
            tx,
            rx,
            members: Mutex::new(HashSet::new()),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    fn members(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queues `chunk` for generation, blocking while the queue is full.
    ///
    /// `Ok(false)` when the chunk is already queued or not `Ungenerated`.
    pub fn enqueue(&self, chunk: &Arc<Chunk>) -> Result<bool, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        {
            let mut members = self.members();
            if members.contains(&chunk.id()) {
                return Ok(false);
            }
            if !chunk.try_transition(ChunkState::Ungenerated, ChunkState::Queued) {
                return Ok(false);
            }
            members.insert(chunk.id());
        }
        let sent = select! {
            send(self.tx, Arc::clone(chunk)) -> res => res.is_ok(),
            recv(self.shutdown_rx) -> _ => false,
        };
        if sent {
            Ok(true)
        } else {
            self.members().remove(&chunk.id());
            chunk.try_transition(ChunkState::Queued, ChunkState::Ungenerated);
            Err(QueueError::Closed)
        }
    }

    /// Like `enqueue`, but `Ok(false)` instead of blocking when full.
    pub fn try_enqueue(&self, chunk: &Arc<Chunk>) -> Result<bool, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let mut members = self.members();
        if members.contains(&chunk.id()) {
            return Ok(false);
        }
        if !chunk.try_transition(ChunkState::Ungenerated, ChunkState::Queued) {
            return Ok(false);
        }
        match self.tx.try_send(Arc::clone(chunk)) {
            Ok(()) => {
                members.insert(chunk.id());
                Ok(true)
            }
            Err(TrySendError::Full(_)) => {
                chunk.try_transition(ChunkState::Queued, ChunkState::Ungenerated);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => {
                chunk.try_transition(ChunkState::Queued, ChunkState::Ungenerated);
                Err(QueueError::Closed)
            }
        }
    }

    /// Blocks until a chunk is available. Shutdown wins over pending work.
    pub fn take(&self) -> Result<Arc<Chunk>, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let chunk = select! {
            recv(self.rx) -> msg => msg.map_err(|_| QueueError::Closed)?,
            recv(self.shutdown_rx) -> _ => return Err(QueueError::Closed),
        };
        self.members().remove(&chunk.id());
        Ok(chunk)
    }

    /// Rejects further work and wakes everything blocked on the queue.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Removes whatever is still queued, for callers tearing the queue down.
    pub fn drain(&self) -> Vec<Arc<Chunk>> {
        let drained: Vec<_> = self.rx.try_iter().collect();
        let mut members = self.members();
        for chunk in &drained {
            members.remove(&chunk.id());
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_world::ChunkCoord;
    use std::thread;
    use std::time::Duration;

    fn chunk(id: u64) -> Arc<Chunk> {
        Arc::new(Chunk::new(id, ChunkCoord::new(id as i32, 0, 0), Vec::new()))
    }

    #[test]
    fn duplicates_are_rejected() {
        let q = GenerationQueue::new(4);
        let c = chunk(1);
        assert_eq!(q.enqueue(&c), Ok(true));
        assert_eq!(q.enqueue(&c), Ok(false));
        assert_eq!(q.len(), 1);
        let taken = q.take().unwrap();
        assert_eq!(taken.id(), 1);
        // Still `Queued` until a worker claims it, so it cannot re-enter.
        assert_eq!(q.enqueue(&c), Ok(false));
    }

    #[test]
    fn fifo_order() {
        let q = GenerationQueue::new(8);
        let chunks: Vec<_> = (0..5).map(chunk).collect();
        for c in &chunks {
            q.enqueue(c).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.take().unwrap().id(), i);
        }
    }

    #[test]
    fn try_enqueue_does_not_block_when_full() {
        let q = GenerationQueue::new(1);
        let a = chunk(1);
        let b = chunk(2);
        assert_eq!(q.try_enqueue(&a), Ok(true));
        assert_eq!(q.try_enqueue(&b), Ok(false));
        assert_eq!(b.state(), ChunkState::Ungenerated);
        assert_eq!(q.take().unwrap().id(), 1);
        assert_eq!(q.try_enqueue(&b), Ok(true));
    }

    #[test]
    fn close_wakes_blocked_producer() {
        let q = Arc::new(GenerationQueue::new(1));
        q.enqueue(&chunk(1)).unwrap();
        let blocked = chunk(2);
        let producer = {
            let q = Arc::clone(&q);
            let blocked = Arc::clone(&blocked);
            thread::spawn(move || q.enqueue(&blocked))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(producer.join().unwrap(), Err(QueueError::Closed));
        assert_eq!(blocked.state(), ChunkState::Ungenerated);
        assert_eq!(q.take().unwrap_err(), QueueError::Closed);
        assert_eq!(q.drain().len(), 1);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let q = Arc::new(GenerationQueue::new(2));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.take().map(|c| c.id()))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(consumer.join().unwrap(), Err(QueueError::Closed));
        assert_eq!(q.enqueue(&chunk(3)), Err(QueueError::Closed));
    }
}
