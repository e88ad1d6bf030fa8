use loam_world::ChunkCoord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError(pub String);

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk request failed: {}", self.0)
    }
}

impl std::error::Error for RequestError {}

/// Outbound side of a remote chunk source.
///
/// A world opened with a requester never generates chunks itself: queuing a
/// chunk sends a request, and the answer arrives later through
/// `World::deliver_chunk`.
pub trait ChunkRequester: Send + Sync {
    fn send_request(&self, coord: ChunkCoord) -> Result<(), RequestError>;
}
