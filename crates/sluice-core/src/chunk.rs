//! Stream chunks: the unit of data moving through a toxic chain.

use bytes::Bytes;
use tokio::time::Instant;

/// A slice of a TCP byte stream and the moment it was read off the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub data: Bytes,
    /// Arrival time. A stage that holds the chunk back advances this by
    /// exactly the delay it applied.
    pub timestamp: Instant,
}

impl StreamChunk {
    /// A chunk arriving now.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            timestamp: Instant::now(),
        }
    }

    pub fn with_timestamp(data: impl Into<Bytes>, timestamp: Instant) -> Self {
        Self {
            data: data.into(),
            timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
