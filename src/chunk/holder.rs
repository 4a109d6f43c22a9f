//! Holder for the next operation a chunk source asks its sample source to perform.

use super::Chunk;

/// Holds a chunk operation, which consists of either:
///
/// 1. the number of media chunks that should be retained on the queue, together with the next
///    [`Chunk`] to load (which may be absent if the next chunk cannot be provided yet); or
/// 2. a flag indicating that the end of the stream has been reached.
#[derive(Debug, Default)]
pub struct ChunkOperationHolder {
    queue_size: usize,
    end_of_stream: bool,
    chunk: Option<Box<Chunk>>,
}

impl ChunkOperationHolder {
    pub fn clear(&mut self) {
        self.queue_size = 0;
        self.end_of_stream = false;
        self.chunk = None;
    }

    pub fn set_queue_size(&mut self, queue_size: usize) {
        self.queue_size = queue_size;
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn set_chunk(&mut self, chunk: Box<Chunk>) {
        self.chunk = Some(chunk);
    }

    pub fn clear_chunk(&mut self) {
        self.chunk = None;
    }

    /// Takes ownership of the held chunk (to move it into a queue, for example).
    pub fn take_chunk(&mut self) -> Option<Box<Chunk>> {
        self.chunk.take()
    }

    pub fn chunk(&self) -> Option<&Chunk> {
        self.chunk.as_deref()
    }

    pub fn chunk_mut(&mut self) -> Option<&mut Chunk> {
        self.chunk.as_deref_mut()
    }

    pub fn set_end_of_stream(&mut self, end_of_stream: bool) {
        self.end_of_stream = end_of_stream;
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}
