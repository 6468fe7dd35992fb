use std::collections::HashMap;

use thiserror::Error;

pub type ChunkId = u64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocError {
    #[error("No free chunk can hold {size} bytes aligned to {alignment}.")]
    OutOfSpace { size: u64, alignment: u64 },
    #[error("Chunk {0} is not allocated.")]
    UnknownChunk(ChunkId),
}

struct MemoryChunk {
    size: u64,
    offset: u64,
    free: bool,
    prev: Option<ChunkId>,
    next: Option<ChunkId>,
}

/// First-fit sub-allocator over a single range of `size` bytes.
/// Chunks form a doubly linked list ordered by offset; the list
/// always covers the whole range without gaps.
pub struct SubAllocator {
    size: u64,
    chunks: HashMap<ChunkId, MemoryChunk>,
    head: ChunkId,
    id_counter: ChunkId,
    allocated: u64,
}

impl SubAllocator {
    pub fn new(size: u64) -> Self {
        let id = 1;
        let chunks = HashMap::from([(
            id,
            MemoryChunk {
                size,
                offset: 0,
                free: true,
                prev: None,
                next: None,
            },
        )]);

        Self {
            size,
            chunks,
            head: id,
            id_counter: id + 1,
            allocated: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes currently handed out, alignment padding included.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// Reserves `size` bytes at an offset that is a multiple of
    /// `alignment` (a power of two). Returns the chunk id used to
    /// free the range later, and the aligned offset.
    pub fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
    ) -> Result<(ChunkId, u64), AllocError> {
        let alignment = alignment.max(1);
        let (chunk_id, aligned_size, offset) = self
            .find_free_chunk(size, alignment)
            .ok_or(AllocError::OutOfSpace { size, alignment })?;

        let chunk = self
            .chunks
            .get_mut(&chunk_id)
            .ok_or(AllocError::UnknownChunk(chunk_id))?;

        // The allocation takes the front of the free chunk, the
        // padding in front of the aligned offset included. The
        // free chunk keeps what remains.
        let id = if chunk.size > aligned_size {
            let new_id = self.id_counter;
            self.id_counter += 1;

            let new_chunk = MemoryChunk {
                size: aligned_size,
                offset: chunk.offset,
                free: false,
                prev: chunk.prev,
                next: Some(chunk_id),
            };

            chunk.prev = Some(new_id);
            chunk.offset += aligned_size;
            chunk.size -= aligned_size;

            match new_chunk.prev {
                Some(prev_id) => {
                    if let Some(prev) = self.chunks.get_mut(&prev_id) {
                        prev.next = Some(new_id);
                    }
                }
                None => self.head = new_id,
            }

            self.chunks.insert(new_id, new_chunk);
            new_id
        } else {
            chunk.free = false;
            chunk_id
        };

        self.allocated += aligned_size;
        Ok((id, offset))
    }

    fn find_free_chunk(&self, size: u64, alignment: u64) -> Option<(ChunkId, u64, u64)> {
        let mut cursor = Some(self.head);

        while let Some(id) = cursor {
            let chunk = self.chunks.get(&id)?;

            if chunk.free {
                let offset = align_up(chunk.offset, alignment);
                let aligned_size = offset - chunk.offset + size;
                if aligned_size <= chunk.size {
                    return Some((id, aligned_size, offset));
                }
            }

            cursor = chunk.next;
        }

        None
    }

    /// Returns a chunk to the free list, merging it with free
    /// neighbours.
    pub fn free(&mut self, chunk_id: ChunkId) -> Result<(), AllocError> {
        let chunk = match self.chunks.get_mut(&chunk_id) {
            Some(chunk) if !chunk.free => chunk,
            _ => return Err(AllocError::UnknownChunk(chunk_id)),
        };

        chunk.free = true;
        self.allocated -= chunk.size;
        let (prev, next) = (chunk.prev, chunk.next);

        if let Some(next) = next.filter(|id| self.is_free(*id)) {
            self.merge_chunks(chunk_id, next);
        }
        if let Some(prev) = prev.filter(|id| self.is_free(*id)) {
            self.merge_chunks(prev, chunk_id);
        }

        Ok(())
    }

    fn is_free(&self, id: ChunkId) -> bool {
        self.chunks.get(&id).is_some_and(|c| c.free)
    }

    /// Folds the right chunk into the left one. Both must be free
    /// and adjacent.
    fn merge_chunks(&mut self, left: ChunkId, right: ChunkId) {
        let Some(right_chunk) = self.chunks.remove(&right) else {
            return;
        };

        if let Some(left_chunk) = self.chunks.get_mut(&left) {
            left_chunk.size += right_chunk.size;
            left_chunk.next = right_chunk.next;
        }

        if let Some(next) = right_chunk.next.and_then(|id| self.chunks.get_mut(&id)) {
            next.prev = Some(left);
        }
    }

    #[cfg(test)]
    fn free_ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges = Vec::new();
        let mut cursor = Some(self.head);
        while let Some(chunk) = cursor.and_then(|id| self.chunks.get(&id)) {
            if chunk.free {
                ranges.push((chunk.offset, chunk.size));
            }
            cursor = chunk.next;
        }
        ranges
    }
}

pub fn align_down(value: u64, alignment: u64) -> u64 {
    // Clearing the bits below the alignment (a power of two)
    // rounds down to the previous multiple.
    value & !(alignment - 1)
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    align_down(value + alignment - 1, alignment)
}
