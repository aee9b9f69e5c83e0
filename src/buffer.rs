//! Memory limited run buffer.

use crate::record::Record;

/// Default memory budget of a run: 100 MiB.
pub const DEFAULT_BUFFER_LIMIT: u64 = 100 * 1024 * 1024;

/// Builder of [`MemoryLimitedBuffer`]s sharing the same byte budget.
#[derive(Clone, Copy, Debug)]
pub struct MemoryLimitedBufferBuilder {
    buffer_limit: u64,
}

impl MemoryLimitedBufferBuilder {
    /// Creates a buffer builder.
    ///
    /// # Arguments
    /// * `buffer_limit` - Memory budget in bytes; a buffer is full once one more record would not fit
    pub fn new(buffer_limit: u64) -> Self {
        MemoryLimitedBufferBuilder { buffer_limit }
    }

    pub fn buffer_limit(&self) -> u64 {
        self.buffer_limit
    }

    /// Returns how many records of type `T` fit into the budget.
    pub fn capacity<T: Record>(&self) -> u64 {
        self.buffer_limit / T::WIDTH as u64
    }

    /// Builds a buffer with room for exactly [`MemoryLimitedBufferBuilder::capacity`] records, so the allocation
    /// never grows past the budget.
    pub fn build<T: Record>(&self) -> MemoryLimitedBuffer<T> {
        MemoryLimitedBuffer::with_capacity(self.buffer_limit, self.capacity::<T>() as usize)
    }
}

impl Default for MemoryLimitedBufferBuilder {
    fn default() -> Self {
        MemoryLimitedBufferBuilder::new(DEFAULT_BUFFER_LIMIT)
    }
}

/// Buffer limited by consumed memory.
///
/// Memory is accounted as `len * T::WIDTH`, which is exact for fixed-width records.
pub struct MemoryLimitedBuffer<T> {
    limit: u64,
    current_size: u64,
    inner: Vec<T>,
}

impl<T: Record> MemoryLimitedBuffer<T> {
    pub fn with_capacity(limit: u64, capacity: usize) -> Self {
        MemoryLimitedBuffer {
            limit,
            current_size: 0,
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Adds a new record to the buffer.
    pub fn push(&mut self, item: T) {
        self.current_size += T::WIDTH as u64;
        self.inner.push(item);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn mem_size(&self) -> u64 {
        self.current_size
    }

    /// Checks if the buffer reached the limit, i.e. one more record would exceed it.
    pub fn is_full(&self) -> bool {
        self.current_size + T::WIDTH as u64 > self.limit
    }

    /// Sorts buffered records in ascending order.
    pub fn sort(&mut self) {
        // records are plain keys, equal ones are indistinguishable
        self.inner.sort_unstable();
    }

    pub fn as_slice(&self) -> &[T] {
        self.inner.as_slice()
    }

    /// Empties the buffer keeping its allocation for the next run.
    pub fn clear(&mut self) {
        self.inner.clear();
        self.current_size = 0;
    }
}
