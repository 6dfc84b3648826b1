/// Fixed-capacity circular buffer.
///
/// Not synchronized; wrap in `Arc<parking_lot::Mutex<RingBuffer<T>>>` for
/// cross-thread access (see `FeedBuffer`).
///
/// Overflow behavior: drops the oldest elements.
#[derive(Debug)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![T::default(); capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
        }
    }

    /// Write elements into the ring buffer.
    ///
    /// If the buffer overflows, the oldest elements are dropped.
    /// If `items` is larger than capacity, only the last `capacity` elements are kept.
    /// Returns the number of elements dropped.
    pub fn write(&mut self, items: &[T]) -> usize {
        if items.is_empty() {
            return 0;
        }

        let mut dropped = 0;
        let items = if items.len() > self.capacity {
            dropped += items.len() - self.capacity;
            &items[items.len() - self.capacity..]
        } else {
            items
        };

        let overflow = (self.available + items.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
            dropped += overflow;
        }

        // Two contiguous copies at most.
        let first = items.len().min(self.capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&items[..first]);
        let rest = items.len() - first;
        if rest > 0 {
            self.buffer[..rest].copy_from_slice(&items[first..]);
        }
        self.write_index = (self.write_index + items.len()) % self.capacity;
        self.available += items.len();
        dropped
    }

    /// Read and remove up to `count` elements.
    ///
    /// Returns fewer elements if fewer are available.
    pub fn read(&mut self, count: usize) -> Vec<T> {
        let mut result = vec![T::default(); count.min(self.available)];
        let read = self.read_into(&mut result);
        result.truncate(read);
        result
    }

    /// Move up to `out.len()` elements into `out`, returning how many were moved.
    pub fn read_into(&mut self, out: &mut [T]) -> usize {
        let to_read = out.len().min(self.available);
        if to_read == 0 {
            return 0;
        }

        let first = to_read.min(self.capacity - self.read_index);
        out[..first].copy_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        let rest = to_read - first;
        if rest > 0 {
            out[first..to_read].copy_from_slice(&self.buffer[..rest]);
        }
        self.read_index = (self.read_index + to_read) % self.capacity;
        self.available -= to_read;
        to_read
    }

    /// Drop up to `count` of the oldest elements, returning how many were dropped.
    pub fn discard(&mut self, count: usize) -> usize {
        let count = count.min(self.available);
        self.read_index = (self.read_index + count) % self.capacity;
        self.available -= count;
        count
    }

    /// Number of elements currently available for reading.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Reset the buffer to empty state.
    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
