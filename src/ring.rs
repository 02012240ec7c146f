use crate::error::EmptyBuffer;

pub const DEFAULT_CAPACITY: usize = 100;

/// Fixed-capacity circular buffer that overwrites its oldest element.
///
/// Used for the storer's bounded recent-activity windows: recent entries,
/// recent acceptance timestamps (for QPS) and recent destination files.
///
/// # Examples
///
/// ```
/// use logship::RingBuffer;
///
/// let mut ring = RingBuffer::new(3);
/// for x in 1..=5 {
///     ring.push(x);
/// }
/// assert_eq!(ring.size(), 3);
/// assert_eq!(ring.dump(), vec![3, 4, 5]);
/// assert_eq!(ring.peek_least_recent(), Ok(&3));
/// assert_eq!(ring.peek_most_recent(), Ok(&5));
/// ```
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    // Slot the next push writes to once the buffer has wrapped.
    next: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        RingBuffer {
            items: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    /// Append `item`, evicting the oldest element once the buffer is full.
    pub fn push(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            self.items[self.next] = item;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Number of logically present elements: 0 when empty, the capacity
    /// once wrapped.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let split = if self.items.len() < self.capacity {
            0
        } else {
            self.next
        };
        let (newer, older) = self.items.split_at(split);
        older.iter().chain(newer.iter())
    }

    pub fn peek_least_recent(&self) -> Result<&T, EmptyBuffer> {
        if self.items.is_empty() {
            return Err(EmptyBuffer("peek_least_recent"));
        }
        Ok(&self.items[self.next % self.items.len()])
    }

    pub fn peek_most_recent(&self) -> Result<&T, EmptyBuffer> {
        if self.items.is_empty() {
            return Err(EmptyBuffer("peek_most_recent"));
        }
        let len = self.items.len();
        Ok(&self.items[(self.next + len - 1) % len])
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy out the contents, oldest to newest.
    pub fn dump(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        RingBuffer::new(DEFAULT_CAPACITY)
    }
}
