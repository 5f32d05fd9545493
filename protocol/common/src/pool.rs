//! Fixed-capacity object pools for message carriers.

/// A fixed-capacity free pool.
///
/// The pool is filled at construction; [`take`](Pool::take) pops a free
/// object and returns `None` on exhaustion, which the caller surfaces as a
/// server error rather than allocating past the configured bound.
pub struct Pool<T> {
    free: Vec<T>,
    capacity: usize,
}

impl<T: Default> Pool<T> {
    /// Create a pool holding `capacity` pre-constructed objects.
    pub fn new(capacity: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        free.resize_with(capacity, T::default);
        Self { free, capacity }
    }

    /// Pop a free object, or `None` when the pool is exhausted.
    pub fn take(&mut self) -> Option<T> {
        self.free.pop()
    }

    /// Return an object to the pool.
    ///
    /// The caller resets the object first; objects returned beyond capacity
    /// (which cannot happen through normal take/put pairing) are dropped.
    pub fn put(&mut self, obj: T) {
        if self.free.len() < self.capacity {
            self.free.push(obj);
        }
    }

    /// Number of free objects.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
