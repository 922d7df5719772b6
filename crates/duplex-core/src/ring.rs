//! Byte-circular storage backing a channel
//!
//! Positions passed to `write_at`/`read_at` are relative to the current
//! front (`offset`). A copy touches at most two linear regions: up to the
//! end of the allocation, then from its start.

/// Circular byte buffer
pub struct RingBuffer {
    data: Box<[u8]>,
    /// Index of the first live byte
    offset: usize,
    /// Number of live bytes
    used: usize,
}

impl RingBuffer {
    /// Create an empty ring of `size` bytes
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "ring size must be > 0");
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            offset: 0,
            used: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.data.len() - self.used
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Physical index of a front-relative position
    #[inline]
    fn physical(&self, position: usize) -> usize {
        (self.offset + position) % self.data.len()
    }

    /// Copy `src` into the ring starting `position` bytes after the front.
    ///
    /// Does not change `used`; see `commit`.
    pub fn write_at(&mut self, position: usize, src: &[u8]) {
        debug_assert!(src.len() <= self.data.len());
        let start = self.physical(position);
        let first = src.len().min(self.data.len() - start);
        self.data[start..start + first].copy_from_slice(&src[..first]);
        let rest = src.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&src[first..]);
        }
    }

    /// Copy bytes starting `position` bytes after the front into `dst`
    pub fn read_at(&self, position: usize, dst: &mut [u8]) {
        debug_assert!(dst.len() <= self.data.len());
        let start = self.physical(position);
        let first = dst.len().min(self.data.len() - start);
        dst[..first].copy_from_slice(&self.data[start..start + first]);
        let rest = dst.len() - first;
        if rest > 0 {
            dst[first..].copy_from_slice(&self.data[..rest]);
        }
    }

    /// Account `amount` freshly written bytes at the tail
    #[inline]
    pub fn commit(&mut self, amount: usize) {
        debug_assert!(amount <= self.free());
        self.used += amount;
    }

    /// Drop `amount` bytes from the tail (undo of `commit`)
    #[inline]
    pub fn uncommit(&mut self, amount: usize) {
        debug_assert!(amount <= self.used);
        self.used -= amount;
    }

    /// Drop `amount` bytes from the front
    pub fn advance(&mut self, amount: usize) {
        debug_assert!(amount <= self.used);
        self.offset = self.physical(amount);
        self.used -= amount;
        if self.used == 0 {
            self.offset = 0;
        }
    }

    /// Reallocate to `new_size` bytes, laying live data out linearly from 0.
    ///
    /// `new_size` must hold every live byte.
    pub fn resize(&mut self, new_size: usize) {
        assert!(new_size >= self.used && new_size > 0);
        let mut fresh = vec![0u8; new_size].into_boxed_slice();
        self.read_at(0, &mut fresh[..self.used]);
        self.data = fresh;
        self.offset = 0;
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("size", &self.size())
            .field("offset", &self.offset)
            .field("used", &self.used)
            .finish()
    }
}
