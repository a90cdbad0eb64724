use parking_lot::Mutex;

/// A maximum a caller may request for a single buffer, independent of how
/// much memory the host actually has. Keeps `start(buffer_size)` from
/// accepting an allocation request that would be pathological.
pub const MAX_CAPACITY: usize = 36_000_000;

struct Inner<T> {
    timestamps: Vec<f64>,
    values: Vec<Option<T>>,
    capacity: usize,
    first_used: usize,
    first_free: usize,
    count: usize,
}

impl<T: Clone> Inner<T> {
    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity
    }

    fn add(&mut self, ts: f64, value: T) {
        self.timestamps[self.first_free] = ts;
        self.values[self.first_free] = Some(value);
        self.first_free = self.next(self.first_free);
        self.count += 1;
        if self.count > self.capacity {
            self.first_used = self.next(self.first_used);
            self.count = self.capacity;
        }
    }

    fn chunk(&self, start: usize, len: usize) -> (Vec<f64>, Vec<T>) {
        let mut ts = Vec::with_capacity(len);
        let mut vs = Vec::with_capacity(len);
        for i in 0..len {
            let idx = (start + i) % self.capacity;
            ts.push(self.timestamps[idx]);
            vs.push(self.values[idx].clone().expect("occupied slot holds a value"));
        }
        (ts, vs)
    }
}

/// Fixed-capacity, overwrite-on-full time series of `(timestamp, T)` pairs.
///
/// All five operations serialize on a single lock, matching the original
/// single-critical-section design: there is never a window where `count()`
/// disagrees with what `drain`/`peek_tail` would observe.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// `capacity` must be > 0 and is clamped to `MAX_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                timestamps: vec![0.0; capacity],
                values: (0..capacity).map(|_| None).collect(),
                capacity,
                first_used: 0,
                first_free: 0,
                count: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `(ts, value)`, overwriting the oldest entry if full. Never fails.
    pub fn add(&self, ts: f64, value: T) {
        self.inner.lock().add(ts, value);
    }

    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    /// Removes and returns up to `max` oldest entries, in FIFO order.
    pub fn drain(&self, max: usize) -> (Vec<f64>, Vec<T>) {
        let mut inner = self.inner.lock();
        let n = max.min(inner.count);
        if n == 0 {
            return (Vec::new(), Vec::new());
        }
        let (ts, vs) = inner.chunk(inner.first_used, n);
        inner.first_used = (inner.first_used + n) % inner.capacity;
        inner.count -= n;
        (ts, vs)
    }

    /// Returns up to `max` most-recent entries, oldest-of-that-suffix first,
    /// without removing them.
    pub fn peek_tail(&self, max: usize) -> (Vec<f64>, Vec<T>) {
        let inner = self.inner.lock();
        let n = max.min(inner.count);
        if n == 0 {
            return (Vec::new(), Vec::new());
        }
        let start = (inner.first_used + (inner.count - n)) % inner.capacity;
        inner.chunk(start, n)
    }

    /// `(count - 1) / (newest_ts - oldest_ts)`, or 0 if fewer than two entries.
    /// Computed and returned entirely under the lock — the original's
    /// equivalent has an early-return-before-unlock path; that is not
    /// reproduced here.
    pub fn rate(&self) -> f32 {
        let inner = self.inner.lock();
        if inner.count > 1 {
            let first_ts = inner.timestamps[inner.first_used];
            let last_idx = (inner.first_used + inner.count - 1) % inner.capacity;
            let last_ts = inner.timestamps[last_idx];
            ((inner.count - 1) as f64 / (last_ts - first_ts)) as f32
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_tracks_inserts_up_to_capacity() {
        let rb = RingBuffer::new(3);
        assert_eq!(rb.count(), 0);
        rb.add(1.0, 'a');
        rb.add(2.0, 'b');
        assert_eq!(rb.count(), 2);
        rb.add(3.0, 'c');
        rb.add(4.0, 'd');
        assert_eq!(rb.count(), 3);
    }

    #[test]
    fn overwrite_drops_oldest_first() {
        let rb = RingBuffer::new(3);
        rb.add(1.0, 'a');
        rb.add(2.0, 'b');
        rb.add(3.0, 'c');
        rb.add(4.0, 'd');
        let (ts, vs) = rb.drain(usize::MAX);
        assert_eq!(ts, vec![2.0, 3.0, 4.0]);
        assert_eq!(vs, vec!['b', 'c', 'd']);
        assert_eq!(rb.count(), 0);
    }

    #[test]
    fn peek_tail_does_not_remove() {
        let rb = RingBuffer::new(3);
        rb.add(1.0, 'a');
        rb.add(2.0, 'b');
        rb.add(3.0, 'c');
        rb.add(4.0, 'd');

        let (ts, vs) = rb.peek_tail(2);
        assert_eq!(ts, vec![3.0, 4.0]);
        assert_eq!(vs, vec!['c', 'd']);
        assert_eq!(rb.count(), 3);

        let (ts2, vs2) = rb.peek_tail(2);
        assert_eq!(ts2, ts);
        assert_eq!(vs2, vs);

        let (ts3, vs3) = rb.drain(usize::MAX);
        assert_eq!(ts3, vec![2.0, 3.0, 4.0]);
        assert_eq!(vs3, vec!['b', 'c', 'd']);
    }

    #[test]
    fn zero_max_returns_nothing() {
        let rb = RingBuffer::new(4);
        rb.add(1.0, 'a');
        let (ts, vs) = rb.drain(0);
        assert!(ts.is_empty() && vs.is_empty());
        let (ts, vs) = rb.peek_tail(0);
        assert!(ts.is_empty() && vs.is_empty());
        assert_eq!(rb.count(), 1);
    }

    #[test]
    fn rate_is_zero_below_two_entries() {
        let rb = RingBuffer::new(4);
        assert_eq!(rb.rate(), 0.0);
        rb.add(1.0, 'a');
        assert_eq!(rb.rate(), 0.0);
    }

    #[test]
    fn rate_over_window() {
        let rb = RingBuffer::new(4);
        rb.add(0.0, 'a');
        rb.add(1.0, 'b');
        rb.add(2.0, 'c');
        // 2 intervals over 2.0 seconds => 1.0 entries/sec
        assert_eq!(rb.rate(), 1.0);
    }

    #[test]
    fn capacity_is_clamped_to_max() {
        let rb: RingBuffer<u8> = RingBuffer::new(MAX_CAPACITY + 10);
        assert_eq!(rb.capacity(), MAX_CAPACITY);
        let rb: RingBuffer<u8> = RingBuffer::new(0);
        assert_eq!(rb.capacity(), 1);
    }
}
