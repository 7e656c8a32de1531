//! Shared queues between user threads and the core
//!
//! Both directions use the same construction: a mutex-guarded deque, a
//! flare toggled under that mutex, and atomic `pending`/`rate` counters.
//! The subscriber queue's flare signals "items available"; the publisher
//! queue's flare signals "free slots". A condvar on the opposite edge
//! wakes the internal worker.

use crate::flare::Flare;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Locked<T> {
    items: VecDeque<T>,
    signaled: bool,
    closed: bool,
}

impl<T> Locked<T> {
    fn new() -> Self {
        Self { items: VecDeque::new(), signaled: false, closed: false }
    }
}

fn sync_flare<T>(state: &mut Locked<T>, flare: &Flare, want: bool) {
    if want != state.signaled {
        if want {
            flare.fire(1);
        } else {
            flare.extinguish();
        }
        state.signaled = want;
    }
}

/// Shared counters every queue exposes.
#[derive(Default)]
struct Counters {
    /// Demand last communicated by the core (or the worker, depending on
    /// direction).
    pending: AtomicI64,
    /// Smoothed items-per-second estimate.
    rate: AtomicUsize,
}

// ==================== Subscriber side ====================

/// Bounded MPSC queue filled by the core, drained by user calls. The
/// flare is readable while items are waiting.
pub struct SharedSubscriberQueue<T> {
    state: Mutex<Locked<T>>,
    not_full: Condvar,
    flare: Flare,
    capacity: usize,
    counters: Counters,
}

impl<T> SharedSubscriberQueue<T> {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            state: Mutex::new(Locked::new()),
            not_full: Condvar::new(),
            flare: Flare::new()?,
            capacity: capacity.max(1),
            counters: Counters::default(),
        })
    }

    pub fn fd(&self) -> std::os::fd::RawFd {
        self.flare.fd()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffered(&self) -> usize {
        self.lock().items.len()
    }

    pub fn pending(&self) -> i64 {
        self.counters.pending.load(Ordering::Relaxed)
    }

    pub fn rate(&self) -> usize {
        self.counters.rate.load(Ordering::Relaxed)
    }

    pub fn set_rate(&self, rate: usize) {
        self.counters.rate.store(rate, Ordering::Relaxed);
    }

    /// Enqueue one item, waiting while the queue is full. Fails once the
    /// queue is closed.
    pub fn push_blocking(&self, item: T) -> Result<(), Closed> {
        let mut state = self.lock();
        while state.items.len() >= self.capacity && !state.closed {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.closed {
            return Err(Closed);
        }
        state.items.push_back(item);
        self.counters
            .pending
            .store((self.capacity - state.items.len()) as i64, Ordering::Relaxed);
        let want = !state.items.is_empty();
        sync_flare(&mut state, &self.flare, want);
        Ok(())
    }

    /// No more pushes; wakes blocked getters and pollers.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        sync_flare(&mut state, &self.flare, true);
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Take one item if available.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.lock();
        let item = state.items.pop_front();
        self.after_removal(&mut state);
        item
    }

    /// Take up to `n` items.
    pub fn pop_up_to(&self, n: usize) -> Vec<T> {
        let mut state = self.lock();
        let take = state.items.len().min(n);
        let out: Vec<T> = state.items.drain(..take).collect();
        self.after_removal(&mut state);
        out
    }

    /// Take everything currently buffered.
    pub fn pop_all(&self) -> Vec<T> {
        let mut state = self.lock();
        let out: Vec<T> = state.items.drain(..).collect();
        self.after_removal(&mut state);
        out
    }

    /// Block until an item or `None` once closed and drained.
    pub fn pop_blocking(&self) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    self.after_removal(&mut state);
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.flare.await_ready();
        }
    }

    /// Block until an item, `deadline`, or closure.
    pub fn pop_deadline(&self, deadline: Instant) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    self.after_removal(&mut state);
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            if !self.flare.await_deadline(deadline) {
                return None;
            }
        }
    }

    /// Block until at least one item is available (or closure), then
    /// take up to `n`.
    pub fn pop_n_blocking(&self, n: usize) -> Vec<T> {
        loop {
            {
                let mut state = self.lock();
                if !state.items.is_empty() {
                    let take = state.items.len().min(n);
                    let out: Vec<T> = state.items.drain(..take).collect();
                    self.after_removal(&mut state);
                    return out;
                }
                if state.closed {
                    return Vec::new();
                }
            }
            self.flare.await_ready();
        }
    }

    fn after_removal(&self, state: &mut MutexGuard<'_, Locked<T>>) {
        self.counters
            .pending
            .store((self.capacity.saturating_sub(state.items.len())) as i64, Ordering::Relaxed);
        let want = !state.items.is_empty() || state.closed;
        sync_flare(state, &self.flare, want);
        self.not_full.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, Locked<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The queue was closed underneath a blocked writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

// ==================== Publisher side ====================

/// Bounded SPSC queue filled by user calls, drained by the worker. The
/// flare is readable while free slots exist, so external poll loops can
/// gate production; `produce` itself never blocks.
pub struct SharedPublisherQueue<T> {
    state: Mutex<Locked<T>>,
    not_empty: Condvar,
    flare: Flare,
    capacity: usize,
    counters: Counters,
}

impl<T> SharedPublisherQueue<T> {
    pub fn new(capacity: usize) -> io::Result<Self> {
        let queue = Self {
            state: Mutex::new(Locked::new()),
            not_empty: Condvar::new(),
            flare: Flare::new()?,
            capacity: capacity.max(1),
            counters: Counters::default(),
        };
        // Empty queue: all slots free.
        let mut state = queue.lock();
        sync_flare(&mut state, &queue.flare, true);
        drop(state);
        Ok(queue)
    }

    pub fn fd(&self) -> std::os::fd::RawFd {
        self.flare.fd()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffered(&self) -> usize {
        self.lock().items.len()
    }

    pub fn free_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.buffered())
    }

    pub fn pending(&self) -> i64 {
        self.counters.pending.load(Ordering::Relaxed)
    }

    pub fn set_pending(&self, demand: i64) {
        self.counters.pending.store(demand, Ordering::Relaxed);
    }

    pub fn rate(&self) -> usize {
        self.counters.rate.load(Ordering::Relaxed)
    }

    pub fn set_rate(&self, rate: usize) {
        self.counters.rate.store(rate, Ordering::Relaxed);
    }

    /// Enqueue without blocking; respecting `free_capacity` beforehand
    /// is the caller's job.
    pub fn produce(&self, items: impl IntoIterator<Item = T>) {
        let mut state = self.lock();
        state.items.extend(items);
        let want = state.items.len() < self.capacity || state.closed;
        sync_flare(&mut state, &self.flare, want);
        self.not_empty.notify_one();
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        sync_flare(&mut state, &self.flare, true);
        self.not_empty.notify_all();
    }

    /// Worker side: wait up to `wait` for items, then take up to `max`.
    /// The bool reports "closed and fully drained".
    pub fn take_batch(&self, max: usize, wait: Duration) -> (Vec<T>, bool) {
        let mut state = self.lock();
        if state.items.is_empty() && !state.closed {
            let (guard, _) = self
                .not_empty
                .wait_timeout(state, wait)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
        let take = state.items.len().min(max);
        let batch: Vec<T> = state.items.drain(..take).collect();
        let finished = state.closed && state.items.is_empty();
        let want = state.items.len() < self.capacity || state.closed;
        sync_flare(&mut state, &self.flare, want);
        (batch, finished)
    }

    /// Worker side: drop the backlog instead of draining it.
    pub fn discard_all(&self) -> usize {
        let mut state = self.lock();
        let n = state.items.len();
        state.items.clear();
        let want = true;
        sync_flare(&mut state, &self.flare, want);
        n
    }

    fn lock(&self) -> MutexGuard<'_, Locked<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn subscriber_flare_tracks_occupancy() {
        let q = SharedSubscriberQueue::new(4).unwrap();
        assert!(!q.flare.await_deadline(Instant::now() + Duration::from_millis(5)));
        q.push_blocking(1).unwrap();
        q.push_blocking(2).unwrap();
        // Readable while nonempty.
        assert!(q.flare.await_deadline(Instant::now() + Duration::from_millis(5)));
        assert_eq!(q.buffered(), 2);
        assert_eq!(q.try_pop(), Some(1));
        assert!(q.flare.await_deadline(Instant::now() + Duration::from_millis(5)));
        assert_eq!(q.pop_all(), vec![2]);
        assert_eq!(q.try_pop(), None);
        // Drained: extinguished again.
        assert!(!q.flare.await_deadline(Instant::now() + Duration::from_millis(5)));
    }

    #[test]
    fn subscriber_bounded_push_blocks_until_room() {
        let q = Arc::new(SharedSubscriberQueue::new(2).unwrap());
        q.push_blocking("a").unwrap();
        q.push_blocking("b").unwrap();

        let writer = {
            let q = q.clone();
            std::thread::spawn(move || q.push_blocking("c").is_ok())
        };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(q.buffered(), 2, "writer should be parked on a full queue");
        assert_eq!(q.try_pop(), Some("a"));
        assert!(writer.join().unwrap());
        assert_eq!(q.pop_all(), vec!["b", "c"]);
    }

    #[test]
    fn subscriber_pop_deadline_times_out() {
        let q: SharedSubscriberQueue<u32> = SharedSubscriberQueue::new(4).unwrap();
        let before = Instant::now();
        assert_eq!(q.pop_deadline(before + Duration::from_millis(20)), None);
        assert!(before.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn subscriber_close_wakes_everyone() {
        let q = Arc::new(SharedSubscriberQueue::<u32>::new(2).unwrap());
        let getter = {
            let q = q.clone();
            std::thread::spawn(move || q.pop_blocking())
        };
        std::thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(getter.join().unwrap(), None);
        assert_eq!(q.push_blocking(1), Err(Closed));
    }

    #[test]
    fn subscriber_pop_n_takes_at_most_n() {
        let q = SharedSubscriberQueue::new(8).unwrap();
        for i in 0..5 {
            q.push_blocking(i).unwrap();
        }
        assert_eq!(q.pop_n_blocking(3), vec![0, 1, 2]);
        assert_eq!(q.pop_up_to(10), vec![3, 4]);
    }

    #[test]
    fn publisher_flare_signals_free_slots() {
        let q = SharedPublisherQueue::new(2).unwrap();
        // Fresh queue: free slots, readable.
        assert!(q.flare.await_deadline(Instant::now() + Duration::from_millis(5)));
        q.produce([1, 2]);
        // Full: extinguished.
        assert!(!q.flare.await_deadline(Instant::now() + Duration::from_millis(5)));
        let (batch, finished) = q.take_batch(10, Duration::from_millis(1));
        assert_eq!(batch, vec![1, 2]);
        assert!(!finished);
        // Room again.
        assert!(q.flare.await_deadline(Instant::now() + Duration::from_millis(5)));
    }

    #[test]
    fn publisher_produce_never_blocks() {
        let q = SharedPublisherQueue::new(2).unwrap();
        // Overflow beyond capacity is accepted; gating is the caller's
        // responsibility via free_capacity.
        q.produce(0..10);
        assert_eq!(q.buffered(), 10);
        assert_eq!(q.free_capacity(), 0);
    }

    #[test]
    fn publisher_take_batch_drains_in_order() {
        let q = SharedPublisherQueue::new(8).unwrap();
        q.produce([1, 2, 3]);
        let (a, _) = q.take_batch(2, Duration::from_millis(1));
        let (b, _) = q.take_batch(2, Duration::from_millis(1));
        assert_eq!(a, vec![1, 2]);
        assert_eq!(b, vec![3]);
    }

    #[test]
    fn publisher_close_finishes_after_drain() {
        let q = SharedPublisherQueue::new(8).unwrap();
        q.produce([1]);
        q.close();
        let (batch, finished) = q.take_batch(10, Duration::from_millis(1));
        assert_eq!(batch, vec![1]);
        assert!(finished);
        let (empty, finished) = q.take_batch(10, Duration::from_millis(1));
        assert!(empty.is_empty());
        assert!(finished);
    }

    #[test]
    fn publisher_discard_drops_the_backlog() {
        let q = SharedPublisherQueue::new(8).unwrap();
        q.produce([1, 2, 3]);
        assert_eq!(q.discard_all(), 3);
        assert_eq!(q.buffered(), 0);
    }
}
