//! Publisher: asynchronous topic publishing with demand accounting

use crate::core::CoreHandle;
use crate::queue::SharedPublisherQueue;
use broker_model::{Data, Topic};
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Queue capacity of a publisher.
const CAPACITY: usize = 64;

/// How many items the worker moves per wakeup.
const BATCH: usize = 16;

/// Width of the send-rate sliding window, one sample per second.
const RATE_WINDOW: usize = 10;

/// Publishes data messages to one topic through a bounded queue and a
/// background worker. `publish` never blocks; callers gate production on
/// `free_capacity` (or poll `fd`, readable while slots are free).
pub struct Publisher {
    topic: Topic,
    queue: Arc<SharedPublisherQueue<Data>>,
    drop_all: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Publisher {
    pub(crate) fn new(core: CoreHandle, topic: Topic) -> std::io::Result<Self> {
        let queue = Arc::new(SharedPublisherQueue::new(CAPACITY)?);
        let drop_all = Arc::new(AtomicBool::new(false));
        let worker = {
            let queue = queue.clone();
            let drop_all = drop_all.clone();
            let topic = topic.clone();
            std::thread::spawn(move || worker_loop(core, topic, queue, drop_all))
        };
        Ok(Self { topic, queue, drop_all, worker: Some(worker) })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Demand last communicated by the core.
    pub fn demand(&self) -> usize {
        self.queue.pending().max(0) as usize
    }

    /// Items currently waiting in the queue.
    pub fn buffered(&self) -> usize {
        self.queue.buffered()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// How many items fit before the queue overflows its bound.
    pub fn free_capacity(&self) -> usize {
        self.queue.free_capacity()
    }

    /// Rough throughput estimate, items per second.
    pub fn send_rate(&self) -> usize {
        self.queue.rate()
    }

    /// File descriptor readable while the queue has free slots.
    pub fn fd(&self) -> RawFd {
        self.queue.fd()
    }

    /// Send one value to all subscribers of the topic.
    pub fn publish(&self, value: Data) {
        self.queue.produce([value]);
    }

    /// Send a batch of values.
    pub fn publish_batch(&self, values: Vec<Data>) {
        self.queue.produce(values);
    }

    /// Drop whatever is still queued when the publisher goes away,
    /// instead of draining it.
    pub fn drop_all_on_destruction(&self) {
        self.drop_all.store(true, Ordering::Relaxed);
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.drop_all.load(Ordering::Relaxed) {
            self.queue.discard_all();
        }
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("buffered", &self.buffered())
            .finish()
    }
}

/// Moves queued items into the core and samples the send rate once per
/// second over a sliding window. Ends when the queue is closed and (for
/// a cooperative shutdown) drained.
fn worker_loop(
    core: CoreHandle,
    topic: Topic,
    queue: Arc<SharedPublisherQueue<Data>>,
    drop_all: Arc<AtomicBool>,
) {
    let mut window: VecDeque<usize> = VecDeque::with_capacity(RATE_WINDOW);
    let mut sent_this_second = 0usize;
    let mut last_sample = Instant::now();

    loop {
        let (batch, finished) = queue.take_batch(BATCH, Duration::from_millis(100));
        if drop_all.load(Ordering::Relaxed) {
            queue.discard_all();
        } else {
            for value in batch {
                if !core.blocking_publish(topic.clone(), value) {
                    debug!(topic = %topic, "core gone, publisher worker exiting");
                    return;
                }
                sent_this_second += 1;
            }
        }
        queue.set_pending(core.capacity() as i64);

        if last_sample.elapsed() >= Duration::from_secs(1) {
            if window.len() == RATE_WINDOW {
                window.pop_front();
            }
            window.push_back(sent_this_second);
            sent_this_second = 0;
            last_sample = Instant::now();
            let avg = window.iter().sum::<usize>() / window.len().max(1);
            queue.set_rate(avg);
        }

        if finished {
            return;
        }
    }
}
