//! Subscriber: blocking, timed, and non-blocking retrieval of topic data

use crate::core::{CoreHandle, CoreMsg};
use crate::queue::SharedSubscriberQueue;
use broker_model::{ActorId, Data, Topic};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// Queue capacity of a subscriber.
const CAPACITY: usize = 64;

/// Receives data published under a set of topic filters. The core fills
/// a bounded queue; a flare wakes blocked getters and external poll
/// loops alike.
pub struct Subscriber {
    id: ActorId,
    topics: Vec<Topic>,
    queue: Arc<SharedSubscriberQueue<(Topic, Data)>>,
    core: CoreHandle,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscriber {
    /// Wire a subscriber to the core. The returned value owns the
    /// subscription; dropping it unsubscribes.
    pub(crate) async fn new(
        core: CoreHandle,
        id: ActorId,
        topics: Vec<Topic>,
    ) -> std::io::Result<Self> {
        let queue = Arc::new(SharedSubscriberQueue::new(CAPACITY)?);
        let (sink, rx) = mpsc::channel::<(Topic, Data)>(CAPACITY);
        core.send(CoreMsg::Subscribe { id, filters: topics.clone(), sink })
            .await;
        let forwarder = {
            let queue = queue.clone();
            std::thread::spawn(move || forwarder_loop(rx, queue))
        };
        Ok(Self { id, topics, queue, core, forwarder: Some(forwarder) })
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// File descriptor readable while items are waiting.
    pub fn fd(&self) -> RawFd {
        self.queue.fd()
    }

    pub fn buffered(&self) -> usize {
        self.queue.buffered()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Free room the core may still fill.
    pub fn pending(&self) -> i64 {
        self.queue.pending()
    }

    /// Block until one item arrives. `None` once the endpoint is gone.
    pub fn get(&self) -> Option<(Topic, Data)> {
        self.queue.pop_blocking()
    }

    /// Block up to `timeout` (an absolute deadline derived now) for one
    /// item.
    pub fn get_timeout(&self, timeout: Duration) -> Option<(Topic, Data)> {
        self.queue.pop_deadline(Instant::now() + timeout)
    }

    /// Block until data is available, then take up to `n` items.
    pub fn get_n(&self, n: usize) -> Vec<(Topic, Data)> {
        self.queue.pop_n_blocking(n)
    }

    /// Take everything currently available; never blocks.
    pub fn poll(&self) -> Vec<(Topic, Data)> {
        self.queue.pop_all()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        // Unsubscribing drops the core's sink; the forwarder then sees
        // the channel close and exits. Closing the queue unblocks it if
        // it was parked on a full queue.
        let _ = self
            .core
            .sender()
            .try_send(CoreMsg::Unsubscribe { id: self.id });
        self.queue.close();
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.join();
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topics", &self.topics)
            .field("buffered", &self.buffered())
            .finish()
    }
}

/// Moves items from the core's channel into the shared queue, applying
/// backpressure by blocking while the queue is full.
fn forwarder_loop(
    mut rx: mpsc::Receiver<(Topic, Data)>,
    queue: Arc<SharedSubscriberQueue<(Topic, Data)>>,
) {
    while let Some(item) = rx.blocking_recv() {
        if queue.push_blocking(item).is_err() {
            break;
        }
    }
    debug!("subscriber forwarder exiting");
    queue.close();
}
