//! Test double for the endpoint core: records everything actors send.

use crate::message::{StoreCore, StoreMessage};
use broker_model::{PublisherId, Topic};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Sent {
    Publish(Topic, StoreMessage),
    Direct(PublisherId, StoreMessage),
}

#[derive(Clone, Default)]
pub(crate) struct TestCore {
    sent: Arc<Mutex<Vec<Sent>>>,
}

impl TestCore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, oldest first.
    pub(crate) fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut self.sent.lock().expect("core log poisoned"))
    }

    /// Broadcast events published on `topic`, in order.
    pub(crate) fn published_events(&self, topic: &Topic) -> Vec<StoreMessage> {
        self.sent
            .lock()
            .expect("core log poisoned")
            .iter()
            .filter_map(|s| match s {
                Sent::Publish(t, msg) if t == topic => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    /// Direct messages addressed to `target`, in order.
    pub(crate) fn directs_to(&self, target: PublisherId) -> Vec<StoreMessage> {
        self.sent
            .lock()
            .expect("core log poisoned")
            .iter()
            .filter_map(|s| match s {
                Sent::Direct(t, msg) if *t == target => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }
}

impl StoreCore for TestCore {
    fn publish(&self, topic: &Topic, msg: StoreMessage) {
        self.sent
            .lock()
            .expect("core log poisoned")
            .push(Sent::Publish(topic.clone(), msg));
    }

    fn direct(&self, target: PublisherId, msg: StoreMessage) {
        self.sent
            .lock()
            .expect("core log poisoned")
            .push(Sent::Direct(target, msg));
    }
}
