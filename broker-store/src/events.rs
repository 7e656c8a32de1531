//! Change events emitted by masters and clones

use broker_model::{Data, PublisherId};

/// One observed change to a store, delivered to event-bus subscribers on
/// both the master and every synchronized clone.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    Insert {
        key: Data,
        value: Data,
        publisher: PublisherId,
    },
    Update {
        key: Data,
        old: Data,
        new: Data,
        publisher: PublisherId,
    },
    Erase {
        key: Data,
        publisher: PublisherId,
    },
    Expire {
        key: Data,
        publisher: PublisherId,
    },
}

impl StoreEvent {
    pub fn key(&self) -> &Data {
        match self {
            StoreEvent::Insert { key, .. }
            | StoreEvent::Update { key, .. }
            | StoreEvent::Erase { key, .. }
            | StoreEvent::Expire { key, .. } => key,
        }
    }
}
