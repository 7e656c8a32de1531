//! The commands that travel between a master and its clones

use broker_model::{Data, DataType, NodeId, PublisherId, RequestId, Timespan};
use std::collections::BTreeMap;

/// A state-mutating store command. Commands are addressed implicitly: the
/// topic they are published under carries the store name.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Write a value, overwriting any previous one.
    Put {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    },
    /// Write a value only if the key is absent. Master-only input; the
    /// master rewrites it to `Put` before broadcasting, so clones never
    /// see this variant.
    PutUnique {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
        who: PublisherId,
        req_id: RequestId,
    },
    /// Delete a key; deleting an absent key is a no-op.
    Erase { key: Data, publisher: PublisherId },
    /// Increment-or-initialize: missing keys start as the neutral value
    /// of `init_type` before the addition applies.
    Add {
        key: Data,
        value: Data,
        init_type: DataType,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    },
    /// Decrement an existing value; fails silently on absent keys.
    Subtract {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    },
    /// Drop every key.
    Clear { publisher: PublisherId },
    /// Expiry executed on the master; clones receive it like an erase.
    Expire { key: Data, publisher: PublisherId },
    /// Bootstrap request from a clone to the master.
    Snapshot {
        remote_core: NodeId,
        remote_clone: PublisherId,
    },
    /// Ordering fence the master sends over the clones topic while the
    /// snapshot payload travels out-of-band.
    SnapshotSync { remote_clone: PublisherId },
    /// Complete snapshot payload, master to one clone.
    Set { entries: BTreeMap<Data, Data> },
}

impl Command {
    /// The originating publisher, where the variant carries one.
    pub fn publisher(&self) -> Option<PublisherId> {
        match self {
            Command::Put { publisher, .. }
            | Command::PutUnique { publisher, .. }
            | Command::Erase { publisher, .. }
            | Command::Add { publisher, .. }
            | Command::Subtract { publisher, .. }
            | Command::Clear { publisher }
            | Command::Expire { publisher, .. } => Some(*publisher),
            Command::Snapshot { .. } | Command::SnapshotSync { .. } | Command::Set { .. } => None,
        }
    }

    /// Stable name for log output.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Put { .. } => "put",
            Command::PutUnique { .. } => "put_unique",
            Command::Erase { .. } => "erase",
            Command::Add { .. } => "add",
            Command::Subtract { .. } => "subtract",
            Command::Clear { .. } => "clear",
            Command::Expire { .. } => "expire",
            Command::Snapshot { .. } => "snapshot",
            Command::SnapshotSync { .. } => "snapshot_sync",
            Command::Set { .. } => "set",
        }
    }
}
