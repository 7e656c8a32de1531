//! Messages exchanged through the endpoint core, and the capability the
//! core hands to store actors

use crate::command::Command;
use broker_model::{Data, PublisherId, RequestId, Topic};
use broker_channel::SequenceNumber;
use std::collections::BTreeMap;

/// Everything a master or clone sends through the core: channel frames
/// on the store's derived topics, plus the point-to-point messages.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreMessage {
    /// A command forwarded to the master (clone or frontend origin).
    Command(Command),
    /// One numbered channel event, master to clones.
    Event {
        seq: SequenceNumber,
        command: Command,
    },
    /// Channel handshake, master to one clone.
    Handshake { first_seq: SequenceNumber },
    /// The master can no longer retransmit `seq`; the clone must
    /// resynchronize from a fresh snapshot.
    RetransmitFailed { seq: SequenceNumber },
    /// Cumulative acknowledgment, clone to master.
    Ack {
        from: PublisherId,
        seq: SequenceNumber,
    },
    /// Retransmission request, clone to master.
    Nack {
        from: PublisherId,
        seqs: Vec<SequenceNumber>,
    },
    /// Out-of-band snapshot payload, master to one clone.
    Set { entries: BTreeMap<Data, Data> },
    /// Reply to a `put_unique`, master to the requester.
    UniqueReply { req_id: RequestId, added: bool },
}

/// What a store actor may ask of the endpoint core. The core supplies an
/// implementation at spawn time; actors never name the transport.
pub trait StoreCore: Send {
    /// Publish to every subscriber of `topic`, local and peered.
    fn publish(&self, topic: &Topic, msg: StoreMessage);

    /// Deliver to one specific actor, relaying across the overlay when
    /// the target lives on another node.
    fn direct(&self, target: PublisherId, msg: StoreMessage);
}
