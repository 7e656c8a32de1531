//! Clone actor: a read-mostly replica that forwards writes
//!
//! A clone owns a channel consumer fed from the store's clones topic,
//! an in-memory replica, and a request path to the master. It becomes
//! operational ("synced") once it has seen both the out-of-band snapshot
//! payload and the ordering fence that travels the channel; commands
//! delivered before the payload arrives wait in a queue.

use crate::backend::Backend;
use crate::command::Command;
use crate::events::StoreEvent;
use crate::memory::MemoryBackend;
use crate::message::{StoreCore, StoreMessage};
use broker_channel::{Consumer, ConsumerBackend, CumulativeAck, Handshake, Nack};
use broker_model::{
    Clock, Data, Error, ErrorCode, NodeId, PublisherId, RequestId, Timespan, Topic,
};
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// How many ticks an unsynchronized clone waits before asking the
/// master for another snapshot.
const RESNAPSHOT_TICKS: u32 = 50;

/// How many ticks a pending `put_unique` may wait for its reply.
const PENDING_REPLY_TICKS: u32 = 200;

/// Mailbox of a clone actor.
pub enum CloneMsg {
    /// Anything arriving via the clones topic or a direct send.
    Remote(StoreMessage),
    /// A local mutation, forwarded to the master.
    Local(Command),
    /// Local `put_unique`: forwarded, reply correlated by request id.
    PutUnique {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        resp: oneshot::Sender<Result<bool, Error>>,
    },
    Get {
        key: Data,
        aspect: Option<Data>,
        resp: oneshot::Sender<Result<Data, Error>>,
    },
    Exists {
        key: Data,
        resp: oneshot::Sender<Result<bool, Error>>,
    },
    Keys {
        resp: oneshot::Sender<Result<Data, Error>>,
    },
    Tick,
    PeerUp { node: NodeId },
    PeerDown { node: NodeId },
    Shutdown,
}

/// Channel backend for the consumer: replies ride the master topic,
/// deliveries pile up for the actor to apply after the call.
struct ConsumerLink<'a> {
    core: &'a dyn StoreCore,
    master_topic: &'a Topic,
    id: PublisherId,
    delivered: Vec<Command>,
}

impl ConsumerBackend<Command> for ConsumerLink<'_> {
    fn consume(&mut self, content: Command) {
        self.delivered.push(content);
    }

    fn send_ack(&mut self, ack: CumulativeAck) {
        self.core
            .publish(self.master_topic, StoreMessage::Ack { from: self.id, seq: ack.seq });
    }

    fn send_nack(&mut self, nack: Nack) {
        self.core
            .publish(self.master_topic, StoreMessage::Nack { from: self.id, seqs: nack.seqs });
    }
}

struct PendingUnique {
    resp: oneshot::Sender<Result<bool, Error>>,
    age_ticks: u32,
}

pub struct CloneActor {
    name: String,
    id: PublisherId,
    master_topic: Topic,
    backend: MemoryBackend,
    consumer: Consumer<Command>,
    set_received: bool,
    saw_sync: bool,
    /// Commands consumed from the channel before the snapshot payload
    /// arrived; applied in order once it lands.
    queued: Vec<Command>,
    pending_unique: HashMap<RequestId, PendingUnique>,
    next_req: u64,
    ticks_unsynced: u32,
    core: Box<dyn StoreCore>,
    clock: std::sync::Arc<dyn Clock>,
    events: broadcast::Sender<StoreEvent>,
    rx: mpsc::Receiver<CloneMsg>,
}

impl CloneActor {
    fn new(
        name: String,
        id: PublisherId,
        core: Box<dyn StoreCore>,
        clock: std::sync::Arc<dyn Clock>,
        events: broadcast::Sender<StoreEvent>,
        rx: mpsc::Receiver<CloneMsg>,
    ) -> Result<Self, Error> {
        let master_topic = Topic::master_for(&name)
            .map_err(|e| Error::with_message(ErrorCode::InvalidTopicKey, e.to_string()))?;
        Ok(Self {
            name,
            id,
            master_topic,
            backend: MemoryBackend::new(),
            consumer: Consumer::new(),
            set_received: false,
            saw_sync: false,
            queued: Vec::new(),
            pending_unique: HashMap::new(),
            next_req: 0,
            // Due immediately: the first tick after the endpoint has
            // registered this actor with the core sends the request.
            ticks_unsynced: RESNAPSHOT_TICKS,
            core,
            clock,
            events,
            rx,
        })
    }

    fn run(mut self) {
        info!(store = %self.name, clone = %self.id, "clone up");
        while let Some(msg) = self.rx.blocking_recv() {
            match msg {
                CloneMsg::Remote(m) => self.handle_remote(m),
                CloneMsg::Local(cmd) => self.forward(cmd),
                CloneMsg::PutUnique { key, value, expiry, resp } => {
                    self.next_req += 1;
                    let req_id = RequestId(self.next_req);
                    self.pending_unique
                        .insert(req_id, PendingUnique { resp, age_ticks: 0 });
                    self.forward(Command::PutUnique {
                        key,
                        value,
                        expiry,
                        publisher: self.id,
                        who: self.id,
                        req_id,
                    });
                }
                CloneMsg::Get { key, aspect, resp } => {
                    let result = self.guarded(|backend| match aspect {
                        None => backend.get(&key),
                        Some(aspect) => backend.get_index(&key, &aspect),
                    });
                    let _ = resp.send(result);
                }
                CloneMsg::Exists { key, resp } => {
                    let _ = resp.send(self.guarded(|backend| backend.exists(&key)));
                }
                CloneMsg::Keys { resp } => {
                    let _ = resp.send(self.guarded(|backend| backend.keys()));
                }
                CloneMsg::Tick => self.handle_tick(),
                CloneMsg::PeerUp { .. } => {
                    // Reconnection is the moment to retry a stalled sync.
                    if !self.synced() {
                        self.request_snapshot();
                    }
                }
                CloneMsg::PeerDown { .. } => {}
                CloneMsg::Shutdown => break,
            }
        }
        info!(store = %self.name, clone = %self.id, "clone down");
    }

    fn synced(&self) -> bool {
        self.set_received && self.saw_sync
    }

    /// Reads answer `stale_data` until the clone is synchronized.
    fn guarded<T>(
        &self,
        f: impl FnOnce(&MemoryBackend) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if !self.synced() {
            return Err(Error::with_message(
                ErrorCode::StaleData,
                "clone not yet synchronized with its master",
            ));
        }
        f(&self.backend)
    }

    fn handle_remote(&mut self, msg: StoreMessage) {
        match msg {
            StoreMessage::Handshake { first_seq } => {
                let delivered = self.with_consumer(|consumer, link| {
                    consumer.handle_handshake(link, Handshake { first_seq })
                });
                self.process_delivered(delivered);
            }
            StoreMessage::Event { seq, command } => {
                let delivered = self.with_consumer(|consumer, link| {
                    consumer.handle_event(link, seq, command)
                });
                self.process_delivered(delivered);
            }
            StoreMessage::RetransmitFailed { seq } => {
                // The master evicted something we still need; the only
                // way back to a consistent replica is a fresh snapshot.
                error!(store = %self.name, clone = %self.id, seq,
                       "lost an event for good, resynchronizing");
                self.consumer.reset();
                self.set_received = false;
                self.saw_sync = false;
                self.queued.clear();
                self.request_snapshot();
            }
            StoreMessage::Set { entries } => {
                debug!(store = %self.name, clone = %self.id, entries = entries.len(),
                       "snapshot payload installed");
                self.backend.install(entries);
                self.set_received = true;
                let queued = std::mem::take(&mut self.queued);
                for cmd in queued {
                    self.apply(cmd);
                }
            }
            StoreMessage::UniqueReply { req_id, added } => {
                match self.pending_unique.remove(&req_id) {
                    Some(pending) => {
                        let _ = pending.resp.send(Ok(added));
                    }
                    None => {
                        warn!(store = %self.name, req = %req_id, "stray put_unique reply");
                    }
                }
            }
            other => {
                warn!(store = %self.name, clone = %self.id,
                      "clone ignores unexpected message: {:?}", other);
            }
        }
    }

    /// Run one consumer operation and hand back whatever it delivered.
    fn with_consumer(
        &mut self,
        f: impl FnOnce(&mut Consumer<Command>, &mut ConsumerLink<'_>),
    ) -> Vec<Command> {
        let mut link = ConsumerLink {
            core: self.core.as_ref(),
            master_topic: &self.master_topic,
            id: self.id,
            delivered: Vec::new(),
        };
        f(&mut self.consumer, &mut link);
        link.delivered
    }

    /// Commands come off the channel strictly in order. Until the
    /// snapshot payload arrives they cannot be applied and wait in the
    /// queue; the sync fence flips its flag either way.
    fn process_delivered(&mut self, delivered: Vec<Command>) {
        for cmd in delivered {
            if let Command::SnapshotSync { remote_clone } = &cmd {
                if *remote_clone == self.id {
                    debug!(store = %self.name, clone = %self.id, "sync fence consumed");
                    self.saw_sync = true;
                }
                continue;
            }
            if self.set_received {
                self.apply(cmd);
            } else {
                self.queued.push(cmd);
            }
        }
    }

    /// Mirror of the master's mutation semantics, minus rebroadcast.
    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::Put { key, value, expiry, publisher } => {
                let expires_at = expiry.map(|span| self.clock.now() + span);
                let old = self.backend.get(&key).ok();
                if let Err(e) = self.backend.put(key.clone(), value.clone(), expires_at) {
                    warn!(store = %self.name, key = %key, error = %e, "replica put failed");
                    return;
                }
                match old {
                    Some(old) => self.emit(StoreEvent::Update {
                        key,
                        old,
                        new: value,
                        publisher,
                    }),
                    None => self.emit(StoreEvent::Insert { key, value, publisher }),
                }
            }
            Command::Erase { key, publisher } => {
                if self.backend.erase(&key).is_ok() {
                    self.emit(StoreEvent::Erase { key, publisher });
                }
            }
            Command::Expire { key, publisher } => {
                if self.backend.erase(&key).is_ok() {
                    self.emit(StoreEvent::Expire { key, publisher });
                }
            }
            Command::Clear { publisher } => {
                if let Ok(Data::Set(keys)) = self.backend.keys() {
                    for key in keys {
                        self.emit(StoreEvent::Erase { key, publisher });
                    }
                }
                if let Err(e) = self.backend.clear() {
                    error!(store = %self.name, error = %e, "replica clear failed");
                }
            }
            // The master rewrites these before broadcasting, so a clone
            // seeing one means a protocol violation upstream.
            other => {
                error!(store = %self.name, clone = %self.id, command = other.tag(),
                       "unexpected command on the clones topic");
            }
        }
    }

    fn forward(&self, cmd: Command) {
        self.core.publish(&self.master_topic, StoreMessage::Command(cmd));
    }

    fn request_snapshot(&mut self) {
        info!(store = %self.name, clone = %self.id, "requesting snapshot");
        self.ticks_unsynced = 0;
        self.forward(Command::Snapshot {
            remote_core: self.id.node,
            remote_clone: self.id,
        });
    }

    fn handle_tick(&mut self) {
        let delivered = self.with_consumer(|consumer, link| consumer.tick(link));
        self.process_delivered(delivered);

        if !self.synced() {
            self.ticks_unsynced += 1;
            if self.ticks_unsynced >= RESNAPSHOT_TICKS {
                self.request_snapshot();
            }
        }

        // Age out abandoned put_unique correlations.
        self.pending_unique.retain(|req_id, pending| {
            pending.age_ticks += 1;
            if pending.age_ticks > PENDING_REPLY_TICKS {
                debug!(store = %self.name, req = %req_id, "dropping stale put_unique wait");
                false
            } else {
                true
            }
        });
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

/// Spawn a clone actor on its own thread. The clone immediately asks the
/// master for a snapshot and serves `stale_data` until synchronized.
pub fn spawn_clone(
    name: String,
    id: PublisherId,
    core: Box<dyn StoreCore>,
    clock: std::sync::Arc<dyn Clock>,
) -> Result<(mpsc::Sender<CloneMsg>, JoinHandle<()>, broadcast::Sender<StoreEvent>), Error> {
    let (tx, rx) = mpsc::channel(64);
    let (events, _) = broadcast::channel(256);
    let actor = CloneActor::new(name, id, core, clock, events.clone(), rx)?;
    let handle = thread::spawn(move || actor.run());
    Ok((tx, handle, events))
}
