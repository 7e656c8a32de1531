//! Master actor: the single writer of a named store
//!
//! Runs on a dedicated thread and drains a tokio mailbox with
//! `blocking_recv` (backends are synchronous). All mutations funnel
//! through one command dispatch, whether they originate locally or from
//! a clone, and every applied mutation is broadcast to the clones over
//! the channel producer.

use crate::backend::Backend;
use crate::command::Command;
use crate::events::StoreEvent;
use crate::message::{StoreCore, StoreMessage};
use broker_channel::{Event, Handshake, Producer, ProducerBackend, RetransmitFailed};
use broker_model::{
    Clock, Data, Error, ErrorCode, NodeId, PublisherId, Timespan, Timestamp, Topic,
};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Mailbox of a master actor.
pub enum MasterMsg {
    /// A command from local code, treated exactly like a remote one.
    Local(Command),
    /// Anything arriving via the store's master topic or a direct send.
    Remote(StoreMessage),
    /// Read a value, optionally one aspect of it.
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
    /// Local `put_unique` with a direct reply.
    PutUnique {
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        resp: oneshot::Sender<Result<bool, Error>>,
    },
    /// Periodic driver for expiries.
    Tick,
    /// A peer endpoint vanished; its clones are gone with it.
    PeerDown { node: NodeId },
    /// A peer endpoint (re)appeared. Uninteresting to masters.
    PeerUp { node: NodeId },
    Shutdown,
}

/// An expiry reminder, ordered soonest-first in the heap.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Reminder {
    at: Timestamp,
    key: Data,
}

/// Channel backend wired to the endpoint core: broadcasts ride the
/// clones topic, everything else goes point-to-point.
struct ProducerLink<'a> {
    core: &'a dyn StoreCore,
    clones_topic: &'a Topic,
}

impl ProducerBackend<PublisherId, Command> for ProducerLink<'_> {
    fn broadcast_event(
        &mut self,
        _paths: &[broker_channel::Path<PublisherId>],
        event: &Event<Command>,
    ) {
        self.core.publish(
            self.clones_topic,
            StoreMessage::Event { seq: event.seq, command: event.content.clone() },
        );
    }

    fn send_handshake(&mut self, to: &PublisherId, handshake: Handshake) {
        self.core
            .direct(*to, StoreMessage::Handshake { first_seq: handshake.first_seq });
    }

    fn resend_event(&mut self, to: &PublisherId, event: &Event<Command>) {
        self.core.direct(
            *to,
            StoreMessage::Event { seq: event.seq, command: event.content.clone() },
        );
    }

    fn send_retransmit_failed(&mut self, to: &PublisherId, failed: RetransmitFailed) {
        self.core
            .direct(*to, StoreMessage::RetransmitFailed { seq: failed.seq });
    }
}

/// Raised by handlers whose failure must take the whole actor down.
struct Fatal(&'static str);

pub struct MasterActor {
    name: String,
    id: PublisherId,
    clones_topic: Topic,
    backend: Box<dyn Backend>,
    producer: Producer<PublisherId, Command>,
    core: Box<dyn StoreCore>,
    clock: std::sync::Arc<dyn Clock>,
    reminders: BinaryHeap<Reverse<Reminder>>,
    events: broadcast::Sender<StoreEvent>,
    rx: mpsc::Receiver<MasterMsg>,
}

impl MasterActor {
    /// Build the actor without starting its thread. Seeds the reminder
    /// heap from the backend; failing to enumerate expiries is fatal.
    fn new(
        name: String,
        id: PublisherId,
        backend: Box<dyn Backend>,
        core: Box<dyn StoreCore>,
        clock: std::sync::Arc<dyn Clock>,
        events: broadcast::Sender<StoreEvent>,
        rx: mpsc::Receiver<MasterMsg>,
    ) -> Result<Self, Error> {
        let clones_topic = Topic::clones_for(&name)
            .map_err(|e| Error::with_message(ErrorCode::InvalidTopicKey, e.to_string()))?;
        let mut reminders = BinaryHeap::new();
        for (key, at) in backend.expiries()? {
            reminders.push(Reverse(Reminder { at, key }));
        }
        Ok(Self {
            name,
            id,
            clones_topic,
            backend,
            producer: Producer::new(),
            core,
            clock,
            reminders,
            events,
            rx,
        })
    }

    /// Drain the mailbox until shutdown, the core going away, or a fatal
    /// backend failure.
    fn run(mut self) {
        info!(store = %self.name, "master up");
        while let Some(msg) = self.rx.blocking_recv() {
            let flow = match msg {
                MasterMsg::Local(cmd) => self.dispatch(cmd),
                MasterMsg::Remote(m) => self.handle_remote(m),
                MasterMsg::Get { key, aspect, resp } => {
                    let result = match aspect {
                        None => self.backend.get(&key),
                        Some(aspect) => self.backend.get_index(&key, &aspect),
                    };
                    let _ = resp.send(result);
                    Ok(())
                }
                MasterMsg::Exists { key, resp } => {
                    let _ = resp.send(self.backend.exists(&key));
                    Ok(())
                }
                MasterMsg::Keys { resp } => {
                    let _ = resp.send(self.backend.keys());
                    Ok(())
                }
                MasterMsg::PutUnique { key, value, expiry, resp } => {
                    let _ = resp.send(Ok(self.put_unique(key, value, expiry, self.id)));
                    Ok(())
                }
                MasterMsg::Tick => {
                    self.handle_tick();
                    Ok(())
                }
                MasterMsg::PeerDown { node } => {
                    self.drop_clones_of(node);
                    Ok(())
                }
                MasterMsg::PeerUp { .. } => Ok(()),
                MasterMsg::Shutdown => break,
            };
            if let Err(Fatal(what)) = flow {
                error!(store = %self.name, "{}, terminating master", what);
                return;
            }
        }
        info!(store = %self.name, "master down");
    }

    fn handle_remote(&mut self, msg: StoreMessage) -> Result<(), Fatal> {
        match msg {
            StoreMessage::Command(cmd) => self.dispatch(cmd)?,
            StoreMessage::Ack { from, seq } => self.producer.handle_ack(&from, seq),
            StoreMessage::Nack { from, seqs } => {
                let mut link =
                    ProducerLink { core: self.core.as_ref(), clones_topic: &self.clones_topic };
                self.producer.handle_nack(&mut link, &from, &seqs);
            }
            other => {
                warn!(store = %self.name, "master ignores unexpected message: {:?}", other);
            }
        }
        Ok(())
    }

    /// The single dispatch every mutation goes through, local or remote.
    fn dispatch(&mut self, cmd: Command) -> Result<(), Fatal> {
        debug!(store = %self.name, command = cmd.tag(), "dispatch");
        match cmd {
            Command::Put { key, value, expiry, publisher } => {
                self.put(key, value, expiry, publisher);
            }
            Command::PutUnique { key, value, expiry, publisher, who, req_id } => {
                let added = self.put_unique(key, value, expiry, publisher);
                self.core.direct(who, StoreMessage::UniqueReply { req_id, added });
            }
            Command::Erase { key, publisher } => {
                if let Err(e) = self.backend.erase(&key) {
                    warn!(store = %self.name, key = %key, error = %e, "erase failed");
                    return Ok(());
                }
                self.emit(StoreEvent::Erase { key: key.clone(), publisher });
                self.broadcast(Command::Erase { key, publisher });
            }
            Command::Add { key, value, init_type, expiry, publisher } => {
                let old = self.backend.get(&key).ok();
                let expires_at = self.expiry_from_now(expiry);
                if let Err(e) = self.backend.add(key.clone(), value, init_type, expires_at) {
                    warn!(store = %self.name, key = %key, error = %e, "add failed");
                    return Ok(());
                }
                let fresh = match self.backend.get(&key) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(store = %self.name, key = %key, error = %e,
                               "read-back after add failed");
                        return Ok(());
                    }
                };
                if let Some(span) = expiry {
                    self.remind(span, key.clone());
                }
                match old {
                    Some(old) => self.emit(StoreEvent::Update {
                        key: key.clone(),
                        old,
                        new: fresh.clone(),
                        publisher,
                    }),
                    None => self.emit(StoreEvent::Insert {
                        key: key.clone(),
                        value: fresh.clone(),
                        publisher,
                    }),
                }
                // Clones stay purely value-driven: rebroadcast the fresh
                // value, not the delta.
                self.broadcast(Command::Put { key, value: fresh, expiry: None, publisher });
            }
            Command::Subtract { key, value, expiry, publisher } => {
                let Ok(old) = self.backend.get(&key) else {
                    warn!(store = %self.name, key = %key,
                          "cannot subtract from a non-existing value");
                    return Ok(());
                };
                let expires_at = self.expiry_from_now(expiry);
                if let Err(e) = self.backend.subtract(key.clone(), value, expires_at) {
                    warn!(store = %self.name, key = %key, error = %e, "subtract failed");
                    return Ok(());
                }
                let fresh = match self.backend.get(&key) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(store = %self.name, key = %key, error = %e,
                               "read-back after subtract failed");
                        return Ok(());
                    }
                };
                if let Some(span) = expiry {
                    self.remind(span, key.clone());
                }
                self.emit(StoreEvent::Update {
                    key: key.clone(),
                    old,
                    new: fresh.clone(),
                    publisher,
                });
                self.broadcast(Command::Put { key, value: fresh, expiry: None, publisher });
            }
            Command::Clear { publisher } => {
                match self.backend.keys() {
                    Ok(Data::Set(keys)) => {
                        for key in keys {
                            self.emit(StoreEvent::Erase { key, publisher });
                        }
                    }
                    Ok(Data::Vector(keys)) => {
                        for key in keys {
                            self.emit(StoreEvent::Erase { key, publisher });
                        }
                    }
                    Ok(Data::None) => {}
                    Ok(other) => {
                        error!(store = %self.name, "keys() returned a {}", other.data_type());
                    }
                    Err(e) => {
                        error!(store = %self.name, error = %e, "unable to obtain keys");
                        return Ok(());
                    }
                }
                if self.backend.clear().is_err() {
                    return Err(Fatal("failed to clear the backend"));
                }
                self.broadcast(Command::Clear { publisher });
            }
            Command::Expire { .. } => {
                error!(store = %self.name, "received an expire command in the master");
            }
            Command::Snapshot { remote_core, remote_clone } => {
                self.snapshot(remote_core, remote_clone)?;
            }
            Command::SnapshotSync { .. } => {
                error!(store = %self.name, "received a snapshot_sync command in the master");
            }
            Command::Set { .. } => {
                error!(store = %self.name, "received a set command in the master");
            }
        }
        Ok(())
    }

    fn put(&mut self, key: Data, value: Data, expiry: Option<Timespan>, publisher: PublisherId) {
        let expires_at = self.expiry_from_now(expiry);
        let old = self.backend.get(&key).ok();
        if let Err(e) = self.backend.put(key.clone(), value.clone(), expires_at) {
            warn!(store = %self.name, key = %key, error = %e, "put failed");
            return;
        }
        if let Some(span) = expiry {
            self.remind(span, key.clone());
        }
        match old {
            Some(old) => self.emit(StoreEvent::Update {
                key: key.clone(),
                old,
                new: value.clone(),
                publisher,
            }),
            None => self.emit(StoreEvent::Insert {
                key: key.clone(),
                value: value.clone(),
                publisher,
            }),
        }
        self.broadcast(Command::Put { key, value, expiry, publisher });
    }

    /// Insert-if-absent. An existing key answers false and broadcasts
    /// nothing; a successful insert broadcasts a plain `put` so clones
    /// skip the existence check.
    fn put_unique(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    ) -> bool {
        if self.backend.exists(&key).unwrap_or(false) {
            return false;
        }
        let expires_at = self.expiry_from_now(expiry);
        if let Err(e) = self.backend.put(key.clone(), value.clone(), expires_at) {
            warn!(store = %self.name, key = %key, error = %e, "put_unique failed");
            return false;
        }
        if let Some(span) = expiry {
            self.remind(span, key.clone());
        }
        self.emit(StoreEvent::Insert { key: key.clone(), value: value.clone(), publisher });
        self.broadcast(Command::Put { key, value, expiry, publisher });
        true
    }

    /// Enroll a clone: fresh channel path, ordering fence over the
    /// clones topic, snapshot payload out-of-band.
    fn snapshot(&mut self, remote_core: NodeId, remote_clone: PublisherId) -> Result<(), Fatal> {
        info!(store = %self.name, clone = %remote_clone, core = %remote_core.fmt_short(),
              "snapshot requested");
        let Ok(entries) = self.backend.snapshot() else {
            return Err(Fatal("failed to snapshot the backend"));
        };
        // A re-requesting clone gets a fresh offset.
        self.producer.remove(&remote_clone);
        let mut link = ProducerLink { core: self.core.as_ref(), clones_topic: &self.clones_topic };
        if self.producer.add(&mut link, remote_clone).is_err() {
            warn!(store = %self.name, clone = %remote_clone, "clone already enrolled");
        }
        // The fence rides the ordered channel; the payload does not. The
        // clone applies any fenced-off commands on top of the payload,
        // whichever arrives first.
        self.broadcast(Command::SnapshotSync { remote_clone });
        self.core.direct(remote_clone, StoreMessage::Set { entries });
        Ok(())
    }

    fn handle_tick(&mut self) {
        let now = self.clock.now();
        while self.reminders.peek().is_some_and(|Reverse(r)| r.at <= now) {
            if let Some(Reverse(Reminder { key, .. })) = self.reminders.pop() {
                self.expire(key, now);
            }
        }
    }

    fn expire(&mut self, key: Data, now: Timestamp) {
        info!(store = %self.name, key = %key, "expire");
        match self.backend.expire(&key, now) {
            Err(e) => {
                error!(store = %self.name, key = %key, error = %e, "expire failed");
            }
            Ok(false) => {
                // The key vanished or was re-put with a later expiry.
                debug!(store = %self.name, key = %key, "stale expiry reminder ignored");
            }
            Ok(true) => {
                self.emit(StoreEvent::Expire { key: key.clone(), publisher: self.id });
                self.broadcast(Command::Expire { key, publisher: self.id });
            }
        }
    }

    fn drop_clones_of(&mut self, node: NodeId) {
        let gone: Vec<PublisherId> = self
            .producer
            .paths()
            .iter()
            .map(|p| p.hdl)
            .filter(|h| h.node == node)
            .collect();
        for clone in gone {
            info!(store = %self.name, clone = %clone, "lost clone");
            self.producer.remove(&clone);
        }
    }

    fn broadcast(&mut self, cmd: Command) {
        let mut link = ProducerLink { core: self.core.as_ref(), clones_topic: &self.clones_topic };
        self.producer.produce(&mut link, cmd);
    }

    fn remind(&mut self, span: Timespan, key: Data) {
        let at = self.clock.now() + span;
        self.reminders.push(Reverse(Reminder { at, key }));
    }

    fn expiry_from_now(&self, expiry: Option<Timespan>) -> Option<Timestamp> {
        expiry.map(|span| self.clock.now() + span)
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

/// Spawn a master actor on its own thread.
///
/// Returns the mailbox, the join handle, and the change-event bus.
/// Fails if the backend cannot enumerate its expiries.
pub fn spawn_master(
    name: String,
    id: PublisherId,
    backend: Box<dyn Backend>,
    core: Box<dyn StoreCore>,
    clock: std::sync::Arc<dyn Clock>,
) -> Result<(mpsc::Sender<MasterMsg>, JoinHandle<()>, broadcast::Sender<StoreEvent>), Error> {
    let (tx, rx) = mpsc::channel(64);
    let (events, _) = broadcast::channel(256);
    let actor = MasterActor::new(name, id, backend, core, clock, events.clone(), rx)?;
    let handle = thread::spawn(move || actor.run());
    Ok((tx, handle, events))
}
