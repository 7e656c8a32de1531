//! Core: the topic router at the heart of an endpoint
//!
//! One tokio task owns the subscription table, the store-actor registry,
//! and the peer links. Local publishes fan out to matching subscribers
//! and store actors; peered cores exchange the same `CoreMsg` values the
//! local side uses, with a hop budget inserted at the first receiving
//! endpoint. Deliveries into actor mailboxes never block the router;
//! anything dropped under pressure is recovered by the channel layer.

use crate::endpoint::EndpointEvent;
use broker_model::{
    ActorId, Data, NetworkInfo, NodeId, PublisherId, Topic,
};
use broker_store::{CloneMsg, MasterMsg, StoreCore, StoreMessage};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// What travels under a topic: application data or store plumbing.
#[derive(Clone, Debug)]
pub enum Envelope {
    Data(Data),
    Store(StoreMessage),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Peered,
}

/// One row of `peers()`.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub node: NodeId,
    pub network: NetworkInfo,
    pub status: PeerStatus,
}

/// Mailbox adapter for a registered store actor.
pub enum ActorSink {
    Master(mpsc::Sender<MasterMsg>),
    Clone(mpsc::Sender<CloneMsg>),
}

impl ActorSink {
    fn remote(&self, msg: StoreMessage) {
        match self {
            ActorSink::Master(tx) => drop(tx.try_send(MasterMsg::Remote(msg))),
            ActorSink::Clone(tx) => drop(tx.try_send(CloneMsg::Remote(msg))),
        }
    }

    fn tick(&self) {
        match self {
            ActorSink::Master(tx) => drop(tx.try_send(MasterMsg::Tick)),
            ActorSink::Clone(tx) => drop(tx.try_send(CloneMsg::Tick)),
        }
    }

    fn peer_up(&self, node: NodeId) {
        match self {
            ActorSink::Master(tx) => drop(tx.try_send(MasterMsg::PeerUp { node })),
            ActorSink::Clone(tx) => drop(tx.try_send(CloneMsg::PeerUp { node })),
        }
    }

    fn peer_down(&self, node: NodeId) {
        match self {
            ActorSink::Master(tx) => drop(tx.try_send(MasterMsg::PeerDown { node })),
            ActorSink::Clone(tx) => drop(tx.try_send(CloneMsg::PeerDown { node })),
        }
    }

    fn shutdown(&self) {
        match self {
            ActorSink::Master(tx) => drop(tx.try_send(MasterMsg::Shutdown)),
            ActorSink::Clone(tx) => drop(tx.try_send(CloneMsg::Shutdown)),
        }
    }
}

pub enum CoreMsg {
    /// Route a message. `from` is the previous hop (None for local
    /// origin); `hops` is the remaining budget, inserted by the first
    /// receiving endpoint.
    Publish {
        topic: Topic,
        env: Envelope,
        from: Option<NodeId>,
        hops: Option<u8>,
    },
    /// Point-to-point delivery to one actor, relayed across the overlay
    /// when the target lives elsewhere.
    Direct {
        target: PublisherId,
        msg: StoreMessage,
    },
    /// Attach a data subscriber.
    Subscribe {
        id: ActorId,
        filters: Vec<Topic>,
        sink: mpsc::Sender<(Topic, Data)>,
    },
    Unsubscribe {
        id: ActorId,
    },
    /// Attach a store actor under its topic filters.
    RegisterActor {
        id: ActorId,
        filters: Vec<Topic>,
        sink: ActorSink,
    },
    /// Link a peer endpoint; `tx` reaches its core.
    PeerUp {
        info: PeerInfo,
        tx: mpsc::Sender<CoreMsg>,
    },
    PeerDown {
        node: NodeId,
    },
    ListPeers {
        resp: oneshot::Sender<Vec<PeerInfo>>,
    },
    /// Restrict which topics this endpoint relays for others.
    SetForward {
        topics: Vec<Topic>,
    },
    Tick,
    Shutdown,
}

struct DataSub {
    id: ActorId,
    filters: Vec<Topic>,
    sink: mpsc::Sender<(Topic, Data)>,
}

struct ActorEntry {
    id: ActorId,
    filters: Vec<Topic>,
    sink: ActorSink,
}

struct Peer {
    tx: mpsc::Sender<CoreMsg>,
    info: PeerInfo,
}

struct Core {
    node: NodeId,
    forward: bool,
    ttl: u8,
    subs: Vec<DataSub>,
    actors: Vec<ActorEntry>,
    peers: Vec<Peer>,
    forward_topics: Vec<Topic>,
    events: broadcast::Sender<EndpointEvent>,
    rx: mpsc::Receiver<CoreMsg>,
}

impl Core {
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                CoreMsg::Publish { topic, env, from, hops } => {
                    self.route(topic, env, from, hops);
                }
                CoreMsg::Direct { target, msg } => self.direct(target, msg),
                CoreMsg::Subscribe { id, filters, sink } => {
                    self.subs.push(DataSub { id, filters, sink });
                }
                CoreMsg::Unsubscribe { id } => {
                    self.subs.retain(|s| s.id != id);
                }
                CoreMsg::RegisterActor { id, filters, sink } => {
                    self.actors.push(ActorEntry { id, filters, sink });
                }
                CoreMsg::PeerUp { info, tx } => {
                    let node = info.node;
                    if self.peers.iter().any(|p| p.info.node == node) {
                        debug!(peer = %node.fmt_short(), "already peered");
                        continue;
                    }
                    info!(peer = %node.fmt_short(), "peer up");
                    self.peers.push(Peer { tx, info: info.clone() });
                    let _ = self.events.send(EndpointEvent::PeerAdded(info));
                    for actor in &self.actors {
                        actor.sink.peer_up(node);
                    }
                }
                CoreMsg::PeerDown { node } => {
                    let before = self.peers.len();
                    self.peers.retain(|p| p.info.node != node);
                    if self.peers.len() != before {
                        info!(peer = %node.fmt_short(), "peer down");
                        let _ = self.events.send(EndpointEvent::PeerLost(node));
                        for actor in &self.actors {
                            actor.sink.peer_down(node);
                        }
                    }
                }
                CoreMsg::ListPeers { resp } => {
                    let _ = resp.send(self.peers.iter().map(|p| p.info.clone()).collect());
                }
                CoreMsg::SetForward { topics } => {
                    self.forward_topics = topics;
                }
                CoreMsg::Tick => {
                    for actor in &self.actors {
                        actor.sink.tick();
                    }
                }
                CoreMsg::Shutdown => {
                    for peer in &self.peers {
                        let _ = peer.tx.try_send(CoreMsg::PeerDown { node: self.node });
                    }
                    for actor in &self.actors {
                        actor.sink.shutdown();
                    }
                    break;
                }
            }
        }
        debug!(node = %self.node.fmt_short(), "core terminated");
    }

    fn route(&mut self, topic: Topic, env: Envelope, from: Option<NodeId>, hops: Option<u8>) {
        // Local delivery first.
        match &env {
            Envelope::Data(data) => {
                for sub in &self.subs {
                    if sub.filters.iter().any(|f| topic.starts_with(f)) {
                        let _ = sub.sink.try_send((topic.clone(), data.clone()));
                    }
                }
            }
            Envelope::Store(msg) => {
                for actor in &self.actors {
                    if actor.filters.iter().any(|f| topic.starts_with(f)) {
                        actor.sink.remote(msg.clone());
                    }
                }
            }
        }

        if self.peers.is_empty() {
            return;
        }

        // Local messages always go out; relayed ones obey the forward
        // flag, the per-topic filter, and the hop budget the first
        // receiver inserted (counting itself).
        let next_hops = match from {
            None => None,
            Some(_) => {
                if !self.forward || !self.forwards(&topic) {
                    return;
                }
                let remaining = hops.unwrap_or(self.ttl).saturating_sub(1);
                if remaining == 0 {
                    debug!(topic = %topic, "dropping message at hop limit");
                    return;
                }
                Some(remaining)
            }
        };
        for peer in &self.peers {
            if Some(peer.info.node) == from {
                continue;
            }
            let _ = peer.tx.try_send(CoreMsg::Publish {
                topic: topic.clone(),
                env: env.clone(),
                from: Some(self.node),
                hops: next_hops,
            });
        }
    }

    fn direct(&mut self, target: PublisherId, msg: StoreMessage) {
        if target.node == self.node {
            match self.actors.iter().find(|a| a.id == target.actor) {
                Some(actor) => actor.sink.remote(msg),
                None => warn!(target = %target, "direct send to unknown local actor"),
            }
            return;
        }
        match self.peers.iter().find(|p| p.info.node == target.node) {
            Some(peer) => {
                let _ = peer.tx.try_send(CoreMsg::Direct { target, msg });
            }
            None => warn!(target = %target, "direct send to unpeered node"),
        }
    }

    fn forwards(&self, topic: &Topic) -> bool {
        self.forward_topics.is_empty()
            || self.forward_topics.iter().any(|f| topic.starts_with(f))
    }
}

/// Cloneable handle to a core, usable from async contexts, worker
/// threads, and store actors alike.
#[derive(Clone)]
pub struct CoreHandle {
    node: NodeId,
    tx: mpsc::Sender<CoreMsg>,
}

impl CoreHandle {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<CoreMsg> {
        self.tx.clone()
    }

    pub(crate) async fn send(&self, msg: CoreMsg) -> bool {
        self.tx.send(msg).await.is_ok()
    }

    /// Worker-thread publish of one data message.
    pub(crate) fn blocking_publish(&self, topic: Topic, data: Data) -> bool {
        self.tx
            .blocking_send(CoreMsg::Publish {
                topic,
                env: Envelope::Data(data),
                from: None,
                hops: None,
            })
            .is_ok()
    }

    /// Room left in the core mailbox; publishers report it as demand.
    pub(crate) fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

// Store actors run on their own threads and talk to the core through
// this seam.
impl StoreCore for CoreHandle {
    fn publish(&self, topic: &Topic, msg: StoreMessage) {
        let _ = self.tx.blocking_send(CoreMsg::Publish {
            topic: topic.clone(),
            env: Envelope::Store(msg),
            from: None,
            hops: None,
        });
    }

    fn direct(&self, target: PublisherId, msg: StoreMessage) {
        let _ = self.tx.blocking_send(CoreMsg::Direct { target, msg });
    }
}

/// Spawn the core task for one endpoint.
pub(crate) fn spawn_core(
    node: NodeId,
    forward: bool,
    ttl: u8,
    events: broadcast::Sender<EndpointEvent>,
) -> (CoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(256);
    let core = Core {
        node,
        forward,
        ttl,
        subs: Vec::new(),
        actors: Vec::new(),
        peers: Vec::new(),
        forward_topics: Vec::new(),
        events,
        rx,
    };
    let handle = tokio::spawn(core.run());
    (CoreHandle { node, tx }, handle)
}
