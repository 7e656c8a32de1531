//! Endpoint: one process's seat in the fabric

use crate::config::{Configuration, DEFAULT_TICK_INTERVAL};
use crate::core::{spawn_core, ActorSink, CoreHandle, CoreMsg, Envelope, PeerInfo, PeerStatus};
use crate::overlay::{BindError, Listener, Overlay};
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use broker_model::version::{compatible, ProtocolVersion};
use broker_model::{
    ActorId, Clock, Data, EndpointInfo, Error, ErrorCode, NetworkInfo, NodeId, PublisherId,
    SimClock, SystemClock, Timespan, Topic,
};
use broker_store::{spawn_clone, spawn_master, Backend, Store};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::info;

/// Peering lifecycle notifications for the embedding application.
#[derive(Clone, Debug)]
pub enum EndpointEvent {
    PeerAdded(PeerInfo),
    PeerLost(NodeId),
}

/// How many connect attempts `peer` makes before giving up.
const PEER_ATTEMPTS: u32 = 5;

/// A participant in the overlay: owns a node id, a core router, and any
/// number of stores, publishers, and subscribers.
pub struct Endpoint {
    node: NodeId,
    config: Configuration,
    clock: Arc<dyn Clock>,
    sim: Option<SimClock>,
    core: CoreHandle,
    overlay: Overlay,
    events: broadcast::Sender<EndpointEvent>,
    next_actor: AtomicU64,
    stores: Mutex<HashMap<String, Store>>,
    listens: std::sync::Mutex<Vec<NetworkInfo>>,
    ticker: Option<tokio::task::JoinHandle<()>>,
}

impl Endpoint {
    /// Create an endpoint on `overlay`. Must run inside a tokio runtime;
    /// with `use_real_time` a ticker task drives ACKs, NACKs, and
    /// expiries, otherwise the application advances time itself via
    /// [`Endpoint::advance_time`].
    pub fn new(config: Configuration, overlay: Overlay) -> Self {
        let node = NodeId::random();
        let (events, _) = broadcast::channel(64);
        let (core, _core_task) = spawn_core(
            node,
            config.options.forward,
            config.options.ttl,
            events.clone(),
        );

        let (clock, sim): (Arc<dyn Clock>, Option<SimClock>) = if config.options.use_real_time {
            (Arc::new(SystemClock), None)
        } else {
            let sim = SimClock::new();
            (Arc::new(sim.clone()), Some(sim))
        };

        let ticker = config.options.use_real_time.then(|| {
            let core = core.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(DEFAULT_TICK_INTERVAL);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if !core.send(CoreMsg::Tick).await {
                        return;
                    }
                }
            })
        });

        info!(node = %node.fmt_short(), "endpoint up");
        Self {
            node,
            config,
            clock,
            sim,
            core,
            overlay,
            events,
            next_actor: AtomicU64::new(1),
            stores: Mutex::new(HashMap::new()),
            listens: std::sync::Mutex::new(Vec::new()),
            ticker,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn options(&self) -> &crate::config::BrokerOptions {
        &self.config.options
    }

    /// Subscribe to peering lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<EndpointEvent> {
        self.events.subscribe()
    }

    // ==================== Stores ====================

    /// Attach the authoritative master for a named store.
    pub async fn attach_master(
        &self,
        name: &str,
        backend: Box<dyn Backend>,
    ) -> Result<Store, Error> {
        let mut stores = self.stores.lock().await;
        if stores.get(name).is_some_and(|s| s.is_master()) {
            return Err(Error::with_message(
                ErrorCode::MasterExists,
                format!("master {} already attached", name),
            ));
        }
        let id = self.next_id();
        let (tx, _join, events) = spawn_master(
            name.to_string(),
            id,
            backend,
            Box::new(self.core.clone()),
            self.clock.clone(),
        )?;
        self.core
            .send(CoreMsg::RegisterActor {
                id: id.actor,
                filters: vec![master_topic(name)?],
                sink: ActorSink::Master(tx.clone()),
            })
            .await;
        let store = Store::master(name.to_string(), id, tx, events);
        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Attach a clone of a named store. The clone synchronizes in the
    /// background; reads answer `stale_data` until it has.
    pub async fn attach_clone(&self, name: &str) -> Result<Store, Error> {
        let mut stores = self.stores.lock().await;
        let id = self.next_id();
        let (tx, _join, events) = spawn_clone(
            name.to_string(),
            id,
            Box::new(self.core.clone()),
            self.clock.clone(),
        )?;
        self.core
            .send(CoreMsg::RegisterActor {
                id: id.actor,
                filters: vec![clones_topic(name)?],
                sink: ActorSink::Clone(tx.clone()),
            })
            .await;
        let store = Store::clone_frontend(name.to_string(), id, tx, events);
        // A master attached under the same name keeps the registry slot.
        stores.entry(name.to_string()).or_insert_with(|| store.clone());
        Ok(store)
    }

    /// Look up a store previously attached on this endpoint.
    pub async fn store(&self, name: &str) -> Result<Store, Error> {
        self.stores.lock().await.get(name).cloned().ok_or_else(|| {
            Error::with_message(ErrorCode::NoSuchMaster, format!("no store {} here", name))
        })
    }

    // ==================== Messaging ====================

    /// Publish one value directly, without a publisher queue.
    pub async fn publish(&self, topic: Topic, value: Data) {
        self.core
            .send(CoreMsg::Publish {
                topic,
                env: Envelope::Data(value),
                from: None,
                hops: None,
            })
            .await;
    }

    /// A publisher with demand management for one topic.
    pub fn make_publisher(&self, topic: Topic) -> Result<Publisher, Error> {
        Publisher::new(self.core.clone(), topic)
            .map_err(|e| Error::with_message(ErrorCode::Unspecified, e.to_string()))
    }

    /// A subscriber over a set of topic filters.
    pub async fn make_subscriber(&self, topics: Vec<Topic>) -> Result<Subscriber, Error> {
        let id = self.next_id().actor;
        Subscriber::new(self.core.clone(), id, topics)
            .await
            .map_err(|e| Error::with_message(ErrorCode::Unspecified, e.to_string()))
    }

    /// Restrict which topics this endpoint relays between peers.
    pub async fn forward(&self, topics: Vec<Topic>) {
        self.core.send(CoreMsg::SetForward { topics }).await;
    }

    // ==================== Peering ====================

    /// Start listening on `address:port` (0 allocates). Returns the
    /// bound port.
    pub async fn listen(&self, address: &str, port: u16) -> Result<u16, Error> {
        let listener = Listener {
            node: self.node,
            core: self.core.sender(),
            version: ProtocolVersion::current(),
        };
        match self.overlay.bind(address, port, listener) {
            Ok(bound) => {
                self.listens
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(NetworkInfo { address: address.to_string(), port: bound });
                info!(node = %self.node.fmt_short(), address, port = bound, "listening");
                Ok(bound)
            }
            Err(BindError::AddressInUse) => Err(Error::with_message(
                ErrorCode::CannotOpenFile,
                format!("{}:{} already in use", address, port),
            )),
        }
    }

    /// Peer with the endpoint listening at `address:port`, retrying at
    /// `retry` intervals before giving up. Synchronous in the sense of
    /// the API: the future resolves once the link exists (or failed for
    /// good).
    pub async fn peer(&self, address: &str, port: u16, retry: Timespan) -> Result<PeerInfo, Error> {
        let network = NetworkInfo { address: address.to_string(), port };
        let mut attempts_left = if retry.nanos() > 0 { PEER_ATTEMPTS } else { 1 };
        let listener = loop {
            match self.overlay.lookup(address, port) {
                Some(l) => break l,
                None => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(Error::with_endpoint(
                            ErrorCode::PeerUnavailable,
                            EndpointInfo { node: None, network: Some(network) },
                            "remote peer not listening",
                        ));
                    }
                    tokio::time::sleep(retry.to_duration()).await;
                }
            }
        };

        if listener.node == self.node {
            return Err(Error::with_message(
                ErrorCode::PeerInvalid,
                "endpoint cannot peer with itself",
            ));
        }
        if !compatible(ProtocolVersion::current(), listener.version) {
            return Err(Error::with_endpoint(
                ErrorCode::PeerIncompatible,
                EndpointInfo { node: Some(listener.node), network: Some(network) },
                format!("remote speaks {}", listener.version),
            ));
        }

        let info = PeerInfo {
            node: listener.node,
            network: network.clone(),
            status: PeerStatus::Peered,
        };
        // Link both cores. The remote learns our side under our first
        // listen address, or a port of 0 if we never listened.
        let our_network = self
            .listens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .first()
            .cloned()
            .unwrap_or(NetworkInfo { address: "local".to_string(), port: 0 });
        self.core
            .send(CoreMsg::PeerUp { info: info.clone(), tx: listener.core.clone() })
            .await;
        let _ = listener
            .core
            .send(CoreMsg::PeerUp {
                info: PeerInfo {
                    node: self.node,
                    network: our_network,
                    status: PeerStatus::Peered,
                },
                tx: self.core.sender(),
            })
            .await;
        Ok(info)
    }

    /// Fire-and-forget variant of [`Endpoint::peer`].
    pub fn peer_nosync(self: &Arc<Self>, address: String, port: u16, retry: Timespan) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.peer(&address, port, retry).await;
        });
    }

    /// Tear down the link to the endpoint at `address:port`.
    pub async fn unpeer(&self, address: &str, port: u16) -> Result<(), Error> {
        let network = NetworkInfo { address: address.to_string(), port };
        let Some(listener) = self.overlay.lookup(address, port) else {
            return Err(Error::with_endpoint(
                ErrorCode::PeerInvalid,
                EndpointInfo { node: None, network: Some(network) },
                "no such peer",
            ));
        };
        if !self.peers().await.iter().any(|p| p.node == listener.node) {
            return Err(Error::with_endpoint(
                ErrorCode::PeerInvalid,
                EndpointInfo { node: Some(listener.node), network: Some(network) },
                "not peered",
            ));
        }
        self.core.send(CoreMsg::PeerDown { node: listener.node }).await;
        let _ = listener.core.send(CoreMsg::PeerDown { node: self.node }).await;
        Ok(())
    }

    /// Fire-and-forget variant of [`Endpoint::unpeer`].
    pub fn unpeer_nosync(self: &Arc<Self>, address: String, port: u16) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.unpeer(&address, port).await;
        });
    }

    /// Current peerings.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        let (resp, rx) = oneshot::channel();
        self.core.send(CoreMsg::ListPeers { resp }).await;
        rx.await.unwrap_or_default()
    }

    // ==================== Time ====================

    /// Under the simulated clock, advance time and deliver one tick to
    /// every store actor. A no-op under the real clock.
    pub async fn advance_time(&self, span: Timespan) {
        if let Some(sim) = &self.sim {
            sim.advance(span);
            self.core.send(CoreMsg::Tick).await;
        }
    }

    /// Deliver one tick without advancing the simulated clock.
    pub async fn tick(&self) {
        self.core.send(CoreMsg::Tick).await;
    }

    /// Stop the core, the ticker, and every store actor.
    pub async fn shutdown(&self) {
        if let Some(ticker) = &self.ticker {
            ticker.abort();
        }
        self.overlay.unbind_node(self.node);
        self.core.send(CoreMsg::Shutdown).await;
        info!(node = %self.node.fmt_short(), "endpoint down");
    }

    fn next_id(&self) -> PublisherId {
        PublisherId::new(self.node, ActorId(self.next_actor.fetch_add(1, Ordering::Relaxed)))
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

fn master_topic(name: &str) -> Result<Topic, Error> {
    Topic::master_for(name)
        .map_err(|e| Error::with_message(ErrorCode::InvalidTopicKey, e.to_string()))
}

fn clones_topic(name: &str) -> Result<Topic, Error> {
    Topic::clones_for(name)
        .map_err(|e| Error::with_message(ErrorCode::InvalidTopicKey, e.to_string()))
}
