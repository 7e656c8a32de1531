//! Store frontend: a cloneable handle over a master or clone actor

use crate::clone::CloneMsg;
use crate::command::Command;
use crate::events::StoreEvent;
use crate::master::MasterMsg;
use broker_model::{Data, DataType, Error, ErrorCode, PublisherId, Timespan};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Default deadline for request/response operations.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
enum Target {
    Master(mpsc::Sender<MasterMsg>),
    Clone(mpsc::Sender<CloneMsg>),
}

/// Handle to one named store. Reads go to the local actor (masters
/// answer from the authoritative state, clones from their replica);
/// writes go through the master either way.
#[derive(Clone)]
pub struct Store {
    name: String,
    id: PublisherId,
    target: Target,
    events: broadcast::Sender<StoreEvent>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("master", &self.is_master())
            .finish()
    }
}

impl Store {
    pub fn master(
        name: String,
        id: PublisherId,
        tx: mpsc::Sender<MasterMsg>,
        events: broadcast::Sender<StoreEvent>,
    ) -> Self {
        Self { name, id, target: Target::Master(tx), events }
    }

    pub fn clone_frontend(
        name: String,
        id: PublisherId,
        tx: mpsc::Sender<CloneMsg>,
        events: broadcast::Sender<StoreEvent>,
    ) -> Self {
        Self { name, id, target: Target::Clone(tx), events }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_master(&self) -> bool {
        matches!(self.target, Target::Master(_))
    }

    /// Subscribe to this store's change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // ==================== Reads ====================

    pub async fn get(&self, key: Data) -> Result<Data, Error> {
        let (resp, rx) = oneshot::channel();
        match &self.target {
            Target::Master(tx) => send(tx, MasterMsg::Get { key, aspect: None, resp }).await?,
            Target::Clone(tx) => send(tx, CloneMsg::Get { key, aspect: None, resp }).await?,
        }
        self.await_reply(rx).await?
    }

    /// Read one aspect of a container value under `key`.
    pub async fn get_index(&self, key: Data, aspect: Data) -> Result<Data, Error> {
        let (resp, rx) = oneshot::channel();
        match &self.target {
            Target::Master(tx) => {
                send(tx, MasterMsg::Get { key, aspect: Some(aspect), resp }).await?
            }
            Target::Clone(tx) => {
                send(tx, CloneMsg::Get { key, aspect: Some(aspect), resp }).await?
            }
        }
        self.await_reply(rx).await?
    }

    pub async fn exists(&self, key: Data) -> Result<bool, Error> {
        let (resp, rx) = oneshot::channel();
        match &self.target {
            Target::Master(tx) => send(tx, MasterMsg::Exists { key, resp }).await?,
            Target::Clone(tx) => send(tx, CloneMsg::Exists { key, resp }).await?,
        }
        self.await_reply(rx).await?
    }

    pub async fn keys(&self) -> Result<Data, Error> {
        let (resp, rx) = oneshot::channel();
        match &self.target {
            Target::Master(tx) => send(tx, MasterMsg::Keys { resp }).await?,
            Target::Clone(tx) => send(tx, CloneMsg::Keys { resp }).await?,
        }
        self.await_reply(rx).await?
    }

    // ==================== Writes ====================

    pub async fn put(
        &self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
    ) -> Result<(), Error> {
        self.mutate(Command::Put { key, value, expiry, publisher: self.id })
            .await
    }

    /// Insert only if absent. Returns whether the insert took place; an
    /// existing key answers `false`, not an error.
    pub async fn put_unique(
        &self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
    ) -> Result<bool, Error> {
        let (resp, rx) = oneshot::channel();
        match &self.target {
            Target::Master(tx) => {
                send(tx, MasterMsg::PutUnique { key, value, expiry, resp }).await?
            }
            Target::Clone(tx) => {
                send(tx, CloneMsg::PutUnique { key, value, expiry, resp }).await?
            }
        }
        self.await_reply(rx).await?
    }

    pub async fn erase(&self, key: Data) -> Result<(), Error> {
        self.mutate(Command::Erase { key, publisher: self.id }).await
    }

    /// Increment-or-initialize by `init_type`.
    pub async fn add(
        &self,
        key: Data,
        value: Data,
        init_type: DataType,
        expiry: Option<Timespan>,
    ) -> Result<(), Error> {
        self.mutate(Command::Add { key, value, init_type, expiry, publisher: self.id })
            .await
    }

    pub async fn subtract(
        &self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
    ) -> Result<(), Error> {
        self.mutate(Command::Subtract { key, value, expiry, publisher: self.id })
            .await
    }

    pub async fn clear(&self) -> Result<(), Error> {
        self.mutate(Command::Clear { publisher: self.id }).await
    }

    // ==================== Plumbing ====================

    async fn mutate(&self, cmd: Command) -> Result<(), Error> {
        match &self.target {
            Target::Master(tx) => send(tx, MasterMsg::Local(cmd)).await,
            Target::Clone(tx) => send(tx, CloneMsg::Local(cmd)).await,
        }
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, Error> {
        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Err(_) => Err(Error::with_message(
                ErrorCode::RequestTimeout,
                format!("store {} did not answer in time", self.name),
            )),
            Ok(Err(_)) => Err(actor_gone()),
            Ok(Ok(result)) => Ok(result),
        }
    }
}

fn actor_gone() -> Error {
    Error::with_message(ErrorCode::Unspecified, "store actor terminated")
}

async fn send<M>(tx: &mpsc::Sender<M>, msg: M) -> Result<(), Error> {
    tx.send(msg).await.map_err(|_| actor_gone())
}
