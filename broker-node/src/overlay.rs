//! In-memory overlay: the process-wide registry endpoints peer through
//!
//! Maps listen addresses to endpoint cores so `peer(address, port)`
//! resolves without sockets. A real transport implements the same
//! listen/connect surface over the network.

use crate::core::CoreMsg;
use broker_model::version::ProtocolVersion;
use broker_model::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// One endpoint listening on `(address, port)`.
#[derive(Clone)]
pub(crate) struct Listener {
    pub node: NodeId,
    pub core: mpsc::Sender<CoreMsg>,
    pub version: ProtocolVersion,
}

/// Shared registry. Endpoints created with the same overlay can peer
/// with each other; the default `Overlay::new()` per test gives full
/// isolation.
#[derive(Clone, Default)]
pub struct Overlay {
    listeners: Arc<Mutex<HashMap<(String, u16), Listener>>>,
    next_port: Arc<AtomicU16>,
}

impl Overlay {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            // Start in the ephemeral range, like a kernel would.
            next_port: Arc::new(AtomicU16::new(49152)),
        }
    }

    /// Bind a listener. Port 0 allocates one; an occupied address fails.
    pub(crate) fn bind(
        &self,
        address: &str,
        port: u16,
        listener: Listener,
    ) -> Result<u16, BindError> {
        let mut map = self.lock();
        let port = if port == 0 {
            loop {
                let candidate = self.next_port.fetch_add(1, Ordering::Relaxed);
                if candidate != 0 && !map.contains_key(&(address.to_string(), candidate)) {
                    break candidate;
                }
            }
        } else {
            port
        };
        let key = (address.to_string(), port);
        if map.contains_key(&key) {
            return Err(BindError::AddressInUse);
        }
        map.insert(key, listener);
        Ok(port)
    }

    pub(crate) fn lookup(&self, address: &str, port: u16) -> Option<Listener> {
        self.lock().get(&(address.to_string(), port)).cloned()
    }

    pub(crate) fn unbind_node(&self, node: NodeId) {
        self.lock().retain(|_, l| l.node != node);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, u16), Listener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindError {
    AddressInUse,
}
