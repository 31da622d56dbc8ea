use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::message::ChatMessage;

/// Receive side of a connection's outbound channel.
pub type Outbox = mpsc::UnboundedReceiver<ChatMessage>;

/// Identity assigned to every accepted stream.
///
/// Drawn from a monotonic counter rather than the peer address, since two
/// connections behind the same NAT or proxy can report the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateIdentity(ConnectionId),
    #[error("registry is shut down")]
    ShutDown,
}

/// Live connections and their outbound channels.
///
/// Every operation runs under one lock, so adds, removes and broadcasts are
/// totally ordered: all connections observe broadcasts in the same order, and
/// a connection added after a broadcast started never sees it.
///
/// The registry holds the only sender of each channel. Dropping it on
/// [`Registry::remove`] is what closes the channel, so a channel can only be
/// closed once.
pub struct Registry {
    clients: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<ChatMessage>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn add(&self, id: ConnectionId) -> Result<Outbox, RegistryError> {
        let mut clients = self.clients.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::ShutDown);
        }
        if clients.contains_key(&id) {
            return Err(RegistryError::DuplicateIdentity(id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        clients.insert(id, tx);
        debug!(connection = %id, online = clients.len(), "registered connection");
        Ok(rx)
    }

    /// Closes and forgets `id`'s channel. Returns `false` when `id` was not
    /// registered, which makes repeated removal harmless.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let mut clients = self.clients.lock().await;
        let removed = clients.remove(&id).is_some();
        if removed {
            debug!(connection = %id, online = clients.len(), "deregistered connection");
        }
        removed
    }

    /// Enqueues a copy of `message` for every registered connection, the
    /// sender included. Returns how many channels accepted it.
    ///
    /// Channels are unbounded, so this never waits on a slow reader while
    /// holding the lock; a reader that stops draining only grows its own queue.
    pub async fn broadcast(&self, message: &ChatMessage) -> usize {
        let clients = self.clients.lock().await;
        let mut delivered = 0;
        for (id, tx) in clients.iter() {
            // Fails only if the session already dropped its outbox and is on
            // its way to `remove`.
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(connection = %id, "outbox dropped, skipping");
            }
        }
        delivered
    }

    /// Closes every channel at once and refuses later adds. Sessions see this
    /// as [`SessionError::ChannelClosed`](crate::session::SessionError::ChannelClosed).
    pub async fn shutdown(&self) -> usize {
        let mut clients = self.clients.lock().await;
        self.closed.store(true, Ordering::Release);
        let closed = clients.len();
        clients.clear();
        info!(closed, "closed all connection channels");
        closed
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.clients.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
