//! One duplex connection: registration, the receive and send loops, and
//! teardown.
//!
//! ```text
//! Connecting ──add──▶ Active ──first terminal report──▶ Closing ──remove──▶ Closed
//!      └──────────── no peer / duplicate id ─────────────────────────────────▶ Closed
//! ```
//!
//! While `Active` the receive loop feeds the registry and the send loop drains
//! the connection's outbox. Each loop reports its terminal condition on a
//! completion channel sized for both reports, so neither loop ever waits on
//! it; the session acts on whichever arrives first.
//!
//! Dropping a session at any point, before or during [`Session::run`], aborts
//! its loops and deregisters its id.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    runtime::Handle,
    select,
    sync::{mpsc, watch},
    task::JoinSet,
    time::sleep,
};
use tonic::Status;
use tracing::{debug, info, warn};

use crate::{
    registry::{ConnectionId, Outbox, Registry, RegistryError},
    transport::{ChatInbound, ChatOutbound},
};

/// Pause before polling again after the peer half-closed its sending side.
pub const DEFAULT_RECEIVE_RETRY: Duration = Duration::from_millis(100);

/// Capacity of the per-call gRPC response channel.
pub const DEFAULT_RESPONSE_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub receive_retry: Duration,
    pub response_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            receive_retry: DEFAULT_RECEIVE_RETRY,
            response_buffer: DEFAULT_RESPONSE_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session ended. Every session produces exactly one.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to identify peer")]
    PeerIdentification,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("receive from peer failed: {0}")]
    Receive(Status),
    #[error("send to peer failed: {0}")]
    Send(Status),
    #[error("outbound channel closed")]
    ChannelClosed,
    #[error("stream cancelled by peer")]
    Cancelled,
    #[error("session loops stopped without reporting")]
    Aborted,
}

impl From<SessionError> for Status {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::PeerIdentification => Status::failed_precondition(message),
            SessionError::Registry(RegistryError::ShutDown) => Status::unavailable(message),
            SessionError::Registry(_) | SessionError::Aborted => Status::internal(message),
            SessionError::Receive(status) | SessionError::Send(status) => status,
            SessionError::ChannelClosed => Status::unavailable(message),
            SessionError::Cancelled => Status::cancelled(message),
        }
    }
}

/// Keeps `id` registered for as long as it lives.
struct Registration {
    id: ConnectionId,
    registry: Arc<Registry>,
    released: bool,
}

impl Registration {
    async fn release(mut self) {
        self.registry.remove(self.id).await;
        self.released = true;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(connection = %self.id, "no runtime left to deregister connection");
            return;
        };
        let id = self.id;
        let registry = Arc::clone(&self.registry);
        debug!(connection = %id, "session dropped before closing");
        runtime.spawn(async move {
            registry.remove(id).await;
        });
    }
}

/// A registered connection that has not started its loops yet.
pub struct Session<I, O> {
    registration: Registration,
    peer: SocketAddr,
    outbox: Outbox,
    inbound: I,
    outbound: O,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
}

impl<I, O> Session<I, O>
where
    I: ChatInbound,
    O: ChatOutbound,
{
    /// Identifies the peer and registers a fresh connection id.
    ///
    /// On success the session is `Active`: broadcasts issued from now on are
    /// queued in its outbox even before [`Session::run`] is called.
    pub async fn connect(
        registry: Arc<Registry>,
        peer: Option<SocketAddr>,
        inbound: I,
        outbound: O,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let (state, _) = watch::channel(SessionState::Connecting);

        let Some(peer) = peer else {
            warn!("rejecting stream without peer address");
            return Err(SessionError::PeerIdentification);
        };

        let id = registry.next_id();
        let outbox = registry.add(id).await?;
        state.send_replace(SessionState::Active);
        info!(connection = %id, %peer, "connected");

        Ok(Self {
            registration: Registration {
                id,
                registry,
                released: false,
            },
            peer,
            outbox,
            inbound,
            outbound,
            config,
            state,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.registration.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follows the session through `Closing` and `Closed` after it is moved
    /// into [`Session::run`].
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Runs both loops until one of them reports, then deregisters.
    ///
    /// Returns the first terminal condition observed. The other loop is
    /// aborted and awaited before deregistration, so nothing of this session
    /// is left running once `Closed` is published.
    pub async fn run(self) -> SessionError {
        let Session {
            registration,
            peer,
            outbox,
            inbound,
            outbound,
            config,
            state,
        } = self;
        let id = registration.id;

        // Declared after `registration` so a dropped `run` aborts the loops
        // before the id is handed back.
        let mut loops = JoinSet::new();
        let (done_tx, mut done_rx) = mpsc::channel(2);
        loops.spawn(report(
            done_tx.clone(),
            receive_loop(
                id,
                inbound,
                Arc::clone(&registration.registry),
                config.receive_retry,
            ),
        ));
        loops.spawn(report(done_tx, send_loop(outbound, outbox)));

        let reason = done_rx.recv().await.unwrap_or(SessionError::Aborted);
        transition(&state, id, SessionState::Closing);

        loops.abort_all();
        while loops.join_next().await.is_some() {}

        registration.release().await;
        transition(&state, id, SessionState::Closed);
        info!(connection = %id, %peer, reason = %reason, "disconnected");

        reason
    }
}

fn transition(state: &watch::Sender<SessionState>, id: ConnectionId, next: SessionState) {
    let previous = state.send_replace(next);
    debug!(connection = %id, ?previous, ?next, "session state changed");
}

async fn report<F>(done: mpsc::Sender<SessionError>, terminal: F)
where
    F: Future<Output = SessionError>,
{
    let reason = terminal.await;
    // Capacity 2 with one report per loop: this never fails for lack of room,
    // only when the session has already stopped listening.
    let _ = done.try_send(reason);
}

async fn receive_loop<I: ChatInbound>(
    id: ConnectionId,
    mut inbound: I,
    registry: Arc<Registry>,
    retry: Duration,
) -> SessionError {
    loop {
        match inbound.receive().await {
            Ok(Some(message)) => {
                info!(
                    connection = %id,
                    username = %message.username,
                    text = %message.message,
                    "message received"
                );
                let delivered = registry.broadcast(&message).await;
                debug!(connection = %id, delivered, "message broadcast");
            }
            Ok(None) => {
                // Half-closed peers stay registered and keep receiving.
                sleep(retry).await;
            }
            Err(status) => return SessionError::Receive(status),
        }
    }
}

async fn send_loop<O: ChatOutbound>(mut outbound: O, mut outbox: Outbox) -> SessionError {
    loop {
        select! {
            _ = outbound.cancelled() => return SessionError::Cancelled,
            next = outbox.recv() => match next {
                Some(message) => {
                    if let Err(status) = outbound.send(message).await {
                        return SessionError::Send(status);
                    }
                }
                None => return SessionError::ChannelClosed,
            },
        }
    }
}
