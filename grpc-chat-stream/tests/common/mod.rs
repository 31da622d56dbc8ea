//! In-memory stand-ins for a client's duplex stream.

#![allow(dead_code)]

use std::{
    future::pending,
    net::SocketAddr,
    sync::atomic::{AtomicU16, Ordering},
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use grpc_chat_stream::{
    ChatMessage, ChatServer, Registry, SessionError,
    transport::{ChatInbound, ChatOutbound},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tonic::Status;

pub const WAIT: Duration = Duration::from_secs(2);

static NEXT_PORT: AtomicU16 = AtomicU16::new(40_000);

pub fn peer_addr() -> Option<SocketAddr> {
    let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
    Some(SocketAddr::from(([127, 0, 0, 1], port)))
}

/// What the server reads from a client. Dropping the script half-closes it.
pub struct ScriptedInbound {
    rx: mpsc::UnboundedReceiver<Result<ChatMessage, Status>>,
}

#[async_trait]
impl ChatInbound for ScriptedInbound {
    async fn receive(&mut self) -> Result<Option<ChatMessage>, Status> {
        match self.rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(status)) => Err(status),
            None => Ok(None),
        }
    }
}

/// What the server writes to a client.
pub struct RecordingOutbound {
    tx: mpsc::UnboundedSender<ChatMessage>,
    cancel: watch::Receiver<bool>,
}

#[async_trait]
impl ChatOutbound for RecordingOutbound {
    async fn send(&mut self, message: ChatMessage) -> Result<(), Status> {
        self.tx
            .send(message)
            .map_err(|_| Status::unavailable("test peer dropped"))
    }

    async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        let cancelled = cancel.wait_for(|cancelled| *cancelled).await.is_ok();
        if !cancelled {
            pending::<()>().await;
        }
    }
}

/// The client's side of an in-memory connection.
pub struct TestPeer {
    script: Option<mpsc::UnboundedSender<Result<ChatMessage, Status>>>,
    received: mpsc::UnboundedReceiver<ChatMessage>,
    cancel: watch::Sender<bool>,
}

impl TestPeer {
    pub fn say(&self, username: &str, text: &str) {
        if let Some(script) = &self.script {
            let _ = script.send(Ok(ChatMessage::new(username, text)));
        }
    }

    pub fn fail(&self, status: Status) {
        if let Some(script) = &self.script {
            let _ = script.send(Err(status));
        }
    }

    /// Ends the client's sending side without going away.
    pub fn half_close(&mut self) {
        self.script = None;
    }

    /// Simulates the client vanishing, as tonic reports a dropped call.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub async fn next(&mut self) -> Result<ChatMessage> {
        timeout(WAIT, self.received.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for a message"))?
            .ok_or_else(|| anyhow!("outbound stream closed"))
    }

    /// `None` once the server has dropped this peer's outbound side.
    pub async fn next_or_closed(&mut self) -> Result<Option<ChatMessage>> {
        timeout(WAIT, self.received.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for a message or close"))
    }
}

pub fn connection() -> (TestPeer, ScriptedInbound, RecordingOutbound) {
    let (script_tx, script_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let peer = TestPeer {
        script: Some(script_tx),
        received: out_rx,
        cancel: cancel_tx,
    };
    let inbound = ScriptedInbound { rx: script_rx };
    let outbound = RecordingOutbound {
        tx: out_tx,
        cancel: cancel_rx,
    };
    (peer, inbound, outbound)
}

/// Never sends anything and never goes away.
pub struct Idle;

#[async_trait]
impl ChatInbound for Idle {
    async fn receive(&mut self) -> Result<Option<ChatMessage>, Status> {
        pending().await
    }
}

/// A client that stopped reading: every write hangs.
pub struct Stalled;

#[async_trait]
impl ChatOutbound for Stalled {
    async fn send(&mut self, _message: ChatMessage) -> Result<(), Status> {
        pending().await
    }

    async fn cancelled(&self) {
        pending().await
    }
}

/// A client whose connection breaks on the first write.
pub struct Broken;

#[async_trait]
impl ChatOutbound for Broken {
    async fn send(&mut self, _message: ChatMessage) -> Result<(), Status> {
        Err(Status::unavailable("connection reset"))
    }

    async fn cancelled(&self) {
        pending().await
    }
}

pub fn spawn_session<I, O>(
    server: &ChatServer,
    inbound: I,
    outbound: O,
) -> JoinHandle<Result<(), SessionError>>
where
    I: ChatInbound,
    O: ChatOutbound,
{
    let server = server.clone();
    tokio::spawn(async move { server.handle(peer_addr(), inbound, outbound).await })
}

pub async fn wait_for_connections(registry: &Registry, expected: usize) -> Result<()> {
    timeout(WAIT, async {
        while registry.len().await != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("registry never reached {expected} connections"))
}

pub async fn session_result(
    handle: JoinHandle<Result<(), SessionError>>,
) -> Result<Result<(), SessionError>> {
    let joined = timeout(WAIT, handle)
        .await
        .map_err(|_| anyhow!("session did not end"))?;
    Ok(joined?)
}
