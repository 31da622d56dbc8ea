//! Duplex stream seams the session runs on.
//!
//! A session only needs to pull messages from its peer, push messages to its
//! peer and learn when the peer has gone away. The two halves are separate
//! traits because the receive and send loops own them from different tasks.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tonic::{Status, Streaming};

use crate::message::ChatMessage;

#[async_trait]
pub trait ChatInbound: Send + 'static {
    /// Next message from the peer. `Ok(None)` is a clean end of stream (the
    /// peer half-closed its side); it is not an error.
    async fn receive(&mut self) -> Result<Option<ChatMessage>, Status>;
}

#[async_trait]
pub trait ChatOutbound: Send + Sync + 'static {
    async fn send(&mut self, message: ChatMessage) -> Result<(), Status>;

    /// Resolves once the peer can no longer be written to.
    async fn cancelled(&self);
}

/// Request half of a tonic `Chat` call.
pub struct GrpcInbound {
    stream: Streaming<ChatMessage>,
}

impl GrpcInbound {
    pub fn new(stream: Streaming<ChatMessage>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl ChatInbound for GrpcInbound {
    async fn receive(&mut self) -> Result<Option<ChatMessage>, Status> {
        self.stream.message().await
    }
}

pub type ResponseSender = mpsc::Sender<Result<ChatMessage, Status>>;

/// Response half of a tonic `Chat` call: the sender feeding the
/// `ReceiverStream` handed back to tonic. Tonic drops the receiver when the
/// client goes away, which is what [`ChatOutbound::cancelled`] waits for.
pub struct GrpcOutbound {
    tx: ResponseSender,
}

impl GrpcOutbound {
    pub fn new(tx: ResponseSender) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ChatOutbound for GrpcOutbound {
    async fn send(&mut self, message: ChatMessage) -> Result<(), Status> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| Status::unavailable("response stream dropped"))
    }

    async fn cancelled(&self) {
        self.tx.closed().await;
    }
}
