use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Code, Request, Response, Status, Streaming, transport::Server};
use tracing::{debug, info, warn};

use crate::{
    message::{
        ChatMessage,
        proto::chat_service_server::{ChatService, ChatServiceServer},
    },
    registry::{ConnectionId, Registry},
    session::{Session, SessionConfig, SessionError},
    transport::{ChatInbound, ChatOutbound, GrpcInbound, GrpcOutbound, ResponseSender},
};

/// Broadcast chat service. Clones share one registry.
#[derive(Clone)]
pub struct ChatServer {
    registry: Arc<Registry>,
    config: SessionConfig,
}

impl ChatServer {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Runs one connection from registration to teardown and returns how it
    /// ended. A registry-forced close is a normal end and yields `Ok(())`.
    pub async fn handle<I, O>(
        &self,
        peer: Option<SocketAddr>,
        inbound: I,
        outbound: O,
    ) -> Result<(), SessionError>
    where
        I: ChatInbound,
        O: ChatOutbound,
    {
        let session = Session::connect(
            Arc::clone(&self.registry),
            peer,
            inbound,
            outbound,
            self.config,
        )
        .await?;
        finish(session.run().await)
    }

    /// Serves `stream.ChatService` on `listener` until `shutdown` resolves,
    /// then closes every connection channel so open sessions wind down.
    ///
    /// Calls still arriving while tonic drains are refused by the registry
    /// with `Unavailable` rather than outliving the close.
    pub async fn serve_until<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let registry = Arc::clone(&self.registry);
        let signal = async move {
            shutdown.await;
            handle_shutdown(&registry).await;
        };

        Server::builder()
            .add_service(ChatServiceServer::new(self))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .context("chat server failed")
    }

    pub async fn serve_until_ctrl_c(self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

impl Default for ChatServer {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

async fn handle_shutdown(registry: &Registry) {
    info!("chat server shutting down");
    registry.shutdown().await;
}

fn finish(reason: SessionError) -> Result<(), SessionError> {
    match reason {
        SessionError::ChannelClosed => Ok(()),
        other => Err(other),
    }
}

/// Best effort: the peer is usually gone already when a session fails.
fn report_terminal(tx: &ResponseSender, id: ConnectionId, err: SessionError) {
    if client_left(&err) {
        debug!(connection = %id, reason = %err, "client left");
        return;
    }
    warn!(connection = %id, error = %err, "chat session failed");
    if tx.try_send(Err(Status::from(err))).is_err() {
        debug!(connection = %id, "peer no longer listening for terminal status");
    }
}

/// A dropped call usually surfaces as a cancelled read before the response
/// side notices, so both count as the client leaving.
fn client_left(err: &SessionError) -> bool {
    match err {
        SessionError::Cancelled | SessionError::Send(_) => true,
        SessionError::Receive(status) => status.code() == Code::Cancelled,
        _ => false,
    }
}

#[tonic::async_trait]
impl ChatService for ChatServer {
    type ChatStream = ReceiverStream<Result<ChatMessage, Status>>;

    async fn chat(
        &self,
        request: Request<Streaming<ChatMessage>>,
    ) -> Result<Response<Self::ChatStream>, Status> {
        let peer = request.remote_addr();
        let (tx, rx) = mpsc::channel(self.config.response_buffer.max(1));

        // Register before answering so a client whose call has resolved is
        // already in the fanout.
        let session = Session::connect(
            Arc::clone(&self.registry),
            peer,
            GrpcInbound::new(request.into_inner()),
            GrpcOutbound::new(tx.clone()),
            self.config,
        )
        .await?;

        let id = session.id();
        tokio::spawn(async move {
            if let Err(err) = finish(session.run().await) {
                report_terminal(&tx, id, err);
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
