//! Broadcast chat over one bidirectional gRPC stream per client.
//!
//! Every message a client sends on its `Chat` stream is delivered to every
//! connected client, the sender included. Each module focuses on a concrete
//! responsibility:
//!
//! - [`registry`] tracks live connections and their outbound channels, and
//!   performs the fanout under a single lock.
//! - [`session`] runs one connection: registration, the concurrent receive and
//!   send loops, and teardown on the first terminal condition.
//! - [`server`] hands accepted streams to sessions and serves the tonic
//!   `stream.ChatService`.
//! - [`transport`] defines the duplex stream traits sessions run on and their
//!   tonic adapters.
//! - [`message`] holds the protobuf `ChatMessage` and the generated service.
//! - [`cli`] and [`client`] make up the terminal front end.

pub mod cli;
pub mod client;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use message::ChatMessage;
pub use registry::{ConnectionId, Registry, RegistryError};
pub use server::ChatServer;
pub use session::{Session, SessionConfig, SessionError, SessionState};
