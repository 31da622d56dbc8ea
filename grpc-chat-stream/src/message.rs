use std::fmt;

/// A single chat line, exchanged in both directions over the `Chat` stream.
///
/// This is the protobuf record `stream.ChatMessage`:
///
/// ```text
/// message ChatMessage {
///   string username = 1;
///   string message = 2;
/// }
/// ```
#[derive(Clone, PartialEq, Eq, prost::Message)]
pub struct ChatMessage {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl ChatMessage {
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
        }
    }
}

/// Renders the line the way terminal clients print it: `[username]: message`.
impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.username, self.message)
    }
}

/// Generated `stream.ChatService` client and server plumbing.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/stream.ChatService.rs"));
}
