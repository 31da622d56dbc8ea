use std::{net::SocketAddr, num::NonZeroUsize, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::session::SessionConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server, broadcasting every message to every connected client.
    Server(ServerArgs),
    /// Connect to a chat server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:8901")]
    pub listen: SocketAddr,

    /// Milliseconds to wait before polling a half-closed client stream again.
    #[arg(long, default_value_t = 100)]
    pub receive_retry_ms: u64,

    /// Messages buffered per client before writes to that client wait.
    #[arg(long, default_value = "32")]
    pub response_buffer: NonZeroUsize,
}

impl ServerArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            receive_retry: Duration::from_millis(self.receive_retry_ms),
            response_buffer: self.response_buffer.get(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the chat server, with or without an `http://` scheme.
    #[arg(long, default_value = "127.0.0.1:8901")]
    pub server: String,
}

impl ClientArgs {
    pub fn endpoint(&self) -> String {
        if self.server.contains("://") {
            self.server.clone()
        } else {
            format!("http://{}", self.server)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let cli = Cli::try_parse_from(["grpc-chat-stream", "server"]).expect("parse");
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };

        assert_eq!(args.listen, "0.0.0.0:8901".parse().expect("addr"));
        assert_eq!(args.session_config(), SessionConfig::default());
    }

    #[test]
    fn zero_response_buffer_is_rejected() {
        let result =
            Cli::try_parse_from(["grpc-chat-stream", "server", "--response-buffer", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn client_endpoint_gets_scheme() {
        let cli = Cli::try_parse_from(["grpc-chat-stream", "client"]).expect("parse");
        let Command::Client(args) = cli.command else {
            panic!("expected client command");
        };
        assert_eq!(args.endpoint(), "http://127.0.0.1:8901");

        let args = ClientArgs {
            server: "https://chat.example:443".into(),
        };
        assert_eq!(args.endpoint(), "https://chat.example:443");
    }
}
