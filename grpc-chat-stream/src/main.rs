use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use grpc_chat_stream::{
    cli::{Cli, Command},
    client,
    server::ChatServer,
};

/// Server logs go to stdout; the client keeps stdout for chat lines and logs
/// to stderr.
fn init_tracing(to_stderr: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if to_stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Command::Client(_)));

    match cli.command {
        Command::Server(args) => {
            let listener = TcpListener::bind(args.listen).await?;
            let server = ChatServer::new(args.session_config());
            let addr = listener.local_addr()?;
            info!("chat server listening on {}", addr);
            if let Err(err) = server.serve_until_ctrl_c(listener).await {
                warn!("chat server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
