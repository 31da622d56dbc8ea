use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    select,
    sync::mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Status, Streaming, transport::Endpoint};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{ChatMessage, proto::chat_service_client::ChatServiceClient},
};

const OUTGOING_BUFFER: usize = 16;

type StdinLines = Lines<BufReader<Stdin>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (outgoing, mut incoming) = open_chat(&args).await?;
    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let mut stdin = BufReader::new(io::stdin()).lines();
    let Some(username) = read_username(&mut stdin).await? else {
        return Ok(());
    };

    run_client_loop(&mut incoming, &outgoing, &mut stdin, &username).await
}

async fn open_chat(
    args: &ClientArgs,
) -> Result<(mpsc::Sender<ChatMessage>, Streaming<ChatMessage>)> {
    let endpoint = args.endpoint();
    let channel = Endpoint::from_shared(endpoint.clone())
        .with_context(|| format!("invalid server address {}", args.server))?
        .connect()
        .await
        .with_context(|| format!("failed to connect to {endpoint}"))?;

    info!("connected to {}", endpoint);

    let (tx, rx) = mpsc::channel(OUTGOING_BUFFER);
    let response = ChatServiceClient::new(channel)
        .chat(ReceiverStream::new(rx))
        .await
        .context("failed to open chat stream")?;

    Ok((tx, response.into_inner()))
}

async fn read_username(stdin: &mut StdinLines) -> Result<Option<String>> {
    loop {
        write_stderr("Enter username: ").await?;
        let Some(line) = stdin
            .next_line()
            .await
            .context("failed to read username from console")?
        else {
            return Ok(None);
        };

        let username = line.trim();
        if !username.is_empty() {
            return Ok(Some(username.to_string()));
        }
    }
}

async fn run_client_loop(
    incoming: &mut Streaming<ChatMessage>,
    outgoing: &mpsc::Sender<ChatMessage>,
    stdin: &mut StdinLines,
    username: &str,
) -> Result<()> {
    loop {
        select! {
            server_message = incoming.message() => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            line = stdin.next_line() => {
                if !handle_stdin_line(line, outgoing, username).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_message(message: Result<Option<ChatMessage>, Status>) -> Result<bool> {
    match message.context("chat stream failed")? {
        Some(message) => {
            write_stdout(&message.to_string()).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_line(
    line: io::Result<Option<String>>,
    outgoing: &mpsc::Sender<ChatMessage>,
    username: &str,
) -> Result<bool> {
    let Some(line) = line.context("failed to read from console")? else {
        return Ok(false);
    };

    let text = line.trim();
    if text.is_empty() {
        return Ok(true);
    }

    outgoing
        .send(ChatMessage::new(username, text))
        .await
        .context("chat stream closed")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(prompt: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(prompt.as_bytes()).await?;
    stderr.flush().await
}
