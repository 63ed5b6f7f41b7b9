use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    message::{ClientToServer, ServerToClient, read_message, write_message},
};

/// What one line typed at the terminal asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Send(ClientToServer),
    Quit,
    Nothing,
}

/// Maps a terminal line onto a request. `/chat <name>`, `/leave` and
/// `/quit` are commands; anything else is chat text for the partner.
pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Nothing;
    }

    if let Some(target) = line.strip_prefix("/chat ") {
        return Input::Send(ClientToServer::ChatRequest {
            to: target.trim().to_string(),
        });
    }

    match line {
        "/leave" => Input::Send(ClientToServer::LeaveChat),
        "/quit" => Input::Quit,
        _ => Input::Send(ClientToServer::Chat {
            message: line.to_string(),
        }),
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    send_join(&mut writer, &args.username).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut input).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn send_join(writer: &mut OwnedWriteHalf, username: &str) -> Result<()> {
    write_message(
        writer,
        &ClientToServer::Join {
            username: username.to_string(),
        },
    )
    .await?;
    Ok(())
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            server_message = read_message::<_, ServerToClient>(reader) => {
                if !handle_server_message(server_message).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer).await? {
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

async fn handle_server_message(message: io::Result<Option<ServerToClient>>) -> Result<bool> {
    match message? {
        Some(message) => {
            render_server_message(message).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read? == 0 {
        write_message(writer, &ClientToServer::Quit).await?;
        return Ok(false);
    }

    match parse_input(input) {
        Input::Nothing => Ok(true),
        Input::Quit => {
            write_message(writer, &ClientToServer::Quit).await?;
            write_stdout("*** leaving chat").await?;
            Ok(false)
        }
        Input::Send(request) => {
            write_message(writer, &request).await?;
            Ok(true)
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn render_server_message(message: ServerToClient) -> io::Result<()> {
    match message {
        ServerToClient::System { message } => write_stdout(&format!("*** {message}")).await,
        ServerToClient::ChatStarted { with } => {
            write_stdout(&format!("*** chat started with {with}")).await
        }
        ServerToClient::Chat { from, message } => {
            write_stdout(&format!("{from}: {message}")).await
        }
        ServerToClient::Error { message } => write_stderr(&format!("!!! {message}")).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
