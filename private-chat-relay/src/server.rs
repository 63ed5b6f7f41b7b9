use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    error::RelayError,
    message::{ClientToServer, ServerToClient, decode_request, read_line, write_message},
    session::{Outbox, SessionId, pump_outbox},
    state::{Departure, RelayState, welcome},
};

pub struct Server {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    /// Accepts connections until `shutdown` resolves. Sessions already
    /// running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<RelayState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

/// How far a connection got before it closed.
#[derive(Default)]
struct Progress {
    joined: bool,
    graceful: bool,
    writer: Option<JoinHandle<()>>,
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<RelayState>,
) -> Result<()> {
    let session = state.next_session_id();
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut progress = Progress::default();

    let result = run_connection(&state, session, &mut reader, writer, &mut progress).await;

    // Every exit path ends here exactly once: quit, end of stream, transport
    // error or a rejected join.
    let departure = state.teardown(session).await;
    if let Some(writer) = progress.writer.take() {
        let _ = writer.await;
    }
    log_departure(peer, &progress, &departure, &result);

    settle(result, &progress)
}

/// A connection that never joined has already been logged as a departure;
/// only failures of joined sessions reach the spawn boundary.
fn settle(result: Result<()>, progress: &Progress) -> Result<()> {
    if progress.joined { result } else { Ok(()) }
}

async fn run_connection<R, W>(
    state: &RelayState,
    session: SessionId,
    reader: &mut R,
    mut writer: W,
    progress: &mut Progress,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let username = perform_join(reader, &mut writer).await?;
    let outbox = register_and_welcome(state, session, &username, writer, progress).await?;

    info!(%session, %username, "client joined");

    progress.graceful = run_client_session(state, session, reader, &outbox).await?;
    Ok(())
}

/// Reads the one join attempt a connection gets and returns the trimmed
/// username.
async fn perform_join<R, W>(reader: &mut R, writer: &mut W) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let line = match read_line(reader).await? {
        Some(line) => line,
        None => anyhow::bail!("connection closed before join"),
    };

    match extract_username(&line) {
        Ok(username) => Ok(username),
        Err(err) => {
            write_message(writer, &ServerToClient::error(&err)).await?;
            anyhow::bail!("join rejected: {err}");
        }
    }
}

fn extract_username(line: &str) -> Result<String, RelayError> {
    let request = match decode_request(line) {
        Err(RelayError::MalformedJson) => return Err(RelayError::MalformedJson),
        other => other.ok(),
    };

    match request {
        Some(ClientToServer::Join { username }) if !username.is_empty() => {
            let username = username.trim();
            if username.is_empty() {
                return Err(RelayError::EmptyUsername);
            }
            Ok(username.to_string())
        }
        _ => Err(RelayError::JOIN_REQUIRED),
    }
}

async fn register_and_welcome<W>(
    state: &RelayState,
    session: SessionId,
    username: &str,
    mut writer: W,
    progress: &mut Progress,
) -> Result<Outbox>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, inbox) = Outbox::channel();
    if let Err(err) = state.join(session, username, outbox.clone()).await {
        write_message(&mut writer, &ServerToClient::error(&err)).await?;
        anyhow::bail!("join rejected for '{username}': {err}");
    }

    progress.joined = true;
    progress.writer = Some(tokio::spawn(pump_outbox(inbox, writer)));

    // A dead outbox means the socket is already gone; the read loop will
    // notice on its next read.
    let _ = outbox.deliver(ServerToClient::system(welcome(username))).await;
    Ok(outbox)
}

/// Serves a joined client until it quits (`Ok(true)`) or its stream ends
/// (`Ok(false)`).
async fn run_client_session<R>(
    state: &RelayState,
    session: SessionId,
    reader: &mut R,
    outbox: &Outbox,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match read_line(reader).await? {
            Some(line) => line,
            None => return Ok(false),
        };

        let outcome = match decode_request(&line) {
            Ok(ClientToServer::Quit) => return Ok(true),
            Ok(request) => handle_request(state, session, request).await,
            Err(err) => Err(err),
        };

        if let Err(err) = outcome {
            let _ = outbox.deliver(ServerToClient::error(&err)).await;
        }
    }
}

async fn handle_request(
    state: &RelayState,
    session: SessionId,
    request: ClientToServer,
) -> Result<(), RelayError> {
    match request {
        ClientToServer::ChatRequest { to } => {
            let target = to.trim();
            if target.is_empty() {
                return Err(RelayError::MISSING_TARGET);
            }
            state.chat_request(session, target).await
        }
        ClientToServer::LeaveChat => {
            state.leave_chat(session).await;
            Ok(())
        }
        ClientToServer::Chat { message } => state.relay(session, message).await,
        ClientToServer::Join { .. } => Err(RelayError::ALREADY_JOINED),
        ClientToServer::Quit => Ok(()),
    }
}

fn log_departure(
    peer: SocketAddr,
    progress: &Progress,
    departure: &Departure,
    result: &Result<()>,
) {
    match (&departure.username, progress.graceful) {
        (Some(username), true) => info!(%peer, %username, "client disconnected (graceful)"),
        (Some(username), false) => warn!(%peer, %username, "client disconnected (unexpected)"),
        (None, _) if !progress.joined => match result {
            Ok(()) => info!(%peer, "client disconnected before join"),
            Err(err) => info!(%peer, reason = %err, "client disconnected before join"),
        },
        (None, _) => warn!(%peer, "joined client was already unregistered"),
    }

    if let Some(partner) = &departure.partner {
        info!(%peer, %partner, "ended private chat on disconnect");
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[test]
    fn join_line_is_validated() {
        assert_eq!(
            extract_username(r#"{"type":"join","username":"  alice "}"#),
            Ok("alice".to_string())
        );
        assert_eq!(
            extract_username(r#"{"type":"join","username":"   "}"#),
            Err(RelayError::EmptyUsername)
        );
        assert_eq!(
            extract_username(r#"{"type":"join"}"#),
            Err(RelayError::JOIN_REQUIRED)
        );
        assert_eq!(
            extract_username(r#"{"type":"chat","message":"hi"}"#),
            Err(RelayError::JOIN_REQUIRED)
        );
        assert_eq!(
            extract_username(r#"{"type":"whatever"}"#),
            Err(RelayError::JOIN_REQUIRED)
        );
        assert_eq!(extract_username("not json"), Err(RelayError::MalformedJson));
    }

    #[test]
    fn only_joined_sessions_report_errors() {
        let before_join = Progress::default();
        let closed = Err(anyhow::anyhow!("connection closed before join"));
        assert!(settle(closed, &before_join).is_ok());

        let joined = Progress {
            joined: true,
            ..Progress::default()
        };
        assert!(settle(Err(anyhow::anyhow!("connection reset")), &joined).is_err());
        assert!(settle(Ok(()), &joined).is_ok());
    }

    #[tokio::test]
    async fn rejected_join_writes_one_error() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut server_read = BufReader::new(server_read);
        let (client_read, mut client_write) = tokio::io::split(client);

        client_write
            .write_all(b"{\"type\":\"quit\"}\n")
            .await
            .expect("write join");

        let result = perform_join(&mut server_read, &mut server_write).await;
        assert!(result.is_err());
        drop(server_write);

        let mut client_read = BufReader::new(client_read);
        let reply = crate::message::read_message::<_, ServerToClient>(&mut client_read)
            .await
            .expect("read reply");
        assert_eq!(reply, Some(ServerToClient::error(&RelayError::JOIN_REQUIRED)));
    }
}
