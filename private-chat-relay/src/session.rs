use std::fmt;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc::{self, error::SendError},
};
use tracing::debug;

use crate::message::{ServerToClient, write_message};

/// Messages queued for one connection before its writer falls behind.
const OUTBOX_CAPACITY: usize = 256;

/// Opaque handle for one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Returned when the receiving connection's writer is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session outbox closed")]
pub struct OutboxClosed;

/// Sending side of a connection's outbound queue.
///
/// A single writer task drains the queue, so messages from one sender reach
/// the socket in the order they were delivered.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<ServerToClient>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::Receiver<ServerToClient>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn deliver(&self, message: ServerToClient) -> Result<(), OutboxClosed> {
        self.tx
            .send(message)
            .await
            .map_err(|SendError(_)| OutboxClosed)
    }

    /// Holds one queue slot so a message can later be queued without
    /// waiting, for example while a lock is held.
    pub async fn reserve(&self) -> Result<Reserved<'_>, OutboxClosed> {
        let permit = self.tx.reserve().await.map_err(|SendError(())| OutboxClosed)?;
        Ok(Reserved { permit })
    }
}

/// A queue slot taken with [`Outbox::reserve`].
pub struct Reserved<'a> {
    permit: mpsc::Permit<'a, ServerToClient>,
}

impl Reserved<'_> {
    pub fn send(self, message: ServerToClient) {
        self.permit.send(message);
    }
}

/// Drains an outbox into the socket until every sender is dropped or a
/// write fails. Dropping the receiver on failure is what turns later
/// deliveries into `OutboxClosed`.
pub async fn pump_outbox<W>(mut inbox: mpsc::Receiver<ServerToClient>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        if let Err(err) = write_message(&mut writer, &message).await {
            debug!(?err, "failed to write to client");
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(?err, "failed to shut down client writer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::read_message;

    #[tokio::test]
    async fn deliver_fails_once_receiver_is_gone() {
        let (outbox, inbox) = Outbox::channel();
        drop(inbox);

        assert!(outbox.reserve().await.is_err());
        assert_eq!(
            outbox.deliver(ServerToClient::system("hello")).await,
            Err(OutboxClosed)
        );
    }

    #[tokio::test]
    async fn reserved_slot_is_queued_when_filled() {
        let (outbox, mut inbox) = Outbox::channel();

        let slot = outbox.reserve().await.expect("reserve");
        outbox
            .deliver(ServerToClient::system("later"))
            .await
            .expect("deliver");
        slot.send(ServerToClient::system("reserved"));

        // Reserving only holds capacity; the message joins the queue on send.
        assert_eq!(inbox.recv().await, Some(ServerToClient::system("later")));
        assert_eq!(inbox.recv().await, Some(ServerToClient::system("reserved")));
    }

    #[tokio::test]
    async fn pump_writes_in_delivery_order() {
        let (outbox, inbox) = Outbox::channel();
        let (client, server) = tokio::io::duplex(1024);
        let pump = tokio::spawn(pump_outbox(inbox, server));

        outbox
            .deliver(ServerToClient::system("first"))
            .await
            .expect("deliver first");
        outbox
            .deliver(ServerToClient::system("second"))
            .await
            .expect("deliver second");
        drop(outbox);
        pump.await.expect("pump task");

        let mut reader = tokio::io::BufReader::new(client);
        for expected in ["first", "second"] {
            let message = read_message::<_, ServerToClient>(&mut reader)
                .await
                .expect("read")
                .expect("message");
            assert_eq!(message, ServerToClient::system(expected));
        }
        let end = read_message::<_, ServerToClient>(&mut reader)
            .await
            .expect("read eof");
        assert_eq!(end, None);
    }
}
