//! Shared relay state: the registry and the pairing relation behind one
//! lock.
//!
//! Each public method is one atomic compound action. The lock is taken,
//! every check and mutation happens, the outboxes needed for notifications
//! are cloned out, and the lock is released before anything is delivered.
//! Nothing here awaits a peer while holding the lock; at most a queue slot
//! reserved beforehand is filled inside it.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::RelayError,
    message::ServerToClient,
    pairing::Pairings,
    registry::{Member, Registry},
    session::{Outbox, SessionId},
};

pub const PEER_LEFT: &str = "peer left the chat";
pub const YOU_LEFT: &str = "You left the chat";
pub const PEER_GONE: &str = "chat ended (peer disconnected)";

pub fn welcome(username: &str) -> String {
    format!("Welcome {username}! Use /chat <name> to start.")
}

#[derive(Debug, Default)]
struct Tables {
    registry: Registry,
    pairings: Pairings,
}

/// What [`RelayState::teardown`] removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Departure {
    pub username: Option<String>,
    pub partner: Option<String>,
}

#[derive(Debug)]
pub struct RelayState {
    tables: Mutex<Tables>,
    next_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers `session` under `username` (already trimmed).
    pub async fn join(
        &self,
        session: SessionId,
        username: &str,
        outbox: Outbox,
    ) -> Result<(), RelayError> {
        if username.is_empty() {
            return Err(RelayError::EmptyUsername);
        }
        let mut tables = self.tables.lock().await;
        tables.registry.register(username, session, outbox)
    }

    pub async fn lookup(&self, username: &str) -> Option<SessionId> {
        self.tables.lock().await.registry.lookup(username)
    }

    pub async fn partner_of(&self, session: SessionId) -> Option<SessionId> {
        self.tables.lock().await.pairings.partner_of(session)
    }

    pub async fn online_count(&self) -> usize {
        self.tables.lock().await.registry.member_count()
    }

    pub async fn pair_count(&self) -> usize {
        self.tables.lock().await.pairings.pair_count()
    }

    /// Pairs `requester` with the user named `target_name` and tells both
    /// sides. If the target cannot be told, the pairing is undone and the
    /// requester hears that the chat ended.
    pub async fn chat_request(
        &self,
        requester: SessionId,
        target_name: &str,
    ) -> Result<(), RelayError> {
        let me = {
            let tables = self.tables.lock().await;
            member(&tables.registry, requester)?
        };
        // The requester's `chat_started` is queued inside the critical
        // section, ahead of any notice a concurrent teardown of the target
        // can send once the lock is released.
        let Ok(slot) = me.outbox.reserve().await else {
            // Our own writer is gone; the read loop ends on its next read.
            return Ok(());
        };

        let (target, them) = {
            let mut tables = self.tables.lock().await;
            let target = tables
                .registry
                .lookup(target_name)
                .ok_or_else(|| RelayError::TargetOffline(target_name.to_string()))?;
            if target == requester {
                return Err(RelayError::SelfPairing);
            }
            if tables.pairings.is_paired(requester) {
                return Err(RelayError::AlreadyPaired);
            }
            if tables.pairings.is_paired(target) {
                return Err(RelayError::TargetBusy(target_name.to_string()));
            }

            let them = member(&tables.registry, target)?;
            tables.pairings.pair(requester, target);
            slot.send(ServerToClient::ChatStarted {
                with: them.username.clone(),
            });
            (target, them)
        };

        let notified = them
            .outbox
            .deliver(ServerToClient::ChatStarted {
                with: me.username.clone(),
            })
            .await;
        if notified.is_err() {
            debug!(requester = %me.username, target = %them.username, "target gone before chat started");
            let undone = self.tables.lock().await.pairings.unpair_if(requester, target);
            // The target's own teardown may already have told the requester.
            if undone {
                let _ = me.outbox.deliver(ServerToClient::system(PEER_GONE)).await;
            }
        }

        Ok(())
    }

    /// Ends whatever pairing `session` is in. Leaving twice is harmless; the
    /// caller is always told it left.
    pub async fn leave_chat(&self, session: SessionId) {
        let (me, partner) = {
            let mut tables = self.tables.lock().await;
            let partner = tables
                .pairings
                .unpair(session)
                .and_then(|partner| tables.registry.member(partner).cloned());
            (tables.registry.member(session).cloned(), partner)
        };

        if let Some(partner) = partner {
            let _ = partner
                .outbox
                .deliver(ServerToClient::system(PEER_LEFT))
                .await;
        }
        if let Some(me) = me {
            let _ = me.outbox.deliver(ServerToClient::system(YOU_LEFT)).await;
        }
    }

    /// Forwards `text` to `session`'s partner. Blank text is dropped.
    pub async fn relay(&self, session: SessionId, text: String) -> Result<(), RelayError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let (from, partner, partner_outbox) = {
            let tables = self.tables.lock().await;
            let partner = tables
                .pairings
                .partner_of(session)
                .ok_or(RelayError::NotInChat)?;
            let me = member(&tables.registry, session)?;
            let them = member(&tables.registry, partner)?;
            (me.username, partner, them.outbox)
        };

        let delivered = partner_outbox
            .deliver(ServerToClient::Chat {
                from,
                message: text,
            })
            .await;
        if delivered.is_err() {
            self.tables
                .lock()
                .await
                .pairings
                .unpair_if(session, partner);
            return Err(RelayError::PeerDisconnected);
        }

        Ok(())
    }

    /// Removes every trace of `session`: pairing first, then registry, in
    /// one critical section. Safe to call for sessions that never joined.
    pub async fn teardown(&self, session: SessionId) -> Departure {
        let (me, partner) = {
            let mut tables = self.tables.lock().await;
            let partner = tables
                .pairings
                .unpair(session)
                .and_then(|partner| tables.registry.member(partner).cloned());
            let me = tables.registry.unregister(session);
            (me, partner)
        };

        if let Some(partner) = &partner {
            let _ = partner
                .outbox
                .deliver(ServerToClient::system(PEER_GONE))
                .await;
        }

        Departure {
            username: me.map(|member| member.username),
            partner: partner.map(|member| member.username),
        }
    }
}

/// Paired and requesting sessions are always registered; a miss means the
/// caller skipped `join`.
fn member(registry: &Registry, session: SessionId) -> Result<Member, RelayError> {
    registry
        .member(session)
        .cloned()
        .ok_or(RelayError::JOIN_REQUIRED)
}
