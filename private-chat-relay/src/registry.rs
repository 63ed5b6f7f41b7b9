//! Username ↔ session mapping: the single answer to "who is online".
//!
//! The registry is plain data. Callers hold it behind the same lock as the
//! pairing relation so that membership and pairing never disagree.

use std::collections::HashMap;

use crate::{
    error::RelayError,
    session::{Outbox, SessionId},
};

#[derive(Debug, Clone)]
pub struct Member {
    pub username: String,
    pub outbox: Outbox,
}

#[derive(Debug, Default)]
pub struct Registry {
    by_name: HashMap<String, SessionId>,
    members: HashMap<SessionId, Member>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `username` for `session`. A session joins at most once, so
    /// its name can never change after this succeeds.
    pub fn register(
        &mut self,
        username: &str,
        session: SessionId,
        outbox: Outbox,
    ) -> Result<(), RelayError> {
        if self.members.contains_key(&session) {
            return Err(RelayError::ALREADY_JOINED);
        }
        if self.by_name.contains_key(username) {
            return Err(RelayError::NameTaken);
        }

        self.by_name.insert(username.to_string(), session);
        self.members.insert(
            session,
            Member {
                username: username.to_string(),
                outbox,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, username: &str) -> Option<SessionId> {
        self.by_name.get(username).copied()
    }

    pub fn member(&self, session: SessionId) -> Option<&Member> {
        self.members.get(&session)
    }

    /// Removes `session`. The name entry is only dropped while it still
    /// points at this session.
    pub fn unregister(&mut self, session: SessionId) -> Option<Member> {
        let member = self.members.remove(&session)?;
        if self.by_name.get(&member.username) == Some(&session) {
            self.by_name.remove(&member.username);
        }
        Some(member)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> Outbox {
        Outbox::channel().0
    }

    #[test]
    fn distinct_names_all_register() {
        let mut registry = Registry::new();
        for (raw, name) in ["alice", "bob", "carol"].into_iter().enumerate() {
            registry
                .register(name, SessionId::new(raw as u64), outbox())
                .expect("distinct name registers");
        }

        assert_eq!(registry.member_count(), 3);
        for (raw, name) in ["alice", "bob", "carol"].into_iter().enumerate() {
            assert_eq!(registry.lookup(name), Some(SessionId::new(raw as u64)));
        }
    }

    #[test]
    fn duplicate_name_is_rejected_without_side_effects() {
        let mut registry = Registry::new();
        registry
            .register("alice", SessionId::new(1), outbox())
            .expect("first registration");

        let result = registry.register("alice", SessionId::new(2), outbox());
        assert_eq!(result, Err(RelayError::NameTaken));
        assert_eq!(registry.member_count(), 1);
        assert_eq!(registry.lookup("alice"), Some(SessionId::new(1)));
        assert!(registry.member(SessionId::new(2)).is_none());
    }

    #[test]
    fn session_joins_only_once() {
        let mut registry = Registry::new();
        registry
            .register("alice", SessionId::new(1), outbox())
            .expect("first registration");

        let result = registry.register("alicia", SessionId::new(1), outbox());
        assert_eq!(result, Err(RelayError::ALREADY_JOINED));
        assert_eq!(registry.lookup("alicia"), None);
        assert_eq!(
            registry.member(SessionId::new(1)).map(|m| m.username.as_str()),
            Some("alice")
        );
    }

    #[test]
    fn unregister_frees_the_name() {
        let mut registry = Registry::new();
        registry
            .register("alice", SessionId::new(1), outbox())
            .expect("register");

        let removed = registry.unregister(SessionId::new(1)).expect("member");
        assert_eq!(removed.username, "alice");
        assert_eq!(registry.member_count(), 0);
        assert_eq!(registry.lookup("alice"), None);
        assert!(registry.unregister(SessionId::new(1)).is_none());

        registry
            .register("alice", SessionId::new(2), outbox())
            .expect("name is free again");
    }

    #[test]
    fn unregister_unknown_session_leaves_others_alone() {
        let mut registry = Registry::new();
        registry
            .register("alice", SessionId::new(1), outbox())
            .expect("register");

        assert!(registry.unregister(SessionId::new(9)).is_none());
        assert_eq!(registry.lookup("alice"), Some(SessionId::new(1)));
    }
}
