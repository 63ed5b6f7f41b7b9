//! Symmetric "who is chatting with whom" relation.
//!
//! Every mutation writes or clears both directions at once, so `A ↦ B`
//! holds exactly when `B ↦ A` holds.

use std::collections::HashMap;

use crate::session::SessionId;

#[derive(Debug, Default)]
pub struct Pairings {
    partners: HashMap<SessionId, SessionId>,
}

impl Pairings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links `a` and `b`. Callers check both sides are free first.
    pub fn pair(&mut self, a: SessionId, b: SessionId) {
        debug_assert_ne!(a, b);
        debug_assert!(!self.is_paired(a) && !self.is_paired(b));
        self.partners.insert(a, b);
        self.partners.insert(b, a);
    }

    pub fn partner_of(&self, session: SessionId) -> Option<SessionId> {
        self.partners.get(&session).copied()
    }

    pub fn is_paired(&self, session: SessionId) -> bool {
        self.partners.contains_key(&session)
    }

    /// Pops both sides of `session`'s pairing and returns the ex-partner.
    pub fn unpair(&mut self, session: SessionId) -> Option<SessionId> {
        let partner = self.partners.remove(&session)?;
        self.partners.remove(&partner);
        Some(partner)
    }

    /// Like [`Pairings::unpair`], but only while `session` is still paired
    /// with `expected`.
    pub fn unpair_if(&mut self, session: SessionId, expected: SessionId) -> bool {
        if self.partner_of(session) != Some(expected) {
            return false;
        }
        self.unpair(session);
        true
    }

    pub fn pair_count(&self) -> usize {
        self.partners.len() / 2
    }
}
