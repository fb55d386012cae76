//! WebSocket Session State
//!
//! Per-connection state machine. Each connection moves through
//! `Connecting -> Authenticated -> Active -> Closed`; the identity is set
//! exactly once, at the `Connecting -> Authenticated` transition.

use crate::domain::UserIdentity;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Socket is open, credential not yet verified
    Connecting,
    /// Identity verified and presence registered
    Authenticated,
    /// Room subscriptions restored; events are accepted
    Active,
    /// Transport closed; only cleanup remains
    Closed,
}

/// State owned by a single connection's session task.
#[derive(Debug)]
pub struct ConnectionState {
    session_id: String,
    phase: Phase,
    identity: Option<UserIdentity>,
}

impl ConnectionState {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            phase: Phase::Connecting,
            identity: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// `Connecting -> Authenticated`. Stores the verified identity; it is
    /// immutable afterwards.
    pub fn authenticated(&mut self, identity: UserIdentity) {
        debug_assert_eq!(self.phase, Phase::Connecting);
        debug_assert!(self.identity.is_none());
        self.identity = Some(identity);
        self.phase = Phase::Authenticated;
    }

    /// `Authenticated -> Active`, after room subscriptions are restored.
    pub fn activated(&mut self) {
        debug_assert_eq!(self.phase, Phase::Authenticated);
        self.phase = Phase::Active;
    }

    /// Any phase `-> Closed`.
    pub fn closed(&mut self) {
        self.phase = Phase::Closed;
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// The authenticated identity, if the connection got that far.
    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    /// The authenticated user id, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }
}
