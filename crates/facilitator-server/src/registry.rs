use std::{
    collections::HashMap,
    net::SocketAddr,
    time::{Duration, Instant},
};

use facilitator_core::error::{ErrorKind, Result};
use facilitator_protocol::message::{Endpoint, EndpointKind, RoomId, SessionId};

/// Pluggable authentication of session tokens.
///
/// The wire protocol does not mandate a token scheme; deployments plug in
/// whatever validation they need here.
pub trait TokenValidator: Send {
    /// True if the token may open a session.
    fn validate(&self, token: &str) -> bool;
}

/// Default validator: any non-empty token passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptNonEmpty;

impl TokenValidator for AcceptNonEmpty {
    fn validate(&self, token: &str) -> bool {
        !token.is_empty()
    }
}

/// Connection state of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Alive and exchanging traffic.
    Connected,
    /// Expired or disconnected; the entry is on its way out.
    Disconnected,
}

/// One registered client.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Assigned session id.
    pub id: SessionId,
    /// Token the session registered with.
    pub token: String,
    /// Address traffic from this session arrives from.
    pub addr: SocketAddr,
    /// Addresses the client declared on its own network.
    pub local_endpoints: Vec<SocketAddr>,
    /// Room the session currently belongs to, if any.
    pub room: Option<RoomId>,
    /// Liveness timestamp, refreshed by every received packet.
    pub last_seen: Instant,
    /// Connection state.
    pub state: SessionState,
}

/// The single owned table of registered sessions.
///
/// All access goes through these methods; routing reads observe complete
/// entries because mutation happens only between poll steps.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionEntry>,
    by_token: HashMap<String, SessionId>,
    by_addr: HashMap<SocketAddr, SessionId>,
    validator: Box<dyn TokenValidator>,
    max_sessions: usize,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").field("sessions", &self.sessions.len()).finish()
    }
}

impl SessionRegistry {
    /// Creates a registry with the given cap and validator.
    pub fn new(max_sessions: usize, validator: Box<dyn TokenValidator>) -> Self {
        Self {
            sessions: HashMap::new(),
            by_token: HashMap::new(),
            by_addr: HashMap::new(),
            validator,
            max_sessions,
        }
    }

    /// Registers a new session.
    ///
    /// Fails with `AuthenticationError` when the token is rejected, already
    /// bound to a live session, or the source address already holds one;
    /// with `CapacityError` when the session cap is reached.
    pub fn register(
        &mut self,
        token: &str,
        addr: SocketAddr,
        local_endpoints: Vec<SocketAddr>,
        now: Instant,
    ) -> Result<SessionId> {
        if !self.validator.validate(token) {
            return Err(ErrorKind::AuthenticationError);
        }
        if self.by_token.contains_key(token) || self.by_addr.contains_key(&addr) {
            return Err(ErrorKind::AuthenticationError);
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(ErrorKind::CapacityError("sessions"));
        }

        let id = loop {
            let candidate = SessionId(rand::random::<u64>());
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        self.by_token.insert(token.to_owned(), id);
        self.by_addr.insert(addr, id);
        self.sessions.insert(id, SessionEntry {
            id,
            token: token.to_owned(),
            addr,
            local_endpoints,
            room: None,
            last_seen: now,
            state: SessionState::Connected,
        });
        Ok(id)
    }

    /// True if this token currently backs a live session.
    pub fn token_in_use(&self, token: &str) -> bool {
        self.by_token.contains_key(token)
    }

    /// Refreshes liveness for whatever session owns this address.
    pub fn touch(&mut self, addr: SocketAddr, now: Instant) -> Option<SessionId> {
        let id = *self.by_addr.get(&addr)?;
        if let Some(entry) = self.sessions.get_mut(&id) {
            entry.last_seen = now;
        }
        Some(id)
    }

    /// Looks up a session by id.
    pub fn session(&self, id: SessionId) -> Option<&SessionEntry> {
        self.sessions.get(&id)
    }

    /// Looks up the session registered at an address.
    pub fn id_by_addr(&self, addr: SocketAddr) -> Option<SessionId> {
        self.by_addr.get(&addr).copied()
    }

    /// Address a session's traffic arrives from.
    pub fn addr_of(&self, id: SessionId) -> Option<SocketAddr> {
        self.sessions.get(&id).map(|entry| entry.addr)
    }

    /// Sets or clears the room a session belongs to.
    pub fn set_room(&mut self, id: SessionId, room: Option<RoomId>) {
        if let Some(entry) = self.sessions.get_mut(&id) {
            entry.room = room;
        }
    }

    /// Candidate endpoint set for rendezvous: declared locals plus the
    /// observed public address (NAT reflection; best-effort by nature).
    pub fn candidates(&self, id: SessionId) -> Vec<Endpoint> {
        let Some(entry) = self.sessions.get(&id) else {
            return Vec::new();
        };
        let mut candidates: Vec<Endpoint> = entry
            .local_endpoints
            .iter()
            .filter(|addr| **addr != entry.addr)
            .map(|addr| Endpoint { addr: *addr, kind: EndpointKind::Local })
            .collect();
        candidates.push(Endpoint { addr: entry.addr, kind: EndpointKind::Public });
        candidates
    }

    /// Removes every session silent for `timeout` or longer, returning them
    /// for cascading cleanup.
    pub fn expire_sweep(&mut self, now: Instant, timeout: Duration) -> Vec<SessionEntry> {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) >= timeout)
            .map(|entry| entry.id)
            .collect();
        expired.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Removes one session, clearing all indexes.
    pub fn remove(&mut self, id: SessionId) -> Option<SessionEntry> {
        let mut entry = self.sessions.remove(&id)?;
        self.by_token.remove(&entry.token);
        self.by_addr.remove(&entry.addr);
        entry.state = SessionState::Disconnected;
        Some(entry)
    }

    /// Iterates over all registered sessions.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionEntry> {
        self.sessions.values()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
