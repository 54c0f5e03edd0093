//! Rendezvous coordinator: one state machine per peer pairing.
//!
//! NAT reflection gives each session a best-effort public candidate; pairs
//! behind symmetric NATs will generally not traverse and fall back to the
//! relay when their punch window expires. That is a documented limitation
//! of the technique, not an error path.

use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    time::{Duration, Instant},
};

use facilitator_protocol::message::SessionId;

/// Identifies one peer pairing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// State of a peer pairing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PeerLinkState {
    /// Candidates exchanged; punch window open.
    Negotiating,
    /// Peers reach each other directly; the facilitator is out of the path.
    Direct,
    /// Traffic flows through a relay channel.
    Relayed,
    /// Negotiation and relay both failed; terminal.
    Failed,
}

/// The connectivity relationship between two sessions in a room.
#[derive(Debug)]
pub struct PeerLink {
    /// Pairing id.
    pub id: LinkId,
    /// One session of the pair (the smaller id).
    pub a: SessionId,
    /// The other session.
    pub b: SessionId,
    /// Current state.
    pub state: PeerLinkState,
    /// Negotiation rounds run so far.
    pub attempts: u8,
    /// When the current punch window closes.
    pub deadline: Instant,
    /// When the state last changed.
    pub last_transition: Instant,
    a_report: Option<Option<SocketAddr>>,
    b_report: Option<Option<SocketAddr>>,
}

impl PeerLink {
    /// True if the given session is one of the pair.
    pub fn involves(&self, session: SessionId) -> bool {
        self.a == session || self.b == session
    }

    /// The other session of the pair.
    pub fn other(&self, session: SessionId) -> Option<SessionId> {
        if self.a == session {
            Some(self.b)
        } else if self.b == session {
            Some(self.a)
        } else {
            None
        }
    }

    /// The session that should begin probing first: the lexicographically
    /// smaller id, so strict NATs see one deterministic opener.
    pub fn initiator(&self) -> SessionId {
        self.a.min(self.b)
    }

    fn clear_reports(&mut self) {
        self.a_report = None;
        self.b_report = None;
    }
}

/// What recording a punch report concluded.
#[derive(Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Still waiting for the other side.
    Pending,
    /// Both sides confirmed a working direct path.
    DirectConfirmed,
    /// Both sides reported and at least one failed; relay now.
    PunchFailed,
}

/// Owns the peer link table and drives every pairing's state machine.
pub struct RendezvousCoordinator {
    links: HashMap<LinkId, PeerLink>,
    by_pair: HashMap<(SessionId, SessionId), LinkId>,
    next_link: u64,
    punch_window: Duration,
    retry_cap: u8,
}

impl std::fmt::Debug for RendezvousCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousCoordinator").field("links", &self.links.len()).finish()
    }
}

impl RendezvousCoordinator {
    /// Creates a coordinator with the given punch window and retry cap.
    pub fn new(punch_window: Duration, retry_cap: u8) -> Self {
        Self {
            links: HashMap::new(),
            by_pair: HashMap::new(),
            next_link: 1,
            punch_window,
            retry_cap,
        }
    }

    fn pair_key(a: SessionId, b: SessionId) -> (SessionId, SessionId) {
        (a.min(b), a.max(b))
    }

    /// Creates a pairing in `Negotiating` with its punch window open.
    /// Returns the existing link if the pair is already tracked.
    pub fn create_link(&mut self, a: SessionId, b: SessionId, now: Instant) -> LinkId {
        let key = Self::pair_key(a, b);
        if let Some(existing) = self.by_pair.get(&key) {
            return *existing;
        }
        let id = LinkId(self.next_link);
        self.next_link += 1;
        self.links.insert(id, PeerLink {
            id,
            a: key.0,
            b: key.1,
            state: PeerLinkState::Negotiating,
            attempts: 1,
            deadline: now + self.punch_window,
            last_transition: now,
            a_report: None,
            b_report: None,
        });
        self.by_pair.insert(key, id);
        id
    }

    /// Borrows a link.
    pub fn link(&self, id: LinkId) -> Option<&PeerLink> {
        self.links.get(&id)
    }

    /// Looks up the link for a pair, if any.
    pub fn pair(&self, a: SessionId, b: SessionId) -> Option<LinkId> {
        self.by_pair.get(&Self::pair_key(a, b)).copied()
    }

    /// State of the pairing between two sessions.
    pub fn state_of(&self, a: SessionId, b: SessionId) -> Option<PeerLinkState> {
        self.pair(a, b).and_then(|id| self.links.get(&id)).map(|link| link.state)
    }

    /// Records one side's punch outcome.
    pub fn record_report(
        &mut self,
        reporter: SessionId,
        peer: SessionId,
        succeeded: Option<SocketAddr>,
    ) -> Option<(LinkId, ReportOutcome)> {
        let id = self.pair(reporter, peer)?;
        let link = self.links.get_mut(&id)?;
        if link.state != PeerLinkState::Negotiating {
            return Some((id, ReportOutcome::Pending));
        }
        if reporter == link.a {
            link.a_report = Some(succeeded);
        } else {
            link.b_report = Some(succeeded);
        }
        let outcome = match (link.a_report, link.b_report) {
            (Some(Some(_)), Some(Some(_))) => ReportOutcome::DirectConfirmed,
            (Some(_), Some(_)) => ReportOutcome::PunchFailed,
            _ => ReportOutcome::Pending,
        };
        Some((id, outcome))
    }

    /// Promotes a pairing to `Direct`.
    pub fn mark_direct(&mut self, id: LinkId, now: Instant) {
        self.transition(id, PeerLinkState::Direct, now);
    }

    /// Moves a pairing to `Relayed`.
    pub fn mark_relayed(&mut self, id: LinkId, now: Instant) {
        self.transition(id, PeerLinkState::Relayed, now);
    }

    /// Moves a pairing to terminal `Failed`.
    pub fn mark_failed(&mut self, id: LinkId, now: Instant) {
        self.transition(id, PeerLinkState::Failed, now);
    }

    fn transition(&mut self, id: LinkId, state: PeerLinkState, now: Instant) {
        if let Some(link) = self.links.get_mut(&id) {
            link.state = state;
            link.last_transition = now;
        }
    }

    /// Re-enters negotiation for a failed relay attempt, if the retry cap
    /// allows another round. Opens a fresh punch window.
    pub fn renegotiate(&mut self, id: LinkId, now: Instant) -> bool {
        let Some(link) = self.links.get_mut(&id) else {
            return false;
        };
        if link.attempts > self.retry_cap {
            return false;
        }
        link.attempts += 1;
        link.state = PeerLinkState::Negotiating;
        link.deadline = now + self.punch_window;
        link.last_transition = now;
        link.clear_reports();
        true
    }

    /// Pairings whose punch window has closed without resolution.
    pub fn expired(&self, now: Instant) -> Vec<LinkId> {
        self.links
            .values()
            .filter(|link| link.state == PeerLinkState::Negotiating && link.deadline <= now)
            .map(|link| link.id)
            .collect()
    }

    /// Removes one pairing.
    pub fn remove(&mut self, id: LinkId) -> Option<PeerLink> {
        let link = self.links.remove(&id)?;
        self.by_pair.remove(&Self::pair_key(link.a, link.b));
        Some(link)
    }

    /// Removes every pairing touching a session, returning them so the
    /// caller can cancel relay channels and notify surviving peers.
    pub fn teardown_session(&mut self, session: SessionId) -> Vec<PeerLink> {
        let ids: Vec<LinkId> = self
            .links
            .values()
            .filter(|link| link.involves(session))
            .map(|link| link.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Number of tracked pairings.
    pub fn links_count(&self) -> usize {
        self.links.len()
    }

    /// Iterates over all pairings.
    pub fn iter(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    fn punch_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn create_is_idempotent_per_pair() {
        let mut coordinator = RendezvousCoordinator::new(WINDOW, 2);
        let now = Instant::now();
        let first = coordinator.create_link(SessionId(2), SessionId(1), now);
        let second = coordinator.create_link(SessionId(1), SessionId(2), now);
        assert_eq!(first, second);
        assert_eq!(coordinator.links_count(), 1);
    }

    #[test]
    fn initiator_is_the_smaller_session_id() {
        let mut coordinator = RendezvousCoordinator::new(WINDOW, 2);
        let id = coordinator.create_link(SessionId(9), SessionId(4), Instant::now());
        assert_eq!(coordinator.link(id).unwrap().initiator(), SessionId(4));
    }

    #[test]
    fn both_successful_reports_confirm_direct() {
        let mut coordinator = RendezvousCoordinator::new(WINDOW, 2);
        let now = Instant::now();
        coordinator.create_link(SessionId(1), SessionId(2), now);

        let (_, first) = coordinator
            .record_report(SessionId(1), SessionId(2), Some(punch_addr()))
            .unwrap();
        assert_eq!(first, ReportOutcome::Pending);

        let (id, second) = coordinator
            .record_report(SessionId(2), SessionId(1), Some(punch_addr()))
            .unwrap();
        assert_eq!(second, ReportOutcome::DirectConfirmed);

        coordinator.mark_direct(id, now);
        assert_eq!(
            coordinator.state_of(SessionId(1), SessionId(2)),
            Some(PeerLinkState::Direct)
        );
    }

    #[test]
    fn one_failed_report_with_both_in_means_relay() {
        let mut coordinator = RendezvousCoordinator::new(WINDOW, 2);
        let now = Instant::now();
        coordinator.create_link(SessionId(1), SessionId(2), now);

        coordinator.record_report(SessionId(1), SessionId(2), Some(punch_addr()));
        let (_, outcome) = coordinator.record_report(SessionId(2), SessionId(1), None).unwrap();
        assert_eq!(outcome, ReportOutcome::PunchFailed);
    }

    #[test]
    fn window_expiry_surfaces_the_link_once() {
        let mut coordinator = RendezvousCoordinator::new(WINDOW, 2);
        let now = Instant::now();
        let id = coordinator.create_link(SessionId(1), SessionId(2), now);

        assert!(coordinator.expired(now).is_empty());
        let later = now + WINDOW;
        assert_eq!(coordinator.expired(later), vec![id]);

        coordinator.mark_relayed(id, later);
        assert!(coordinator.expired(later).is_empty());
    }

    #[test]
    fn renegotiation_respects_the_retry_cap() {
        let mut coordinator = RendezvousCoordinator::new(WINDOW, 1);
        let now = Instant::now();
        let id = coordinator.create_link(SessionId(1), SessionId(2), now);

        // attempts: 1 -> renegotiate allowed once with cap 1.
        assert!(coordinator.renegotiate(id, now));
        assert_eq!(coordinator.link(id).unwrap().attempts, 2);
        assert!(!coordinator.renegotiate(id, now));
    }

    #[test]
    fn renegotiation_clears_stale_reports() {
        let mut coordinator = RendezvousCoordinator::new(WINDOW, 2);
        let now = Instant::now();
        let id = coordinator.create_link(SessionId(1), SessionId(2), now);
        coordinator.record_report(SessionId(1), SessionId(2), None);

        assert!(coordinator.renegotiate(id, now));
        let (_, outcome) = coordinator
            .record_report(SessionId(2), SessionId(1), Some(punch_addr()))
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Pending);
    }

    #[test]
    fn teardown_removes_every_pairing_of_a_session() {
        let mut coordinator = RendezvousCoordinator::new(WINDOW, 2);
        let now = Instant::now();
        coordinator.create_link(SessionId(1), SessionId(2), now);
        coordinator.create_link(SessionId(1), SessionId(3), now);
        coordinator.create_link(SessionId(2), SessionId(3), now);

        let removed = coordinator.teardown_session(SessionId(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(coordinator.links_count(), 1);
        assert!(coordinator.pair(SessionId(2), SessionId(3)).is_some());
        // A removed pairing can be recreated fresh.
        coordinator.create_link(SessionId(1), SessionId(2), now);
        assert_eq!(coordinator.links_count(), 2);
    }
}
