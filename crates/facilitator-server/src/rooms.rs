use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use facilitator_core::error::{ErrorKind, Result};
use facilitator_protocol::message::{
    RoomFilter, RoomId, RoomSummary, RoomTarget, SessionId, Visibility,
};

/// Parameters for creating a room.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Human-readable name.
    pub name: String,
    /// Maximum member count; clamped to the directory's limit.
    pub capacity: u16,
    /// Discovery/join policy.
    pub visibility: Visibility,
    /// Required for password-protected rooms.
    pub password: Option<String>,
}

/// One collaborative room.
#[derive(Debug)]
pub struct Room {
    /// Room id.
    pub id: RoomId,
    /// Human-readable name.
    pub name: String,
    /// Maximum member count.
    pub capacity: u16,
    /// Discovery/join policy.
    pub visibility: Visibility,
    password: Option<String>,
    members: Vec<SessionId>,
    /// When the room was created.
    pub created_at: Instant,
    empty_since: Option<Instant>,
}

impl Room {
    /// Members in join order; the first member is the host, and the join
    /// order is the tie-break for host migration.
    pub fn members(&self) -> &[SessionId] {
        &self.members
    }

    /// Current host: the earliest joiner still present.
    pub fn host(&self) -> Option<SessionId> {
        self.members.first().copied()
    }

    /// True when no more members fit.
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity as usize
    }

    /// Listing row for this room.
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.id,
            name: self.name.clone(),
            visibility: self.visibility,
            capacity: self.capacity,
            members: self.members.len() as u16,
        }
    }
}

/// The single owned table of rooms.
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Room>,
    next_room: u64,
    max_rooms: usize,
    max_capacity: u16,
}

impl std::fmt::Debug for RoomDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomDirectory").field("rooms", &self.rooms.len()).finish()
    }
}

impl RoomDirectory {
    /// Creates a directory with the given caps.
    pub fn new(max_rooms: usize, max_capacity: u16) -> Self {
        Self { rooms: HashMap::new(), next_room: 1, max_rooms, max_capacity }
    }

    /// Creates a room. The room starts empty and is subject to the empty
    /// TTL until someone joins.
    pub fn create(&mut self, config: RoomConfig, now: Instant) -> Result<RoomId> {
        if self.rooms.len() >= self.max_rooms {
            return Err(ErrorKind::CapacityError("rooms"));
        }
        if config.visibility == Visibility::PasswordProtected && config.password.is_none() {
            return Err(ErrorKind::BadPasswordError);
        }
        let id = RoomId(self.next_room);
        self.next_room += 1;
        self.rooms.insert(id, Room {
            id,
            name: config.name,
            capacity: config.capacity.clamp(1, self.max_capacity),
            visibility: config.visibility,
            password: config.password,
            members: Vec::new(),
            created_at: now,
            empty_since: Some(now),
        });
        Ok(id)
    }

    /// Joins a session to a room by id or criteria. Returns the room id and
    /// the members that were present before this join, in join order.
    ///
    /// The caller is responsible for the at-most-one-room invariant; this
    /// method only manages the room side.
    pub fn join(
        &mut self,
        session: SessionId,
        target: &RoomTarget,
        password: Option<&str>,
    ) -> Result<(RoomId, Vec<SessionId>)> {
        let room_id = match target {
            RoomTarget::Id(id) => *id,
            RoomTarget::Match { name } => self
                .rooms
                .values()
                .filter(|room| room.visibility == Visibility::Public && !room.is_full())
                .filter(|room| name.as_deref().map_or(true, |n| room.name == n))
                .min_by_key(|room| room.id)
                .map(|room| room.id)
                .ok_or(ErrorKind::RoomNotFoundError)?,
        };
        let room = self.rooms.get_mut(&room_id).ok_or(ErrorKind::RoomNotFoundError)?;

        if room.visibility == Visibility::PasswordProtected
            && room.password.as_deref() != password
        {
            return Err(ErrorKind::BadPasswordError);
        }
        if room.is_full() {
            return Err(ErrorKind::RoomFullError);
        }

        let existing = room.members.clone();
        room.members.push(session);
        room.empty_since = None;
        Ok((room_id, existing))
    }

    /// Removes a session from a room. An emptied room is not destroyed
    /// immediately; it lingers for the grace TTL to tolerate reconnects.
    pub fn leave(&mut self, session: SessionId, room_id: RoomId, now: Instant) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.members.retain(|member| *member != session);
            if room.members.is_empty() {
                room.empty_since = Some(now);
            }
        }
    }

    /// Borrows a room.
    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    /// Destroys rooms that have been empty past the TTL, returning their ids.
    pub fn sweep_empty(&mut self, now: Instant, ttl: Duration) -> Vec<RoomId> {
        let dead: Vec<RoomId> = self
            .rooms
            .values()
            .filter(|room| {
                room.empty_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= ttl)
            })
            .map(|room| room.id)
            .collect();
        for id in &dead {
            self.rooms.remove(id);
        }
        dead
    }

    /// Lists rooms matching the filter. Private rooms are never listed.
    pub fn list(&self, filter: &RoomFilter) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .values()
            .filter(|room| room.visibility != Visibility::Private)
            .filter(|room| filter.include_full || !room.is_full())
            .filter(|room| {
                filter.name_prefix.as_deref().map_or(true, |prefix| room.name.starts_with(prefix))
            })
            .map(Room::summary)
            .collect();
        summaries.sort_by_key(|summary| summary.room_id);
        summaries
    }

    /// Number of rooms, including empty ones inside their grace TTL.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True when the directory holds no rooms.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, capacity: u16) -> RoomConfig {
        RoomConfig {
            name: name.to_owned(),
            capacity,
            visibility: Visibility::Public,
            password: None,
        }
    }

    #[test]
    fn capacity_bounds_membership() {
        let mut directory = RoomDirectory::new(4, 64);
        let now = Instant::now();
        let room_id = directory.create(config("atrium", 2), now).unwrap();

        directory.join(SessionId(1), &RoomTarget::Id(room_id), None).unwrap();
        directory.join(SessionId(2), &RoomTarget::Id(room_id), None).unwrap();
        let err = directory.join(SessionId(3), &RoomTarget::Id(room_id), None).unwrap_err();
        assert!(matches!(err, ErrorKind::RoomFullError));
        assert_eq!(directory.room(room_id).unwrap().members().len(), 2);
    }

    #[test]
    fn join_returns_prior_members_in_join_order() {
        let mut directory = RoomDirectory::new(4, 64);
        let now = Instant::now();
        let room_id = directory.create(config("atrium", 4), now).unwrap();

        let (_, first) = directory.join(SessionId(5), &RoomTarget::Id(room_id), None).unwrap();
        assert!(first.is_empty());
        let (_, second) = directory.join(SessionId(6), &RoomTarget::Id(room_id), None).unwrap();
        assert_eq!(second, vec![SessionId(5)]);
        assert_eq!(directory.room(room_id).unwrap().host(), Some(SessionId(5)));
    }

    #[test]
    fn host_follows_join_order_after_leave() {
        let mut directory = RoomDirectory::new(4, 64);
        let now = Instant::now();
        let room_id = directory.create(config("atrium", 4), now).unwrap();
        directory.join(SessionId(1), &RoomTarget::Id(room_id), None).unwrap();
        directory.join(SessionId(2), &RoomTarget::Id(room_id), None).unwrap();
        directory.join(SessionId(3), &RoomTarget::Id(room_id), None).unwrap();

        directory.leave(SessionId(1), room_id, now);
        assert_eq!(directory.room(room_id).unwrap().host(), Some(SessionId(2)));
    }

    #[test]
    fn unknown_room_is_not_found() {
        let mut directory = RoomDirectory::new(4, 64);
        let err = directory
            .join(SessionId(1), &RoomTarget::Id(RoomId(77)), None)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::RoomNotFoundError));
    }

    #[test]
    fn match_target_picks_a_public_room_with_space() {
        let mut directory = RoomDirectory::new(4, 64);
        let now = Instant::now();
        let full = directory.create(config("full", 1), now).unwrap();
        directory.join(SessionId(1), &RoomTarget::Id(full), None).unwrap();
        let open = directory.create(config("open", 2), now).unwrap();

        let (found, _) = directory
            .join(SessionId(2), &RoomTarget::Match { name: None }, None)
            .unwrap();
        assert_eq!(found, open);
    }

    #[test]
    fn password_protected_rooms_check_the_password() {
        let mut directory = RoomDirectory::new(4, 64);
        let now = Instant::now();
        let room_id = directory
            .create(
                RoomConfig {
                    name: "vault".into(),
                    capacity: 4,
                    visibility: Visibility::PasswordProtected,
                    password: Some("sesame".into()),
                },
                now,
            )
            .unwrap();

        let err = directory
            .join(SessionId(1), &RoomTarget::Id(room_id), Some("wrong"))
            .unwrap_err();
        assert!(matches!(err, ErrorKind::BadPasswordError));
        directory.join(SessionId(1), &RoomTarget::Id(room_id), Some("sesame")).unwrap();
    }

    #[test]
    fn emptied_room_survives_until_ttl() {
        let mut directory = RoomDirectory::new(4, 64);
        let now = Instant::now();
        let room_id = directory.create(config("atrium", 4), now).unwrap();
        directory.join(SessionId(1), &RoomTarget::Id(room_id), None).unwrap();
        directory.leave(SessionId(1), room_id, now);

        let ttl = Duration::from_secs(30);
        assert!(directory.sweep_empty(now + Duration::from_secs(29), ttl).is_empty());
        // A rejoin within the grace window cancels destruction.
        directory.join(SessionId(2), &RoomTarget::Id(room_id), None).unwrap();
        assert!(directory.sweep_empty(now + Duration::from_secs(60), ttl).is_empty());

        directory.leave(SessionId(2), room_id, now + Duration::from_secs(60));
        let dead = directory.sweep_empty(now + Duration::from_secs(91), ttl);
        assert_eq!(dead, vec![room_id]);
        assert!(directory.room(room_id).is_none());
    }

    #[test]
    fn listing_honors_visibility_and_filter() {
        let mut directory = RoomDirectory::new(8, 64);
        let now = Instant::now();
        directory.create(config("alpha", 2), now).unwrap();
        directory
            .create(
                RoomConfig {
                    name: "hidden".into(),
                    capacity: 2,
                    visibility: Visibility::Private,
                    password: None,
                },
                now,
            )
            .unwrap();
        let full = directory.create(config("beta", 1), now).unwrap();
        directory.join(SessionId(1), &RoomTarget::Id(full), None).unwrap();

        let open = directory.list(&RoomFilter::default());
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].name, "alpha");

        let all = directory.list(&RoomFilter { include_full: true, name_prefix: None });
        assert_eq!(all.len(), 2);

        let prefixed = directory.list(&RoomFilter {
            include_full: true,
            name_prefix: Some("be".into()),
        });
        assert_eq!(prefixed.len(), 1);
        assert_eq!(prefixed[0].name, "beta");
    }

    #[test]
    fn rooms_cap_is_enforced() {
        let mut directory = RoomDirectory::new(1, 64);
        let now = Instant::now();
        directory.create(config("one", 2), now).unwrap();
        let err = directory.create(config("two", 2), now).unwrap_err();
        assert!(matches!(err, ErrorKind::CapacityError(_)));
    }
}
