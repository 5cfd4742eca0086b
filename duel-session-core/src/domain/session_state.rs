use crate::domain::{Participant, ParticipantError, PeerId, Role, Timestamp};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Connection status of the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Connecting => write!(f, "Connecting"),
            SessionStatus::Connected => write!(f, "Connected"),
            SessionStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Result of putting a participant on a role in the local roster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Role the participant actually ended up with
    pub role: Role,
    /// Participant that lost the seat to it, if any
    pub displaced: Option<PeerId>,
}

/// Locally observed view of the session.
///
/// Holds at most one participant per seat at any time. Conflicting seat
/// assignments are settled by seniority (see [`Participant::seniority`]).
#[derive(Debug, Clone)]
pub struct SessionState {
    status: SessionStatus,
    session_code: Option<String>,
    local: Participant,
    remotes: HashMap<PeerId, Participant>,
    last_error: Option<String>,
}

impl SessionState {
    pub fn new(display_name: String) -> Result<Self, ParticipantError> {
        Ok(Self {
            status: SessionStatus::Idle,
            session_code: None,
            local: Participant::new(PeerId::LOCAL, display_name)?,
            remotes: HashMap::new(),
            last_error: None,
        })
    }

    // Queries

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session_code(&self) -> Option<&str> {
        self.session_code.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn local_id(&self) -> PeerId {
        self.local.id()
    }

    pub fn local_role(&self) -> Role {
        self.local.role()
    }

    pub fn participant(&self, id: PeerId) -> Option<&Participant> {
        if id == self.local.id() {
            Some(&self.local)
        } else {
            self.remotes.get(&id)
        }
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.participant(id).is_some()
    }

    /// All participants, local first, the rest by seniority
    pub fn participants(&self) -> Vec<&Participant> {
        let mut remotes: Vec<&Participant> = self.remotes.values().collect();
        remotes.sort_by(|a, b| a.seniority(b));
        std::iter::once(&self.local).chain(remotes).collect()
    }

    pub fn participant_count(&self) -> usize {
        self.remotes.len() + 1
    }

    pub fn remote_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.remotes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn occupant(&self, role: Role) -> Option<&Participant> {
        if !role.is_seat() {
            return None;
        }
        self.participants().into_iter().find(|p| p.role() == role)
    }

    pub fn first_vacant_seat(&self) -> Option<Role> {
        Role::SEATS
            .into_iter()
            .find(|seat| self.occupant(*seat).is_none())
    }

    /// Both seats are occupied
    pub fn session_ready(&self) -> bool {
        Role::SEATS
            .iter()
            .all(|seat| self.occupant(*seat).is_some())
    }

    /// The local participant is the most senior observer in the roster
    pub fn is_senior_observer(&self) -> bool {
        if self.local.role() != Role::Observer {
            return false;
        }
        self.remotes
            .values()
            .filter(|p| p.role() == Role::Observer)
            .all(|p| self.local.is_senior_to(p))
    }

    pub fn roles(&self) -> BTreeMap<PeerId, Role> {
        self.participants()
            .into_iter()
            .map(|p| (p.id(), p.role()))
            .collect()
    }

    // Lifecycle

    /// Start joining a session: stamps the local join time
    pub fn begin(&mut self, session_code: String) {
        self.begin_at(session_code, Timestamp::now());
    }

    pub fn begin_at(&mut self, session_code: String, joined_at: Timestamp) {
        self.session_code = Some(session_code);
        self.local.restamp(joined_at);
        self.status = SessionStatus::Connecting;
        self.last_error = None;
    }

    /// Replace the local sentinel with the id confirmed by the relay
    pub fn confirm_local_id(&mut self, id: PeerId) {
        if self.local.id() != id {
            tracing::debug!("🔑 Local id confirmed: {} -> {}", self.local.id(), id);
            self.remotes.remove(&id);
            self.local.rekey(id);
        }
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.last_error = error;
    }

    /// Forget everything learned in the session
    pub fn reset(&mut self) {
        self.remotes.clear();
        self.local.adopt_role(Role::Observer);
        self.local.rekey(PeerId::LOCAL);
        self.session_code = None;
        self.status = SessionStatus::Disconnected;
    }

    // Roster mutations

    /// Add a relay-reported member; returns true if it was unknown
    pub fn upsert_member(&mut self, id: PeerId, display_name: String) -> bool {
        if id == self.local.id() || self.remotes.contains_key(&id) {
            return false;
        }
        self.remotes
            .insert(id, Participant::provisional(id, display_name));
        true
    }

    pub fn remove(&mut self, id: PeerId) -> Option<Participant> {
        self.remotes.remove(&id)
    }

    /// Merge a record received from the network.
    ///
    /// Records older than the known revision are ignored, as are records
    /// about the local participant.
    pub fn apply_remote(&mut self, record: &Participant) -> Option<Placement> {
        let id = record.id();
        if id == self.local.id() || id.is_local_sentinel() {
            return None;
        }

        let entry = self
            .remotes
            .entry(id)
            .or_insert_with(|| Participant::provisional(id, record.display_name().to_string()));

        if record.revision() < entry.revision() {
            tracing::debug!(
                "Ignoring stale record for {} (rev {} < {})",
                id,
                record.revision(),
                entry.revision()
            );
            return None;
        }

        let mut merged = record.clone();
        if !merged.joined_at().is_known() && entry.joined_at().is_known() {
            merged.restamp(entry.joined_at());
        }
        let role = merged.role();
        merged.record_role(Role::Observer);
        *entry = merged;

        self.place(id, role)
    }

    /// Put a participant on a role while keeping one participant per seat.
    ///
    /// If another participant already holds the seat, the senior of the two
    /// keeps it and the other becomes an Observer.
    pub fn place(&mut self, id: PeerId, role: Role) -> Option<Placement> {
        let candidate = self.participant(id)?.clone();

        if !role.is_seat() {
            self.set_role(id, Role::Observer);
            return Some(Placement {
                role: Role::Observer,
                displaced: None,
            });
        }

        let holder = self
            .participants()
            .into_iter()
            .find(|p| p.role() == role && p.id() != id)
            .cloned();

        match holder {
            None => {
                self.set_role(id, role);
                Some(Placement {
                    role,
                    displaced: None,
                })
            }
            Some(holder) if candidate.is_senior_to(&holder) => {
                tracing::info!(
                    "👑 {} takes {} from junior {}",
                    candidate.display_name(),
                    role,
                    holder.display_name()
                );
                self.set_role(holder.id(), Role::Observer);
                self.set_role(id, role);
                Some(Placement {
                    role,
                    displaced: Some(holder.id()),
                })
            }
            Some(holder) => {
                tracing::info!(
                    "👑 {} keeps {}; {} stays Observer",
                    holder.display_name(),
                    role,
                    candidate.display_name()
                );
                self.set_role(id, Role::Observer);
                Some(Placement {
                    role: Role::Observer,
                    displaced: None,
                })
            }
        }
    }

    /// Exchange the roles of two participants in one step
    pub fn exchange_roles(&mut self, a: PeerId, b: PeerId) -> bool {
        let (Some(pa), Some(pb)) = (self.participant(a), self.participant(b)) else {
            return false;
        };
        let (role_a, role_b) = (pa.role(), pb.role());
        self.set_role(a, role_b);
        self.set_role(b, role_a);
        true
    }

    /// Apply the outcome of a swap between two other participants
    pub fn apply_exchange(&mut self, first: &Participant, second: &Participant) {
        let mut updated = Vec::new();
        for record in [first, second] {
            if let Some(known) = self.remotes.get_mut(&record.id()) {
                if record.revision() >= known.revision() {
                    let joined_at = pick_known(record.joined_at(), known.joined_at());
                    *known = record.clone().with_joined_at(joined_at);
                    known.record_role(Role::Observer);
                    updated.push((record.id(), record.role()));
                }
            }
        }
        for (id, role) in updated {
            self.place(id, role);
        }
    }

    fn set_role(&mut self, id: PeerId, role: Role) {
        if id == self.local.id() {
            self.local.adopt_role(role);
        } else if let Some(p) = self.remotes.get_mut(&id) {
            p.record_role(role);
        }
    }
}

fn pick_known(preferred: Timestamp, fallback: Timestamp) -> Timestamp {
    if preferred.is_known() {
        preferred
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str) -> SessionState {
        let mut state = SessionState::new(name.to_string()).unwrap();
        state.begin("ROOM1".to_string());
        state.confirm_local_id(PeerId::random());
        state
    }

    fn record(joined: i64, role: Role) -> Participant {
        Participant::provisional(PeerId::random(), format!("p{}", joined))
            .with_joined_at(Timestamp::from_millis(joined))
            .with_role(role)
    }

    #[test]
    fn test_new_state_uses_local_sentinel() {
        let state = SessionState::new("Alice".to_string()).unwrap();

        assert_eq!(state.status(), SessionStatus::Idle);
        assert_eq!(state.local_id(), PeerId::LOCAL);
        assert_eq!(state.local_role(), Role::Observer);
        assert_eq!(state.participant_count(), 1);
    }

    #[test]
    fn test_confirm_local_id_rekeys_local() {
        let mut state = SessionState::new("Alice".to_string()).unwrap();
        let id = PeerId::random();

        state.confirm_local_id(id);

        assert_eq!(state.local_id(), id);
        assert!(state.participant(PeerId::LOCAL).is_none());
        assert_eq!(state.participant(id).unwrap().display_name(), "Alice");
    }

    #[test]
    fn test_upsert_member_is_idempotent() {
        let mut state = state("Alice");
        let bob = PeerId::random();

        assert!(state.upsert_member(bob, "Bob".to_string()));
        assert!(!state.upsert_member(bob, "Bob".to_string()));
        assert!(!state.upsert_member(state.local_id(), "Alice".to_string()));
        assert_eq!(state.participant_count(), 2);
    }

    #[test]
    fn test_place_on_vacant_seat() {
        let mut state = state("Alice");
        let bob = record(100, Role::Observer);
        state.apply_remote(&bob);

        let placement = state.place(bob.id(), Role::SeatB).unwrap();

        assert_eq!(placement.role, Role::SeatB);
        assert_eq!(state.occupant(Role::SeatB).unwrap().id(), bob.id());
        assert_eq!(state.first_vacant_seat(), Some(Role::SeatA));
    }

    #[test]
    fn test_place_conflict_senior_keeps_seat() {
        let mut state = state("Alice");
        let senior = record(100, Role::SeatA);
        let junior = record(200, Role::SeatA);

        state.apply_remote(&senior);
        let placement = state.apply_remote(&junior).unwrap();

        assert_eq!(placement.role, Role::Observer);
        assert_eq!(state.occupant(Role::SeatA).unwrap().id(), senior.id());
    }

    #[test]
    fn test_place_conflict_senior_displaces_junior() {
        let mut state = state("Alice");
        let senior = record(100, Role::SeatA);
        let junior = record(200, Role::SeatA);

        state.apply_remote(&junior);
        let placement = state.apply_remote(&senior).unwrap();

        assert_eq!(placement.role, Role::SeatA);
        assert_eq!(placement.displaced, Some(junior.id()));
        assert_eq!(state.participant(junior.id()).unwrap().role(), Role::Observer);
    }

    #[test]
    fn test_never_two_holders_per_seat() {
        let mut state = state("Alice");
        for joined in [500, 100, 300, 200, 400] {
            state.apply_remote(&record(joined, Role::SeatB));
        }

        let holders = state
            .participants()
            .into_iter()
            .filter(|p| p.role() == Role::SeatB)
            .count();
        assert_eq!(holders, 1);
        assert_eq!(
            state.occupant(Role::SeatB).unwrap().joined_at(),
            Timestamp::from_millis(100)
        );
    }

    #[test]
    fn test_stale_revision_is_ignored() {
        let mut state = state("Alice");
        let mut bob = record(100, Role::Observer);
        bob.adopt_role(Role::SeatB);
        state.apply_remote(&bob);

        let stale = Participant::provisional(bob.id(), "p100".to_string())
            .with_joined_at(Timestamp::from_millis(100));

        assert!(state.apply_remote(&stale).is_none());
        assert_eq!(state.participant(bob.id()).unwrap().role(), Role::SeatB);
    }

    #[test]
    fn test_records_about_self_are_ignored() {
        let mut state = state("Alice");
        let me = Participant::provisional(state.local_id(), "Alice".to_string())
            .with_role(Role::SeatA);

        assert!(state.apply_remote(&me).is_none());
        assert_eq!(state.local_role(), Role::Observer);
    }

    #[test]
    fn test_session_ready_requires_both_seats() {
        let mut state = state("Alice");
        state.place(state.local_id(), Role::SeatA);
        assert!(!state.session_ready());

        state.apply_remote(&record(100, Role::SeatB));
        assert!(state.session_ready());
    }

    #[test]
    fn test_exchange_roles() {
        let mut state = state("Alice");
        state.place(state.local_id(), Role::SeatA);
        let bob = record(100, Role::SeatB);
        state.apply_remote(&bob);

        assert!(state.exchange_roles(state.local_id(), bob.id()));

        assert_eq!(state.local_role(), Role::SeatB);
        assert_eq!(state.participant(bob.id()).unwrap().role(), Role::SeatA);
        assert!(!state.exchange_roles(state.local_id(), PeerId::random()));
    }

    #[test]
    fn test_senior_observer() {
        let mut state = state("Alice");
        assert!(state.is_senior_observer());

        let older = record(0, Role::Observer);
        state.apply_remote(&older);
        assert!(!state.is_senior_observer());
    }

    #[test]
    fn test_reset_returns_to_sentinel() {
        let mut state = state("Alice");
        state.place(state.local_id(), Role::SeatA);
        state.upsert_member(PeerId::random(), "Bob".to_string());

        state.reset();

        assert_eq!(state.local_id(), PeerId::LOCAL);
        assert_eq!(state.local_role(), Role::Observer);
        assert_eq!(state.participant_count(), 1);
        assert_eq!(state.status(), SessionStatus::Disconnected);
    }
}
