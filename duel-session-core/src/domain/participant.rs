use crate::domain::PeerId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Role within the session - two seats play, everyone else watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SeatA,
    SeatB,
    Observer,
}

impl Role {
    /// Seats in claim order (SeatA before SeatB)
    pub const SEATS: [Role; 2] = [Role::SeatA, Role::SeatB];

    pub fn is_seat(&self) -> bool {
        !matches!(self, Role::Observer)
    }

    /// The opposing seat, if this is a seat
    pub fn opponent(&self) -> Option<Role> {
        match self {
            Role::SeatA => Some(Role::SeatB),
            Role::SeatB => Some(Role::SeatA),
            Role::Observer => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Observer
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::SeatA => write!(f, "SeatA"),
            Role::SeatB => write!(f, "SeatB"),
            Role::Observer => write!(f, "Observer"),
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
///
/// Each participant stamps its own `joined_at`, and every roster carries that
/// value unchanged, so all peers order participants the same way.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Placeholder for participants we only know from the relay
    pub const UNKNOWN: Timestamp = Timestamp(i64::MAX);

    pub fn now() -> Self {
        Timestamp(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn is_known(&self) -> bool {
        *self != Self::UNKNOWN
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}ms", self.0)
        } else {
            write!(f, "unknown")
        }
    }
}

/// Errors that can occur when working with participants
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParticipantError {
    #[error("Name cannot be empty")]
    EmptyName,

    #[error("Name must be between 1 and 50 characters")]
    InvalidNameLength,
}

/// One entry of the session roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    id: PeerId,
    display_name: String,
    role: Role,
    joined_at: Timestamp,
    /// Bumped by the owner on every change of its own role
    revision: u64,
}

impl Participant {
    /// Create the local participant (validated name, stamped now)
    pub fn new(id: PeerId, display_name: String) -> Result<Self, ParticipantError> {
        Self::validate_name(&display_name)?;

        Ok(Participant {
            id,
            display_name,
            role: Role::Observer,
            joined_at: Timestamp::now(),
            revision: 0,
        })
    }

    /// A participant reported by the relay, before its own record arrives
    pub fn provisional(id: PeerId, display_name: String) -> Self {
        Participant {
            id,
            display_name,
            role: Role::Observer,
            joined_at: Timestamp::UNKNOWN,
            revision: 0,
        }
    }

    pub fn with_joined_at(mut self, joined_at: Timestamp) -> Self {
        self.joined_at = joined_at;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    fn validate_name(name: &str) -> Result<(), ParticipantError> {
        if name.trim().is_empty() {
            return Err(ParticipantError::EmptyName);
        }

        if name.chars().count() > 50 {
            return Err(ParticipantError::InvalidNameLength);
        }

        Ok(())
    }

    // Getters

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn joined_at(&self) -> Timestamp {
        self.joined_at
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_seated(&self) -> bool {
        self.role.is_seat()
    }

    /// Earlier joiners are senior; ties break on the lower id
    pub fn seniority(&self, other: &Participant) -> Ordering {
        (self.joined_at, self.id).cmp(&(other.joined_at, other.id))
    }

    pub fn is_senior_to(&self, other: &Participant) -> bool {
        self.seniority(other) == Ordering::Less
    }

    // State mutations

    /// Change the role as the owner of this record
    pub(crate) fn adopt_role(&mut self, role: Role) {
        if self.role != role {
            self.role = role;
            self.revision += 1;
        }
    }

    /// Change the role as seen by someone else (no revision bump)
    pub(crate) fn record_role(&mut self, role: Role) {
        self.role = role;
    }

    pub(crate) fn rekey(&mut self, id: PeerId) {
        self.id = id;
    }

    pub(crate) fn restamp(&mut self, joined_at: Timestamp) {
        self.joined_at = joined_at;
    }
}
