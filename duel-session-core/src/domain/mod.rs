pub mod participant;
pub mod peer;
pub mod session_state;

pub use participant::{Participant, ParticipantError, Role, Timestamp};
pub use peer::PeerId;
pub use session_state::{Placement, SessionState, SessionStatus};
