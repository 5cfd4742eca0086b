// Domain layer (roster, identities, roles)
pub mod domain;

// Application layer (seat and game protocols)
pub mod application;

pub use application::{
    GameError, GameMessage, GameNotice, GameStep, GameSync, Negotiation, Outbound,
    PendingSwapRequest, PendingUndo, RoleError, RoleMessage, RoleNegotiator, RoleNotice,
    SwapProposal,
};
pub use domain::{
    Participant, ParticipantError, PeerId, Placement, Role, SessionState, SessionStatus,
    Timestamp,
};
