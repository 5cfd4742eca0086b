use crate::domain::PeerId;
use duel_session_core::{PendingSwapRequest, PendingUndo, Role, SessionStatus};

/// Events emitted by a [`Session`](crate::Session) for the application
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// `error` is set while retrying the relay and after giving up
    StatusChanged {
        status: SessionStatus,
        error: Option<String>,
    },
    ParticipantJoined {
        peer_id: PeerId,
        display_name: String,
    },
    ParticipantLeft {
        peer_id: PeerId,
        display_name: String,
    },
    RoleChanged {
        peer_id: PeerId,
        from: Role,
        to: Role,
    },
    /// Both seats occupied (or no longer)
    ReadinessChanged(bool),
    LinkOpened(PeerId),
    LinkLost(PeerId),
    SwapRequested(PendingSwapRequest),
    SwapResolved {
        with: PeerId,
        approved: bool,
    },
    TimedOut {
        loser: Role,
        announced_by: PeerId,
    },
    UndoRequested(PendingUndo),
    /// Roll back `moves` moves in the game state
    UndoApplied {
        moves: u32,
        requester: PeerId,
    },
    UndoRejected {
        moves: u32,
    },
}
