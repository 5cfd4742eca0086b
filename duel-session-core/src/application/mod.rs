mod game_sync;
mod role_negotiator;

pub use game_sync::{GameError, GameMessage, GameNotice, GameStep, GameSync, PendingUndo};
pub use role_negotiator::{
    Negotiation, PendingSwapRequest, RoleError, RoleMessage, RoleNegotiator, RoleNotice,
    SwapProposal,
};

use crate::domain::PeerId;

/// A protocol message waiting to be put on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound<M> {
    /// `None` means every known peer
    pub to: Option<PeerId>,
    pub message: M,
}

impl<M> Outbound<M> {
    pub fn to(peer: PeerId, message: M) -> Self {
        Self {
            to: Some(peer),
            message,
        }
    }

    pub fn broadcast(message: M) -> Self {
        Self { to: None, message }
    }
}
