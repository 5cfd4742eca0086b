mod backoff;
mod envelope;
mod ice_server;
mod setup;

pub use backoff::Backoff;
pub use envelope::{is_reserved, ActionData, DeliveryRoute, Envelope, GAME_ACTION, ROLE_ACTION};
pub use ice_server::IceServer;
pub use setup::{IceCandidate, SdpKind, SetupMessage};

pub use duel_session_core::PeerId;
