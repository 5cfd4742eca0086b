mod action_bus;
mod config;
mod events;
mod peer_links;
pub mod runtime;
mod signaling;

pub use action_bus::{ActionBus, ActionHandler, DEFAULT_BUFFER_LIMIT};
pub use config::{ReconnectPolicy, SessionConfig};
pub use events::SessionEvent;
pub use peer_links::{ChannelState, LinkEvent, PeerLink, PeerLinkManager};
pub use runtime::Session;
pub use signaling::{SignalingClient, SignalingEvent, SignalingStatus};
