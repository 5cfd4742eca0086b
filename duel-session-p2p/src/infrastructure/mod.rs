pub mod error;
pub mod frames;
pub mod memory;
pub mod relay;
pub mod relay_hub;
pub mod transport;

#[cfg(feature = "native")]
pub mod webrtc;
#[cfg(feature = "native")]
pub mod websocket;

pub use frames::{ClientFrame, MemberInfo, ServerFrame};
pub use relay::{RelayConnection, RelayEvent};
pub use relay_hub::{ConnectionId, FrameSink, RelayHub};
pub use transport::{LinkState, PeerConnector, PeerTransport, TransportEvent};
