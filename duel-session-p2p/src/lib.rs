// Domain layer (identities, envelopes, setup messages)
pub mod domain;

// Application layer (signaling, links, bus, session)
pub mod application;

// Infrastructure layer (wire frames, relay and transport adapters)
pub mod infrastructure;

// Re-exports for convenience
pub use application::{
    ActionBus, ChannelState, PeerLinkManager, ReconnectPolicy, Session, SessionConfig,
    SessionEvent, SignalingClient, SignalingEvent, SignalingStatus,
};
pub use domain::{ActionData, DeliveryRoute, Envelope, IceServer, PeerId, SetupMessage};
pub use infrastructure::error::{P2PError, Result};
pub use infrastructure::memory::{
    MemoryConnector, MemoryPeerNetwork, MemoryRelay, MemoryRelayNetwork,
};

#[cfg(feature = "native")]
pub use infrastructure::webrtc::WebRtcConnector;
#[cfg(feature = "native")]
pub use infrastructure::websocket::WebSocketRelay;

/// Session over the WebSocket relay and WebRTC data channels
#[cfg(feature = "native")]
pub type NativeSession = Session<WebSocketRelay, WebRtcConnector>;

/// Session over the in-memory relay and peer network
pub type MemorySession = Session<MemoryRelay, MemoryConnector>;
