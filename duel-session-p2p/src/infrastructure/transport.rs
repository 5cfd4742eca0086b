use crate::domain::{IceCandidate, PeerId, SdpKind};
use crate::infrastructure::error::Result;

/// Connection state of the underlying peer transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// States after which the link is torn down
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LinkState::Disconnected | LinkState::Failed | LinkState::Closed
        )
    }
}

/// Events emitted by a peer transport, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local offer or answer is ready to be signaled
    LocalDescription { kind: SdpKind, sdp: String },
    LocalCandidate(IceCandidate),
    ChannelOpen,
    ChannelClosed,
    Message(Vec<u8>),
    StateChanged(LinkState),
}

/// One direct connection with a single ordered, reliable data channel.
///
/// Operations only enqueue work; results come back through
/// [`PeerTransport::poll_events`].
pub trait PeerTransport {
    fn create_data_channel(&mut self) -> Result<()>;
    fn create_offer(&mut self) -> Result<()>;
    fn create_answer(&mut self) -> Result<()>;
    fn set_remote_description(&mut self, kind: SdpKind, sdp: String) -> Result<()>;
    fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()>;
    fn send(&mut self, data: Vec<u8>) -> Result<()>;
    fn poll_events(&mut self) -> Vec<TransportEvent>;
    fn close(&mut self);
}

/// Factory for peer transports
pub trait PeerConnector {
    type Transport: PeerTransport;

    fn connect(&mut self, local: PeerId, remote: PeerId) -> Result<Self::Transport>;
}
