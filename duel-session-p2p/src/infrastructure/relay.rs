use crate::infrastructure::error::Result;
use crate::infrastructure::frames::{ClientFrame, ServerFrame};

/// What the relay connection reports back to the signaling client
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// The connection is up and frames can be sent
    Opened,
    Frame(ServerFrame),
    /// Connecting failed or an established connection dropped
    Closed { reason: String },
}

/// Connection to the relay service (allows in-memory relays in tests)
pub trait RelayConnection {
    /// Start connecting; the outcome arrives as `Opened` or `Closed`
    fn open(&mut self) -> Result<()>;

    fn send(&mut self, frame: ClientFrame) -> Result<()>;

    fn poll_events(&mut self) -> Vec<RelayEvent>;

    /// Drop the connection without reporting `Closed`
    fn close(&mut self);
}
