/// Infrastructure layer errors
#[derive(Debug, thiserror::Error)]
pub enum P2PError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Not joined to a session")]
    NotJoined,

    #[error("Already joined to session {0}")]
    AlreadyJoined(String),

    #[error("Action name is reserved: {0}")]
    ReservedAction(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Participant error: {0}")]
    ParticipantError(#[from] duel_session_core::ParticipantError),
}

pub type Result<T> = std::result::Result<T, P2PError>;
