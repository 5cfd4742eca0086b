use crate::domain::{ActionData, PeerId};
use crate::infrastructure::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A session member as listed by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub peer_id: PeerId,
    pub name: String,
}

/// Frames sent by a client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Join {
        session_code: String,
        peer_id: PeerId,
        name: String,
    },

    #[serde(rename_all = "camelCase")]
    Leave {
        session_code: String,
        peer_id: PeerId,
    },

    /// Opaque connection-setup payload for one member
    #[serde(rename_all = "camelCase")]
    Signal {
        session_code: String,
        target_peer_id: PeerId,
        signal: Value,
    },

    /// Application message; no target means everyone else in the room
    #[serde(rename_all = "camelCase")]
    Message {
        session_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<PeerId>,
        data: ActionData,
    },
}

/// Frames pushed by the relay to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Members exclude the joiner itself
    #[serde(rename_all = "camelCase")]
    JoinResult {
        success: bool,
        #[serde(default)]
        members: Vec<MemberInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    PeerJoined { peer_id: PeerId, name: String },

    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: PeerId },

    #[serde(rename_all = "camelCase")]
    Signal { from_peer_id: PeerId, signal: Value },

    #[serde(rename_all = "camelCase")]
    Message { from_peer_id: PeerId, data: ActionData },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientFrame::Join { .. } => "join",
            ClientFrame::Leave { .. } => "leave",
            ClientFrame::Signal { .. } => "signal",
            ClientFrame::Message { .. } => "message",
        }
    }
}

impl ServerFrame {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        ServerFrame::JoinResult {
            success: false,
            members: Vec::new(),
            error: Some(error.into()),
        }
    }
}
