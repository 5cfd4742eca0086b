use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which side of the offer/answer exchange a description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Connectivity candidate in the browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Connection-setup payload carried in relay `signal` frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SetupMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

impl SetupMessage {
    pub fn description(kind: SdpKind, sdp: String) -> Self {
        match kind {
            SdpKind::Offer => SetupMessage::Offer { sdp },
            SdpKind::Answer => SetupMessage::Answer { sdp },
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SetupMessage::Offer { .. } => "offer",
            SetupMessage::Answer { .. } => "answer",
            SetupMessage::Candidate { .. } => "candidate",
        }
    }
}
