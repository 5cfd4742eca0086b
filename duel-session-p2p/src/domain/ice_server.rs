use serde::{Deserialize, Serialize};

/// STUN/TURN server handed to the peer transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Any of the urls is a TURN relay
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|url| url.starts_with("turn:") || url.starts_with("turns:"))
    }

    /// TURN servers need both a username and a credential
    pub fn is_usable(&self) -> bool {
        !self.urls.is_empty()
            && (!self.is_turn() || (self.username.is_some() && self.credential.is_some()))
    }

    pub fn default_stun_servers() -> Vec<Self> {
        vec![
            Self::stun("stun:stun.l.google.com:19302"),
            Self::stun("stun:stun1.l.google.com:19302"),
        ]
    }
}
