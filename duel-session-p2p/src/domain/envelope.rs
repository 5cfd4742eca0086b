use crate::domain::PeerId;
use crate::infrastructure::error::{P2PError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Seat protocol messages
pub const ROLE_ACTION: &str = "session/role";

/// Timeout and undo handshakes
pub const GAME_ACTION: &str = "game/sync";

pub fn is_reserved(action: &str) -> bool {
    action == ROLE_ACTION || action == GAME_ACTION
}

/// `{action, payload}` as it travels on the direct channel and inside relay frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionData {
    pub action: String,
    pub payload: Value,
}

impl ActionData {
    pub fn new(action: impl Into<String>, payload: Value) -> Result<Self> {
        let data = Self {
            action: action.into(),
            payload,
        };
        data.validate()?;
        Ok(data)
    }

    /// Payloads are flat JSON objects; the action name must be present
    pub fn validate(&self) -> Result<()> {
        if self.action.is_empty() {
            return Err(P2PError::InvalidPayload("empty action name".to_string()));
        }
        if !self.payload.is_object() {
            return Err(P2PError::InvalidPayload(format!(
                "payload of '{}' is not an object",
                self.action
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data: Self = serde_json::from_slice(bytes)?;
        data.validate()?;
        Ok(data)
    }
}

/// Path an envelope took to reach us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    Direct,
    Relay,
}

/// A received application message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub action: String,
    pub payload: Value,
    pub sender: PeerId,
    pub route: DeliveryRoute,
}

impl Envelope {
    pub fn new(data: ActionData, sender: PeerId, route: DeliveryRoute) -> Self {
        Self {
            action: data.action,
            payload: data.payload,
            sender,
            route,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("session/role"));
        assert!(is_reserved("game/sync"));
        assert!(!is_reserved("move"));
    }

    #[test]
    fn test_payload_must_be_object() {
        assert!(ActionData::new("move", json!({ "row": 3, "col": 4 })).is_ok());
        assert!(matches!(
            ActionData::new("move", json!([3, 4])),
            Err(P2PError::InvalidPayload(_))
        ));
        assert!(ActionData::new("", json!({})).is_err());
    }

    #[test]
    fn test_direct_channel_bytes() {
        let data = ActionData::new("chat", json!({ "text": "hi" })).unwrap();
        let bytes = data.to_bytes().unwrap();
        assert_eq!(ActionData::from_bytes(&bytes).unwrap(), data);

        assert!(ActionData::from_bytes(b"{\"action\":\"chat\"}").is_err());
        assert!(ActionData::from_bytes(b"not json").is_err());
    }
}
