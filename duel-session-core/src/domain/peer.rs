use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one participant connection, as announced to the relay.
///
/// The nil id is the local sentinel: it stands in for the local participant
/// until the relay confirms the real id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub const LOCAL: PeerId = PeerId(Uuid::nil());

    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_local_sentinel(&self) -> bool {
        self.0.is_nil()
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local_sentinel() {
            write!(f, "local")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<Uuid> for PeerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}
