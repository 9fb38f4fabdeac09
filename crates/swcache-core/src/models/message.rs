use serde::{Deserialize, Serialize};

/// Messages a page client may post to the cache manager.
///
/// Wire shape is `{"type": "SKIP_WAITING"}`; unknown types are kept as
/// `Unknown` and ignored by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate a waiting manager without waiting for old clients to close.
    SkipWaiting,
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a posted message. Anything that is not an object with a string
    /// `type` field is treated as `Unknown`.
    pub fn from_json(data: &str) -> Self {
        serde_json::from_str(data).unwrap_or(ClientMessage::Unknown)
    }
}
