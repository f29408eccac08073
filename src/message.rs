//! Wire message type shared by the game and chat streams.
//!
//! Both directions carry the same shape: a JSON object with a required
//! `type` discriminator and an optional, untyped `data` payload, sent as a
//! UTF-8 text frame.
//!
//! ```json
//! {"type": "message", "data": {"content": "B-12!", "player": "alice"}}
//! ```
//!
//! The client does not interpret `type` beyond routing the whole record to
//! registered listeners; the constants in [`kind`] cover the discriminators
//! the bingo servers currently emit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known `type` discriminators used by the game and chat servers.
///
/// Applications are free to use their own discriminators; nothing in the
/// client restricts `kind` to this list.
pub mod kind {
    /// A chat message from another player.
    pub const MESSAGE: &str = "message";
    /// A server-generated notice (player joined, game starting, ...).
    pub const SYSTEM: &str = "system";
    /// A player marked a cell / called a number.
    pub const MOVE: &str = "move";
    /// A player signalled readiness.
    pub const READY: &str = "ready";
    /// Full game-state snapshot pushed by the server.
    pub const GAME_STATE: &str = "game_state";
    /// The server declared a winner.
    pub const WINNER: &str = "winner";
}

/// A single message on a realtime channel.
///
/// `kind` is serialized as `type` on the wire. Extra fields on inbound
/// records are ignored; a record without a string `type` fails to decode
/// and is dropped by the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message type discriminator (`"message"`, `"system"`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary structured payload. Omitted from the wire when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ChannelMessage {
    /// Create a message with no payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
        }
    }

    /// Create a message carrying the given payload.
    pub fn with_data(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data),
        }
    }

    /// Returns `true` if this message has the given `type` discriminator.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_kind_as_type() {
        let msg = ChannelMessage::new("ready");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"type": "ready"}));
    }

    #[test]
    fn data_is_omitted_when_none() {
        let text = serde_json::to_string(&ChannelMessage::new("system")).unwrap();
        assert!(!text.contains("data"));
    }

    #[test]
    fn round_trips_payload() {
        let msg = ChannelMessage::with_data(kind::MOVE, json!({"number": 42}));
        let text = serde_json::to_string(&msg).unwrap();
        let back: ChannelMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn decodes_records_with_extra_fields() {
        let msg: ChannelMessage =
            serde_json::from_str(r#"{"type":"system","text":"joined","ts":123}"#).unwrap();
        assert!(msg.is(kind::SYSTEM));
        assert!(msg.data.is_none());
    }

    #[test]
    fn missing_type_is_an_error() {
        let result = serde_json::from_str::<ChannelMessage>(r#"{"data":{"x":1}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn non_string_type_is_an_error() {
        let result = serde_json::from_str::<ChannelMessage>(r#"{"type":5}"#);
        assert!(result.is_err());
    }
}
