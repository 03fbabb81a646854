// WebSocket message types for the per-file realtime channel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::op::Operation;
use crate::types::{CursorPosition, PresenceRecord};

/// All message types on the realtime channel. One channel per open file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WsMessage {
    /// Bidirectional: a single replicated-edit operation. The server
    /// broadcasts applied operations to every attached session except the
    /// sender.
    Op { operation: Operation },

    /// Client -> Server: fire-and-forget cursor move. `seq` is the session's
    /// monotonic counter; stale updates are discarded server-side.
    Presence { cursor: CursorPosition, seq: u64 },

    /// Server -> Client: replay of all applied operations, sent once on
    /// attach so a late joiner converges with the live document.
    Sync { operations: Vec<Operation> },

    /// Server -> Client: another session's presence changed.
    PresenceUpdate { presence: PresenceRecord },

    /// Server -> Client: a session disconnected.
    PresenceLeave { session_id: Uuid },

    /// Server -> Client: a rejected message (e.g. an unauthorized write).
    /// The connection stays open for reads.
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::WsMessage;
    use crate::op::{OpId, Operation, PositionKey};
    use crate::types::CursorPosition;
    use uuid::Uuid;

    #[test]
    fn message_tags_match_channel_contract() {
        let op = Operation::insert(
            OpId { origin_id: Uuid::nil(), site_counter: 1 },
            PositionKey::between(None, None),
            'x',
        );
        let json = serde_json::to_value(WsMessage::Op { operation: op }).unwrap();
        assert_eq!(json["type"], "op");

        let json = serde_json::to_value(WsMessage::Presence {
            cursor: CursorPosition { line: 3, column: 10 },
            seq: 7,
        })
        .unwrap();
        assert_eq!(json["type"], "presence");
        assert_eq!(json["cursor"]["line"], 3);

        let json =
            serde_json::to_value(WsMessage::PresenceLeave { session_id: Uuid::nil() }).unwrap();
        assert_eq!(json["type"], "presenceLeave");
        assert_eq!(json["sessionId"], Uuid::nil().to_string());
    }

    #[test]
    fn round_trips_through_json() {
        let message = WsMessage::Error {
            code: "UNAUTHORIZED".to_string(),
            message: "caller lacks permission for this action".to_string(),
        };
        let raw = serde_json::to_string(&message).unwrap();
        let back: WsMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, message);
    }
}
