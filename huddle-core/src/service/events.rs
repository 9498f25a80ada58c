use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{CallId, DeliveryStatus, MessageKind, RoomId, SessionId, UserId};

/// Chat message as it travels on the wire. Clients deduplicate their own
/// echo by `messageId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    #[serde(rename = "senderId")]
    pub sender_id: UserId,
    #[serde(rename = "senderUsername")]
    pub sender_username: String,
    pub content: Option<String>,
    pub message_type: MessageKind,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUser {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub username: String,
}

/// Server-to-client events. Serialized as `{"event": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserStatusChanged {
        user_id: UserId,
        username: String,
        is_online: bool,
    },
    UsersOnline {
        users: Vec<OnlineUser>,
    },
    UserTyping {
        room_id: RoomId,
        user_id: UserId,
        username: String,
    },
    UserStoppedTyping {
        room_id: RoomId,
        user_id: UserId,
        username: String,
    },
    ReceiveGroupMessage(MessagePayload),
    ReceivePrivateMessage(MessagePayload),
    MessageEdited(MessagePayload),
    MessageStatusUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        room_id: RoomId,
        user_id: UserId,
        status: DeliveryStatus,
    },
    IncomingCall {
        room_id: RoomId,
        call_id: CallId,
        from: UserId,
        username: String,
        signal: Value,
        is_video: bool,
    },
    CallRinging {
        room_id: RoomId,
    },
    CallAccepted {
        room_id: RoomId,
        signal: Value,
    },
    CallRejected {
        room_id: RoomId,
    },
    CallEnded {
        room_id: RoomId,
    },
    IceCandidate {
        candidate: Value,
        from: SessionId,
    },
    NewProducer {
        room_id: RoomId,
        producer_id: String,
        peer_id: SessionId,
        kind: String,
        username: String,
    },
    PeerLeft {
        room_id: RoomId,
        peer_id: SessionId,
    },
}

impl ServerEvent {
    /// Wire name, mostly for log lines.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UserStatusChanged { .. } => "user_status_changed",
            Self::UsersOnline { .. } => "users_online",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStoppedTyping { .. } => "user_stopped_typing",
            Self::ReceiveGroupMessage(_) => "receive_group_message",
            Self::ReceivePrivateMessage(_) => "receive_private_message",
            Self::MessageEdited(_) => "message_edited",
            Self::MessageStatusUpdate { .. } => "message_status_update",
            Self::IncomingCall { .. } => "incoming_call",
            Self::CallRinging { .. } => "call_ringing",
            Self::CallAccepted { .. } => "call_accepted",
            Self::CallRejected { .. } => "call_rejected",
            Self::CallEnded { .. } => "call_ended",
            Self::IceCandidate { .. } => "ice_candidate",
            Self::NewProducer { .. } => "new_producer",
            Self::PeerLeft { .. } => "peer_left",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let event = ServerEvent::CallRinging {
            room_id: RoomId::from("room00000001"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "call_ringing");
        assert_eq!(json["data"]["room_id"], "room00000001");
    }

    #[test]
    fn test_message_payload_field_names() {
        let payload = MessagePayload {
            message_id: "m00000000001".to_string(),
            room_id: RoomId::from("room00000001"),
            sender_id: UserId::from("user00000001"),
            sender_username: "alice".to_string(),
            content: Some("hi".to_string()),
            message_type: MessageKind::Text,
            file_url: None,
            created_at: Utc::now(),
            edited_at: None,
        };
        let json = serde_json::to_value(ServerEvent::ReceiveGroupMessage(payload)).unwrap();
        assert_eq!(json["event"], "receive_group_message");
        assert_eq!(json["data"]["messageId"], "m00000000001");
        assert_eq!(json["data"]["message_type"], "text");
        assert_eq!(json["data"]["content"], "hi");
    }
}
