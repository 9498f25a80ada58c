use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::{RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    File,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "file" => Ok(Self::File),
            _ => Err(format!("Unknown message kind: {s}")),
        }
    }
}

/// Per-recipient delivery state. Ordered: a receipt may only move forward
/// along `Sent -> Delivered -> Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Rank used for monotonic upserts.
    #[must_use]
    pub const fn rank(&self) -> i16 {
        match self {
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            _ => Err(format!("Unknown delivery status: {s}")),
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate a message's delivery status across its recipients: the
/// minimum of all receipt states, defaulting to `Sent` when none exist.
#[must_use]
pub fn aggregate_status(receipts: &[DeliveryStatus]) -> DeliveryStatus {
    receipts
        .iter()
        .copied()
        .min()
        .unwrap_or(DeliveryStatus::Sent)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String, // nanoid(12)
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        room_id: RoomId,
        sender_id: UserId,
        content: Option<String>,
        kind: MessageKind,
        file_url: Option<String>,
    ) -> Self {
        Self {
            id: super::id::generate_id(),
            room_id,
            sender_id,
            content,
            kind,
            file_url,
            created_at: Utc::now(),
            edited_at: None,
        }
    }
}

/// Message joined with sender username and aggregated delivery status,
/// as returned with chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_username: String,
    pub delivery_status: DeliveryStatus,
}

/// One `(message, recipient)` receipt row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: String,
    pub user_id: UserId,
    pub status: DeliveryStatus,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(DeliveryStatus::Sent < DeliveryStatus::Delivered);
        assert!(DeliveryStatus::Delivered < DeliveryStatus::Read);
    }

    #[test]
    fn test_aggregate_defaults_to_sent() {
        assert_eq!(aggregate_status(&[]), DeliveryStatus::Sent);
    }

    #[test]
    fn test_aggregate_is_minimum() {
        assert_eq!(
            aggregate_status(&[DeliveryStatus::Read, DeliveryStatus::Delivered]),
            DeliveryStatus::Delivered
        );
        assert_eq!(
            aggregate_status(&[DeliveryStatus::Read, DeliveryStatus::Read]),
            DeliveryStatus::Read
        );
        assert_eq!(
            aggregate_status(&[DeliveryStatus::Sent, DeliveryStatus::Read]),
            DeliveryStatus::Sent
        );
    }
}
