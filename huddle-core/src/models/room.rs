use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::{RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Private,
    Group,
}

impl RoomKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
        }
    }
}

impl FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            _ => Err(format!("Unknown room kind: {s}")),
        }
    }
}

/// Role of a participant within a room (distinct from the global user role).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Member,
}

impl ParticipantRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(format!("Unknown participant role: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomParticipant {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl RoomParticipant {
    /// A participant is active while they have not left.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Room together with its participant rows, as returned by `get_rooms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomWithParticipants {
    #[serde(flatten)]
    pub room: Room,
    pub participants: Vec<RoomParticipant>,
}

/// Normalized key for a private room between two users: the smaller id
/// first, so `(a, b)` and `(b, a)` map to the same room.
#[must_use]
pub fn private_pair_key(a: &UserId, b: &UserId) -> String {
    if a.as_str() <= b.as_str() {
        format!("{}:{}", a.as_str(), b.as_str())
    } else {
        format!("{}:{}", b.as_str(), a.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_pair_key_symmetric() {
        let a = UserId::from("alice_______");
        let b = UserId::from("bob_________");
        assert_eq!(private_pair_key(&a, &b), private_pair_key(&b, &a));
    }

    #[test]
    fn test_participant_active() {
        let mut participant = RoomParticipant {
            room_id: RoomId::new(),
            user_id: UserId::new(),
            role: ParticipantRole::Member,
            joined_at: Utc::now(),
            left_at: None,
        };
        assert!(participant.is_active());
        participant.left_at = Some(Utc::now());
        assert!(!participant.is_active());
    }
}
