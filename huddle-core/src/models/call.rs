use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::{CallId, RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl FromStr for CallType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            _ => Err(format!("Unknown call type: {s}")),
        }
    }
}

/// Call lifecycle:
/// `Ringing -> Ongoing` on first non-initiator answer,
/// `Ringing -> Rejected` on explicit reject,
/// `Ringing -> Missed` on end with no answer,
/// `Ongoing -> Completed` on end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Ongoing,
    Completed,
    Missed,
    Rejected,
}

impl CallStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Missed => "missed",
            Self::Rejected => "rejected",
        }
    }

    /// Terminal statuses set `ended_at`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Missed | Self::Rejected)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Ringing, Self::Ongoing)
                | (Self::Ringing, Self::Rejected)
                | (Self::Ringing, Self::Missed)
                | (Self::Ongoing, Self::Completed)
        )
    }

    /// Status a call ends in when the initiator hangs up.
    #[must_use]
    pub const fn on_end(&self) -> Self {
        match self {
            Self::Ringing => Self::Missed,
            Self::Ongoing => Self::Completed,
            other => *other,
        }
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ringing" => Ok(Self::Ringing),
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            "missed" => Ok(Self::Missed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown call status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub room_id: RoomId,
    pub initiator_id: UserId,
    pub call_type: CallType,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParticipant {
    pub call_id: CallId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub answered: bool,
}

/// Call joined with its participant rows, as returned with call history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallWithParticipants {
    #[serde(flatten)]
    pub call: Call,
    pub participants: Vec<CallParticipant>,
}

/// Persisted recording artifact metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingRow {
    pub id: String,
    pub call_id: Option<CallId>,
    pub room_id: RoomId,
    pub file_path: String,
    pub has_video: bool,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Ongoing));
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Rejected));
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Missed));
        assert!(CallStatus::Ongoing.can_transition_to(CallStatus::Completed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!CallStatus::Ongoing.can_transition_to(CallStatus::Rejected));
        assert!(!CallStatus::Completed.can_transition_to(CallStatus::Ongoing));
        assert!(!CallStatus::Rejected.can_transition_to(CallStatus::Completed));
        assert!(!CallStatus::Ringing.can_transition_to(CallStatus::Completed));
    }

    #[test]
    fn test_end_resolution() {
        // Ending an unanswered call marks it missed, an answered one completed.
        assert_eq!(CallStatus::Ringing.on_end(), CallStatus::Missed);
        assert_eq!(CallStatus::Ongoing.on_end(), CallStatus::Completed);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CallStatus::Ringing.is_terminal());
        assert!(!CallStatus::Ongoing.is_terminal());
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::Missed.is_terminal());
        assert!(CallStatus::Rejected.is_terminal());
    }
}
