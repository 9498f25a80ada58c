use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    models::{RoomId, SessionId, UserId},
    repository::RoomRepository,
};

use super::events::ServerEvent;
use super::registry::SessionRegistry;

/// Room-scoped event fan-out: resolves a room's active participants to
/// their connected sessions and emits an event to each exactly once.
///
/// If the participant lookup fails, the fan-out degrades to a full
/// broadcast (minus `exclude`). Chat availability is preferred over
/// strict room scoping here; the degradation is always logged.
#[derive(Clone)]
pub struct RoomFanout {
    registry: Arc<SessionRegistry>,
    room_repository: Arc<RoomRepository>,
}

impl RoomFanout {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, room_repository: Arc<RoomRepository>) -> Self {
        Self {
            registry,
            room_repository,
        }
    }

    /// Emit `event` to every connected session whose user is an active
    /// participant of `room_id`, except `exclude`. Returns how many
    /// sessions received it.
    pub async fn emit_to_room(
        &self,
        room_id: &RoomId,
        event: &ServerEvent,
        exclude: Option<&SessionId>,
    ) -> usize {
        let members: HashSet<UserId> = match self.room_repository.active_participants(room_id).await
        {
            Ok(participants) => participants.into_iter().map(|p| p.user_id).collect(),
            Err(err) => {
                warn!(
                    room_id = %room_id,
                    event = event.name(),
                    error = %err,
                    "Participant lookup failed, degrading to full broadcast"
                );
                return self.registry.broadcast_all(event, exclude);
            }
        };

        let sessions = self.registry.sessions_of_users(&members, exclude);
        let mut sent = 0;
        for session_id in &sessions {
            if self.registry.send_to_session(session_id, event) {
                sent += 1;
            }
        }

        debug!(
            room_id = %room_id,
            event = event.name(),
            sent,
            "Room fan-out"
        );

        sent
    }
}
