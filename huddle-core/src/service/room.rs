use std::sync::Arc;
use tracing::info;

use crate::{
    models::{PublicUser, Room, RoomId, RoomWithParticipants, UserId},
    repository::{RoomRepository, UserRepository},
    Error, Result,
};

/// Room management: private chat deduplication, group creation, listing.
#[derive(Clone)]
pub struct RoomService {
    room_repository: Arc<RoomRepository>,
    user_repository: Arc<UserRepository>,
}

impl RoomService {
    #[must_use]
    pub const fn new(
        room_repository: Arc<RoomRepository>,
        user_repository: Arc<UserRepository>,
    ) -> Self {
        Self {
            room_repository,
            user_repository,
        }
    }

    /// Get or create the one private room between two users. `created`
    /// is true exactly once per pair.
    pub async fn start_private_chat(
        &self,
        user_id: &UserId,
        target_user_id: &UserId,
    ) -> Result<(Room, PublicUser, bool)> {
        if user_id == target_user_id {
            return Err(Error::InvalidInput(
                "Cannot start a chat with yourself".to_string(),
            ));
        }

        let other = self
            .user_repository
            .get(target_user_id)
            .await?
            .ok_or_else(|| Error::NotFound("Target user not found".to_string()))?;

        let (room, created) = self
            .room_repository
            .get_or_create_private(user_id, target_user_id)
            .await?;

        if created {
            info!(room_id = %room.id, "Private room created");
        }

        Ok((room, PublicUser::from(&other), created))
    }

    pub async fn create_group(
        &self,
        name: &str,
        member_ids: &[UserId],
        created_by: &UserId,
    ) -> Result<Room> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("Group name is required".to_string()));
        }

        let room = self
            .room_repository
            .create_group(name.trim(), member_ids, created_by)
            .await?;

        info!(room_id = %room.id, name, members = member_ids.len(), "Group created");

        Ok(room)
    }

    pub async fn get_rooms(&self, user_id: &UserId) -> Result<Vec<RoomWithParticipants>> {
        self.room_repository.rooms_for_user(user_id).await
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<Room> {
        self.room_repository
            .get(room_id)
            .await?
            .ok_or_else(|| Error::NotFound("Room not found".to_string()))
    }
}
