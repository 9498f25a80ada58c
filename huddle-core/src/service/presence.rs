use std::sync::Arc;
use tracing::info;

use crate::{
    models::{SessionId, UserId},
    repository::UserRepository,
    Result,
};

use super::events::ServerEvent;
use super::registry::SessionRegistry;

/// Presence orchestration on top of the session registry: flips the
/// durable online flag and broadcasts `user_status_changed` plus a fresh
/// `users_online` snapshot.
///
/// The flag is written before any broadcast goes out, so no client ever
/// observes presence ahead of storage.
#[derive(Clone)]
pub struct PresenceService {
    registry: Arc<SessionRegistry>,
    user_repository: Arc<UserRepository>,
}

impl PresenceService {
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, user_repository: Arc<UserRepository>) -> Self {
        Self {
            registry,
            user_repository,
        }
    }

    /// Bind a user to a session and announce them online.
    pub async fn register(
        &self,
        session_id: &SessionId,
        user_id: UserId,
        username: String,
    ) -> Result<()> {
        self.registry
            .bind(session_id, user_id.clone(), username.clone());

        self.user_repository.set_online(&user_id, true).await?;

        info!(
            session_id = %session_id,
            user_id = %user_id,
            username = %username,
            "User registered"
        );

        self.registry.broadcast_all(
            &ServerEvent::UserStatusChanged {
                user_id,
                username,
                is_online: true,
            },
            None,
        );
        self.broadcast_online_snapshot();

        Ok(())
    }

    /// Drop a session. Only the user's last session flips them offline.
    pub async fn unregister(&self, session_id: &SessionId) -> Result<()> {
        let outcome = self.registry.detach(session_id);

        if let Some((user_id, username)) = outcome.last_session_of {
            self.user_repository.set_online(&user_id, false).await?;

            info!(user_id = %user_id, "User went offline");

            self.registry.broadcast_all(
                &ServerEvent::UserStatusChanged {
                    user_id,
                    username,
                    is_online: false,
                },
                None,
            );
            self.broadcast_online_snapshot();
        }

        Ok(())
    }

    /// Send the current snapshot to one session (`get_online_users`).
    pub fn send_online_snapshot(&self, session_id: &SessionId) {
        self.registry.send_to_session(
            session_id,
            &ServerEvent::UsersOnline {
                users: self.registry.online_users(),
            },
        );
    }

    fn broadcast_online_snapshot(&self) {
        self.registry.broadcast_all(
            &ServerEvent::UsersOnline {
                users: self.registry.online_users(),
            },
            None,
        );
    }
}
