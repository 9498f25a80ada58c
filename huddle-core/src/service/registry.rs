use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{SessionId, UserId};

use super::events::{OnlineUser, ServerEvent};

/// Outbound channel for one connected socket.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Clone)]
struct SessionEntry {
    user_id: Option<UserId>,
    username: Option<String>,
    sender: EventSender,
}

/// Result of binding a user to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOutcome {
    /// True when this is the user's first active session.
    pub first_session: bool,
}

/// Result of dropping a session.
#[derive(Debug, Clone)]
pub struct DetachOutcome {
    /// Set when the dropped session was the user's last one.
    pub last_session_of: Option<(UserId, String)>,
}

/// Bidirectional in-memory map between transport sessions and user
/// identities.
///
/// A session starts anonymous; it may observe events but never
/// originates chat or calls until `bind` attaches a user to it. One user
/// may hold several sessions at once. This map is the only holder of the
/// session-to-user relation.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
    user_sessions: Arc<DashMap<UserId, Vec<SessionId>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            user_sessions: Arc::new(DashMap::new()),
        }
    }

    /// Track a freshly connected socket.
    pub fn attach(&self, session_id: SessionId, sender: EventSender) {
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                user_id: None,
                username: None,
                sender,
            },
        );
        debug!(session_id = %session_id, "Session attached");
    }

    /// Bind a user identity to a session. Idempotent for repeated binds
    /// of the same pair.
    pub fn bind(&self, session_id: &SessionId, user_id: UserId, username: String) -> BindOutcome {
        {
            let Some(mut entry) = self.sessions.get_mut(session_id) else {
                return BindOutcome {
                    first_session: false,
                };
            };
            entry.user_id = Some(user_id.clone());
            entry.username = Some(username);
        }

        let mut sessions = self.user_sessions.entry(user_id).or_default();
        let first_session = sessions.is_empty();
        if !sessions.contains(session_id) {
            sessions.push(session_id.clone());
        }

        BindOutcome { first_session }
    }

    /// Drop a session, reporting whether a user just lost their last one.
    pub fn detach(&self, session_id: &SessionId) -> DetachOutcome {
        let Some((_, entry)) = self.sessions.remove(session_id) else {
            return DetachOutcome {
                last_session_of: None,
            };
        };

        let Some(user_id) = entry.user_id else {
            debug!(session_id = %session_id, "Anonymous session detached");
            return DetachOutcome {
                last_session_of: None,
            };
        };

        let mut was_last = false;
        if let Some(mut sessions) = self.user_sessions.get_mut(&user_id) {
            sessions.retain(|s| s != session_id);
            was_last = sessions.is_empty();
        }
        if was_last {
            self.user_sessions.remove(&user_id);
        }

        DetachOutcome {
            last_session_of: was_last
                .then(|| (user_id, entry.username.unwrap_or_default())),
        }
    }

    /// Any one active session for a user.
    #[must_use]
    pub fn session_of(&self, user_id: &UserId) -> Option<SessionId> {
        self.user_sessions
            .get(user_id)
            .and_then(|sessions| sessions.first().cloned())
    }

    /// The identity bound to a session, if any.
    #[must_use]
    pub fn user_of(&self, session_id: &SessionId) -> Option<(UserId, String)> {
        self.sessions
            .get(session_id)
            .and_then(|entry| Some((entry.user_id.clone()?, entry.username.clone()?)))
    }

    /// Send one event to one session. Returns false if the session is
    /// gone or its channel is closed.
    pub fn send_to_session(&self, session_id: &SessionId, event: &ServerEvent) -> bool {
        match self.sessions.get(session_id) {
            Some(entry) => entry.sender.send(event.clone()).is_ok(),
            None => false,
        }
    }

    /// Send to every session bound to a user.
    pub fn send_to_user(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        let Some(sessions) = self.user_sessions.get(user_id).map(|s| s.clone()) else {
            return 0;
        };

        sessions
            .iter()
            .filter(|session_id| self.send_to_session(session_id, event))
            .count()
    }

    /// Broadcast to every connected session, optionally excluding one.
    pub fn broadcast_all(&self, event: &ServerEvent, exclude: Option<&SessionId>) -> usize {
        let mut sent = 0;
        for entry in self.sessions.iter() {
            if Some(entry.key()) == exclude {
                continue;
            }
            if entry.sender.send(event.clone()).is_ok() {
                sent += 1;
            }
        }
        debug!(event = event.name(), sent, "Broadcast");
        sent
    }

    /// Snapshot of users with at least one bound session.
    #[must_use]
    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.user_sessions
            .iter()
            .filter_map(|entry| {
                let session_id = entry.value().first()?;
                let session = self.sessions.get(session_id)?;
                Some(OnlineUser {
                    user_id: entry.key().clone(),
                    username: session.username.clone()?,
                })
            })
            .collect()
    }

    /// Sessions whose bound user is in `users`, excluding `exclude`.
    #[must_use]
    pub fn sessions_of_users(
        &self,
        users: &HashSet<UserId>,
        exclude: Option<&SessionId>,
    ) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| Some(entry.key()) != exclude)
            .filter(|entry| {
                entry
                    .value()
                    .user_id
                    .as_ref()
                    .is_some_and(|id| users.contains(id))
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    #[must_use]
    pub fn contains_session(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoomId;

    fn attach_session(registry: &SessionRegistry) -> (SessionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let session_id = SessionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.attach(session_id.clone(), tx);
        (session_id, rx)
    }

    #[tokio::test]
    async fn test_bind_and_lookup() {
        let registry = SessionRegistry::new();
        let (session_id, _rx) = attach_session(&registry);
        let user_id = UserId::new();

        let outcome = registry.bind(&session_id, user_id.clone(), "alice".to_string());
        assert!(outcome.first_session);

        assert_eq!(registry.session_of(&user_id), Some(session_id.clone()));
        assert_eq!(
            registry.user_of(&session_id),
            Some((user_id, "alice".to_string()))
        );
    }

    #[tokio::test]
    async fn test_second_session_is_not_first() {
        let registry = SessionRegistry::new();
        let (s1, _rx1) = attach_session(&registry);
        let (s2, _rx2) = attach_session(&registry);
        let user_id = UserId::new();

        assert!(registry.bind(&s1, user_id.clone(), "alice".to_string()).first_session);
        assert!(!registry.bind(&s2, user_id.clone(), "alice".to_string()).first_session);

        // Dropping one of two sessions is not "last".
        assert!(registry.detach(&s1).last_session_of.is_none());
        let outcome = registry.detach(&s2);
        assert_eq!(
            outcome.last_session_of,
            Some((user_id, "alice".to_string()))
        );
    }

    #[tokio::test]
    async fn test_anonymous_detach() {
        let registry = SessionRegistry::new();
        let (session_id, _rx) = attach_session(&registry);
        assert!(registry.detach(&session_id).last_session_of.is_none());
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_send_and_broadcast() {
        let registry = SessionRegistry::new();
        let (s1, mut rx1) = attach_session(&registry);
        let (s2, mut rx2) = attach_session(&registry);

        let event = ServerEvent::CallRinging {
            room_id: RoomId::from("room00000001"),
        };

        assert!(registry.send_to_session(&s1, &event));
        assert!(rx1.recv().await.is_some());

        // Broadcast excluding s1 reaches only s2.
        assert_eq!(registry.broadcast_all(&event, Some(&s1)), 1);
        assert!(rx2.recv().await.is_some());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sessions_of_users_intersection() {
        let registry = SessionRegistry::new();
        let (s1, _rx1) = attach_session(&registry);
        let (s2, _rx2) = attach_session(&registry);
        let (_s3, _rx3) = attach_session(&registry);

        let alice = UserId::new();
        let bob = UserId::new();
        registry.bind(&s1, alice.clone(), "alice".to_string());
        registry.bind(&s2, bob.clone(), "bob".to_string());

        let members: HashSet<UserId> = [alice, bob].into_iter().collect();
        let sessions = registry.sessions_of_users(&members, Some(&s1));
        assert_eq!(sessions, vec![s2]);
    }
}
