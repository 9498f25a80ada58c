use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    models::{
        Call, CallId, CallStatus, CallType, CallWithParticipants, RecordingRow, RoomId, SessionId,
        UserId,
    },
    repository::CallRepository,
    Error, Result,
};

use super::events::ServerEvent;
use super::registry::SessionRegistry;

/// Signalling bridge: routes offer/answer/ICE between a caller session
/// and a callee session and writes the call lifecycle to storage.
///
/// The in-memory `room -> call` map pins the ringing/ongoing call each
/// signalling event operates on; terminal transitions drop the mapping.
#[derive(Clone)]
pub struct CallService {
    call_repository: Arc<CallRepository>,
    registry: Arc<SessionRegistry>,
    active_calls: Arc<DashMap<RoomId, CallId>>,
}

impl CallService {
    #[must_use]
    pub fn new(call_repository: Arc<CallRepository>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            call_repository,
            registry,
            active_calls: Arc::new(DashMap::new()),
        }
    }

    /// Resolve a wire target: a session id is accepted directly, anything
    /// else is treated as a user id whose first active session wins.
    fn resolve_target(&self, to: &str) -> Option<SessionId> {
        let as_session = SessionId::from_string(to.to_string());
        if self.registry.contains_session(&as_session) {
            return Some(as_session);
        }
        self.registry.session_of(&UserId::from(to))
    }

    /// Start ringing: persist the call, remember the room mapping, offer
    /// the callee and confirm ringing to the caller.
    ///
    /// `incoming_call` goes to whatever the target id resolves to
    /// (possibly nobody); `call_ringing` is only sent back when the
    /// callee actually has a session.
    pub async fn call_user(
        &self,
        caller_session: &SessionId,
        caller_id: &UserId,
        caller_username: &str,
        to: &str,
        signal: Value,
        is_video: bool,
        room_id: RoomId,
    ) -> Result<Call> {
        let call_type = if is_video {
            CallType::Video
        } else {
            CallType::Audio
        };

        let call = self
            .call_repository
            .create(&room_id, caller_id, call_type)
            .await?;
        self.active_calls.insert(room_id.clone(), call.id.clone());

        info!(
            call_id = %call.id,
            room_id = %room_id,
            initiator = %caller_id,
            call_type = call_type.as_str(),
            "Call started ringing"
        );

        if let Some(callee_session) = self.resolve_target(to) {
            self.registry.send_to_session(
                &callee_session,
                &ServerEvent::IncomingCall {
                    room_id: room_id.clone(),
                    call_id: call.id.clone(),
                    from: caller_id.clone(),
                    username: caller_username.to_string(),
                    signal,
                    is_video,
                },
            );
            self.registry
                .send_to_session(caller_session, &ServerEvent::CallRinging { room_id });
        } else {
            debug!(to, "Callee has no active session, ringing into the void");
        }

        Ok(call)
    }

    /// First non-initiator answer moves the call to ongoing and relays
    /// the answer signal back to the caller.
    pub async fn answer_call(
        &self,
        callee_id: &UserId,
        to: &str,
        signal: Value,
        room_id: &RoomId,
    ) -> Result<()> {
        let call_id = self.lookup_call(room_id)?;

        self.call_repository
            .add_participant(&call_id, callee_id, true)
            .await?;
        self.call_repository
            .transition(&call_id, CallStatus::Ringing, CallStatus::Ongoing)
            .await?;

        info!(call_id = %call_id, room_id = %room_id, "Call answered");

        if let Some(caller_session) = self.resolve_target(to) {
            self.registry.send_to_session(
                &caller_session,
                &ServerEvent::CallAccepted {
                    room_id: room_id.clone(),
                    signal,
                },
            );
        }

        Ok(())
    }

    /// Explicit reject while ringing.
    pub async fn reject_call(&self, to: &str, room_id: &RoomId) -> Result<()> {
        let call_id = self.lookup_call(room_id)?;

        self.call_repository
            .transition(&call_id, CallStatus::Ringing, CallStatus::Rejected)
            .await?;
        self.active_calls.remove(room_id);

        info!(call_id = %call_id, room_id = %room_id, "Call rejected");

        if let Some(caller_session) = self.resolve_target(to) {
            self.registry.send_to_session(
                &caller_session,
                &ServerEvent::CallRejected {
                    room_id: room_id.clone(),
                },
            );
        }

        Ok(())
    }

    /// Hang up: an unanswered call ends missed, an answered one
    /// completed.
    pub async fn end_call(&self, to: &str, room_id: &RoomId) -> Result<()> {
        let call_id = self.lookup_call(room_id)?;

        let call = self
            .call_repository
            .get(&call_id)
            .await?
            .ok_or_else(|| Error::NotFound("Call not found".to_string()))?;

        let next = call.status.on_end();
        if call.status.can_transition_to(next) {
            self.call_repository
                .transition(&call_id, call.status, next)
                .await?;
        } else {
            warn!(
                call_id = %call_id,
                status = call.status.as_str(),
                "End of call in unexpected state"
            );
        }
        self.active_calls.remove(room_id);

        info!(call_id = %call_id, room_id = %room_id, status = next.as_str(), "Call ended");

        if let Some(callee_session) = self.resolve_target(to) {
            self.registry.send_to_session(
                &callee_session,
                &ServerEvent::CallEnded {
                    room_id: room_id.clone(),
                },
            );
        }

        Ok(())
    }

    /// Fire-and-forget ICE relay, tagged with the originating session.
    pub fn ice_candidate(&self, from: &SessionId, candidate: Value, to: &str) {
        if let Some(target) = self.resolve_target(to) {
            self.registry.send_to_session(
                &target,
                &ServerEvent::IceCandidate {
                    candidate,
                    from: from.clone(),
                },
            );
        } else {
            debug!(to, "Dropping ICE candidate for unknown target");
        }
    }

    /// Call history for a room, each call with its participant rows.
    /// Without a room there is nothing to list.
    pub async fn history(
        &self,
        room_id: Option<&RoomId>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CallWithParticipants>> {
        let Some(room_id) = room_id else {
            return Ok(Vec::new());
        };

        let calls = self
            .call_repository
            .history_by_room(room_id, limit, offset)
            .await?;

        let mut result = Vec::with_capacity(calls.len());
        for call in calls {
            let participants = self.call_repository.participants(&call.id).await?;
            result.push(CallWithParticipants { call, participants });
        }

        Ok(result)
    }

    pub async fn recordings(&self, call_id: &CallId) -> Result<Vec<RecordingRow>> {
        self.call_repository.recordings_by_call(call_id).await
    }

    /// The call currently mapped to a room, if any. Used by the recording
    /// controller to attribute artifacts.
    #[must_use]
    pub fn active_call_id(&self, room_id: &RoomId) -> Option<CallId> {
        self.active_calls.get(room_id).map(|id| id.clone())
    }

    pub async fn persist_recording(&self, recording: &RecordingRow) -> Result<()> {
        self.call_repository.insert_recording(recording).await
    }

    fn lookup_call(&self, room_id: &RoomId) -> Result<CallId> {
        self.active_calls
            .get(room_id)
            .map(|id| id.clone())
            .ok_or_else(|| Error::NotFound("No active call for room".to_string()))
    }
}
