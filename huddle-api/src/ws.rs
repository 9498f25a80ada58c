//! WebSocket transport: one connection per session, JSON event envelopes
//! in both directions, optional acknowledgement ids on client requests.
//!
//! This is also the connection supervisor: on disconnect it unwinds the
//! session in order (media rooms first, then presence and the registry
//! entry), so no handler ever observes a half-torn-down session.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use mediasoup::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use huddle_core::models::{CallId, MessageKind, RoomId, SessionId, UserId};
use huddle_core::service::TransportDirection;
use huddle_core::Error;

use crate::http::AppState;

#[derive(Debug, Deserialize)]
struct ClientEnvelope {
    #[serde(default)]
    ack: Option<u64>,
    #[serde(flatten)]
    event: ClientEvent,
}

/// Client-to-server events: `{"event": ..., "data": {...}, "ack": n?}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum ClientEvent {
    RegisterUser {
        #[serde(rename = "userId")]
        user_id: UserId,
        username: String,
    },
    GetOnlineUsers,
    TypingStart {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    TypingStop {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    SendGroupMessage {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        text: Option<String>,
        #[serde(rename = "messageType")]
        message_type: Option<MessageKind>,
        #[serde(rename = "fileUrl")]
        file_url: Option<String>,
    },
    SendPrivateMessage {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "recipientId")]
        recipient_id: Option<UserId>,
        text: Option<String>,
    },
    GetMessages {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        before: Option<DateTime<Utc>>,
        limit: Option<i32>,
    },
    MessageDelivered {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    MarkRead {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    EditMessage {
        #[serde(rename = "messageId")]
        message_id: String,
        content: String,
    },
    GetRooms {
        #[serde(rename = "userId")]
        user_id: Option<UserId>,
    },
    StartPrivateChat {
        #[serde(rename = "targetUserId")]
        target_user_id: UserId,
        #[serde(rename = "userId")]
        user_id: Option<UserId>,
    },
    CreateGroup {
        name: String,
        #[serde(rename = "memberIds")]
        member_ids: Vec<UserId>,
        #[serde(rename = "createdBy")]
        created_by: Option<UserId>,
    },
    JoinMediaRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    SetRtpCapabilities {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "rtpCapabilities")]
        rtp_capabilities: RtpCapabilities,
    },
    CreateTransport {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        direction: TransportDirection,
    },
    ConnectTransport {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "transportId")]
        transport_id: TransportId,
        #[serde(rename = "dtlsParameters")]
        dtls_parameters: DtlsParameters,
    },
    Produce {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "transportId")]
        transport_id: TransportId,
        kind: MediaKind,
        #[serde(rename = "rtpParameters")]
        rtp_parameters: RtpParameters,
        #[serde(rename = "appData")]
        #[allow(dead_code)]
        app_data: Option<Value>,
    },
    Consume {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "producerId")]
        producer_id: ProducerId,
    },
    ResumeConsumer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "consumerId")]
        consumer_id: ConsumerId,
    },
    GetProducers {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    LeaveMediaRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    CallUser {
        to: String,
        signal: Value,
        #[serde(rename = "isVideo", default)]
        is_video: bool,
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    AnswerCall {
        to: String,
        signal: Value,
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    RejectCall {
        to: String,
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    EndCall {
        to: String,
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    IceCandidate {
        candidate: Value,
        to: String,
    },
    GetCallHistory {
        #[serde(rename = "roomId")]
        room_id: Option<RoomId>,
        limit: Option<i64>,
        offset: Option<i64>,
    },
    GetRecordings {
        #[serde(rename = "callId")]
        call_id: CallId,
    },
}

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let session_id = SessionId::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    state.registry.attach(session_id.clone(), event_tx);

    info!(session_id = %session_id, "Socket connected");

    let (mut sink, mut stream) = socket.split();
    use futures::SinkExt;

    loop {
        tokio::select! {
            // Events routed to this session by the hub.
            outbound = event_rx.recv() => {
                let Some(event) = outbound else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "Failed to serialize event"),
                }
            }
            // Frames from the client.
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&state, &session_id, &text).await {
                            if sink.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ignore binary/ping/pong
                    Some(Err(err)) => {
                        debug!(session_id = %session_id, error = %err, "Socket error");
                        break;
                    }
                }
            }
        }
    }

    // Unwind: media rooms first (cascades producer/consumer/transport
    // closure and may stop a recording), then presence and the registry
    // entry.
    for room_id in state.sfu.rooms_of_session(&session_id).await {
        if let Err(err) = state.sfu.remove_peer(&room_id, &session_id).await {
            warn!(
                session_id = %session_id,
                room_id = %room_id,
                error = %err,
                "Media cleanup failed on disconnect"
            );
        }
    }
    if let Err(err) = state.presence.unregister(&session_id).await {
        warn!(session_id = %session_id, error = %err, "Presence cleanup failed");
    }

    info!(session_id = %session_id, "Socket disconnected");
}

async fn handle_frame(state: &AppState, session_id: &SessionId, text: &str) -> Option<String> {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(session_id = %session_id, error = %err, "Unparseable frame");
            return None;
        }
    };

    let ack = envelope.ack;
    match dispatch(state, session_id, envelope.event).await {
        Ok(data) => ack.map(|id| ack_frame(id, true, data)),
        Err(err) => {
            debug!(session_id = %session_id, error = %err, "Event failed");
            ack.map(|id| {
                ack_frame(id, false, json!({ "error": err.client_message() }))
            })
        }
    }
}

fn ack_frame(ack: u64, success: bool, mut data: Value) -> String {
    if let Value::Object(ref mut map) = data {
        map.insert("success".to_string(), Value::Bool(success));
    }
    json!({ "event": "ack", "ack": ack, "data": data }).to_string()
}

/// The session's bound identity; anonymous sessions may observe but not
/// originate.
fn current_user(state: &AppState, session_id: &SessionId) -> Result<(UserId, String), Error> {
    state
        .registry
        .user_of(session_id)
        .ok_or_else(|| Error::Authentication("Session is not registered".to_string()))
}

#[allow(clippy::too_many_lines)]
async fn dispatch(
    state: &AppState,
    session_id: &SessionId,
    event: ClientEvent,
) -> Result<Value, Error> {
    match event {
        ClientEvent::RegisterUser { user_id, username } => {
            state
                .presence
                .register(session_id, user_id, username)
                .await?;
            Ok(json!({}))
        }

        ClientEvent::GetOnlineUsers => {
            state.presence.send_online_snapshot(session_id);
            Ok(json!({}))
        }

        ClientEvent::TypingStart { room_id } => {
            let (user_id, username) = current_user(state, session_id)?;
            state
                .chat_service
                .typing(&room_id, session_id, user_id, username, true)
                .await;
            Ok(json!({}))
        }

        ClientEvent::TypingStop { room_id } => {
            let (user_id, username) = current_user(state, session_id)?;
            state
                .chat_service
                .typing(&room_id, session_id, user_id, username, false)
                .await;
            Ok(json!({}))
        }

        ClientEvent::SendGroupMessage {
            room_id,
            text,
            message_type,
            file_url,
        } => {
            let (user_id, username) = current_user(state, session_id)?;
            let payload = state
                .chat_service
                .send_message(
                    room_id,
                    user_id,
                    username,
                    text,
                    message_type.unwrap_or(MessageKind::Text),
                    file_url,
                    false,
                )
                .await?;
            Ok(json!({ "message": payload }))
        }

        ClientEvent::SendPrivateMessage {
            room_id,
            recipient_id: _,
            text,
        } => {
            let (user_id, username) = current_user(state, session_id)?;
            let payload = state
                .chat_service
                .send_message(
                    room_id,
                    user_id,
                    username,
                    text,
                    MessageKind::Text,
                    None,
                    true,
                )
                .await?;
            Ok(json!({ "message": payload }))
        }

        ClientEvent::GetMessages {
            room_id,
            before,
            limit,
        } => {
            let messages = state
                .chat_service
                .get_history(&room_id, before, limit.unwrap_or(50))
                .await?;
            Ok(json!({ "messages": messages }))
        }

        ClientEvent::MessageDelivered { message_id } => {
            let (user_id, _) = current_user(state, session_id)?;
            state
                .chat_service
                .message_delivered(&message_id, &user_id)
                .await?;
            Ok(json!({}))
        }

        ClientEvent::MarkRead { room_id } => {
            let (user_id, _) = current_user(state, session_id)?;
            state.chat_service.mark_read(&room_id, &user_id).await?;
            Ok(json!({}))
        }

        ClientEvent::EditMessage {
            message_id,
            content,
        } => {
            let (user_id, username) = current_user(state, session_id)?;
            let payload = state
                .chat_service
                .edit_message(&message_id, &user_id, username, &content)
                .await?;
            Ok(json!({ "message": payload }))
        }

        ClientEvent::GetRooms { user_id } => {
            let user_id = match current_user(state, session_id) {
                Ok((id, _)) => id,
                Err(err) => user_id.ok_or(err)?,
            };
            let rooms = state.room_service.get_rooms(&user_id).await?;
            Ok(json!({ "rooms": rooms }))
        }

        ClientEvent::StartPrivateChat {
            target_user_id,
            user_id,
        } => {
            let user_id = match current_user(state, session_id) {
                Ok((id, _)) => id,
                Err(err) => user_id.ok_or(err)?,
            };
            let (room, other_user, created) = state
                .room_service
                .start_private_chat(&user_id, &target_user_id)
                .await?;
            Ok(json!({ "room": room, "otherUser": other_user, "created": created }))
        }

        ClientEvent::CreateGroup {
            name,
            member_ids,
            created_by,
        } => {
            let user_id = match current_user(state, session_id) {
                Ok((id, _)) => id,
                Err(err) => created_by.ok_or(err)?,
            };
            let room = state
                .room_service
                .create_group(&name, &member_ids, &user_id)
                .await?;
            Ok(json!({ "room": room }))
        }

        ClientEvent::JoinMediaRoom { room_id } => {
            let (_, username) = current_user(state, session_id)?;
            let capabilities = state.sfu.join(&room_id, session_id, username).await?;
            Ok(json!({ "routerRtpCapabilities": capabilities }))
        }

        ClientEvent::SetRtpCapabilities {
            room_id,
            rtp_capabilities,
        } => {
            state
                .sfu
                .set_rtp_capabilities(&room_id, session_id, rtp_capabilities)
                .await?;
            Ok(json!({}))
        }

        ClientEvent::CreateTransport { room_id, direction } => {
            let descriptor = state
                .sfu
                .create_transport(&room_id, session_id, direction)
                .await?;
            Ok(serde_json::to_value(descriptor)?)
        }

        ClientEvent::ConnectTransport {
            room_id,
            transport_id,
            dtls_parameters,
        } => {
            state
                .sfu
                .connect_transport(&room_id, transport_id, dtls_parameters)
                .await?;
            Ok(json!({}))
        }

        ClientEvent::Produce {
            room_id,
            transport_id,
            kind,
            rtp_parameters,
            app_data: _,
        } => {
            let producer_id = state
                .sfu
                .produce(&room_id, session_id, transport_id, kind, rtp_parameters)
                .await?;
            Ok(json!({ "id": producer_id }))
        }

        ClientEvent::Consume {
            room_id,
            producer_id,
        } => {
            let descriptor = state.sfu.consume(&room_id, session_id, producer_id).await?;
            Ok(serde_json::to_value(descriptor)?)
        }

        ClientEvent::ResumeConsumer {
            room_id,
            consumer_id,
        } => {
            state
                .sfu
                .resume_consumer(&room_id, session_id, consumer_id)
                .await?;
            Ok(json!({}))
        }

        ClientEvent::GetProducers { room_id } => {
            let producers = state.sfu.get_producers(&room_id, session_id).await?;
            Ok(json!({ "producers": producers }))
        }

        ClientEvent::LeaveMediaRoom { room_id } => {
            state.sfu.remove_peer(&room_id, session_id).await?;
            Ok(json!({}))
        }

        ClientEvent::CallUser {
            to,
            signal,
            is_video,
            room_id,
        } => {
            let (user_id, username) = current_user(state, session_id)?;
            state
                .call_service
                .call_user(
                    session_id, &user_id, &username, &to, signal, is_video, room_id,
                )
                .await?;
            Ok(json!({}))
        }

        ClientEvent::AnswerCall {
            to,
            signal,
            room_id,
        } => {
            let (user_id, _) = current_user(state, session_id)?;
            state
                .call_service
                .answer_call(&user_id, &to, signal, &room_id)
                .await?;
            Ok(json!({}))
        }

        ClientEvent::RejectCall { to, room_id } => {
            state.call_service.reject_call(&to, &room_id).await?;
            Ok(json!({}))
        }

        ClientEvent::EndCall { to, room_id } => {
            state.call_service.end_call(&to, &room_id).await?;
            Ok(json!({}))
        }

        ClientEvent::IceCandidate { candidate, to } => {
            state.call_service.ice_candidate(session_id, candidate, &to);
            Ok(json!({}))
        }

        ClientEvent::GetCallHistory {
            room_id,
            limit,
            offset,
        } => {
            let calls = state
                .call_service
                .history(
                    room_id.as_ref(),
                    limit.unwrap_or(50).clamp(1, 200),
                    offset.unwrap_or(0).max(0),
                )
                .await?;
            Ok(json!({ "calls": calls }))
        }

        ClientEvent::GetRecordings { call_id } => {
            let recordings = state.call_service.recordings(&call_id).await?;
            Ok(json!({ "recordings": recordings }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register_user_envelope() {
        let frame = r#"{"event":"register_user","data":{"userId":"user00000001","username":"alice"},"ack":7}"#;
        let envelope: ClientEnvelope = serde_json::from_str(frame).unwrap();

        assert_eq!(envelope.ack, Some(7));
        match envelope.event {
            ClientEvent::RegisterUser { user_id, username } => {
                assert_eq!(user_id.as_str(), "user00000001");
                assert_eq!(username, "alice");
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_call_user_envelope() {
        let frame = r#"{"event":"call_user","data":{"to":"user00000002","signal":{"sdp":"x"},"isVideo":true,"roomId":"room00000001"}}"#;
        let envelope: ClientEnvelope = serde_json::from_str(frame).unwrap();

        assert_eq!(envelope.ack, None);
        match envelope.event {
            ClientEvent::CallUser {
                to,
                is_video,
                room_id,
                ..
            } => {
                assert_eq!(to, "user00000002");
                assert!(is_video);
                assert_eq!(room_id.as_str(), "room00000001");
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let frame = r#"{"event":"no_such_event","data":{}}"#;
        assert!(serde_json::from_str::<ClientEnvelope>(frame).is_err());
    }

    #[test]
    fn test_ack_frame_shape() {
        let frame = ack_frame(3, false, json!({ "error": "Cannot consume own producer" }));
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(value["event"], "ack");
        assert_eq!(value["ack"], 3);
        assert_eq!(value["data"]["success"], false);
        assert_eq!(value["data"]["error"], "Cannot consume own producer");
    }
}
