use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    models::{
        aggregate_status, DeliveryStatus, Message, MessageKind, MessageView, RoomId, SessionId,
        UserId,
    },
    repository::{MessageRepository, ReceiptRepository, RoomRepository},
    Error, Result,
};

use super::events::{MessagePayload, ServerEvent};
use super::fanout::RoomFanout;
use super::registry::SessionRegistry;

/// How many recent messages are scanned for distinct senders after a
/// bulk read.
const READ_NOTIFY_SCAN: i32 = 100;

/// Chat delivery: persists messages, seeds per-recipient receipts, fans
/// the message out, and drives the `sent -> delivered -> read` receipt
/// machine, notifying originators of every transition.
#[derive(Clone)]
pub struct ChatService {
    message_repository: Arc<MessageRepository>,
    receipt_repository: Arc<ReceiptRepository>,
    room_repository: Arc<RoomRepository>,
    registry: Arc<SessionRegistry>,
    fanout: RoomFanout,
}

impl ChatService {
    #[must_use]
    pub fn new(
        message_repository: Arc<MessageRepository>,
        receipt_repository: Arc<ReceiptRepository>,
        room_repository: Arc<RoomRepository>,
        registry: Arc<SessionRegistry>,
        fanout: RoomFanout,
    ) -> Self {
        Self {
            message_repository,
            receipt_repository,
            room_repository,
            registry,
            fanout,
        }
    }

    /// Send a message into a room and fan it out to all participants.
    /// The sender receives their own echo; clients deduplicate by
    /// `messageId`.
    ///
    /// Persistence failure does not block the real-time path: the
    /// message still goes out, it just has no durable row or receipts.
    pub async fn send_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        sender_username: String,
        content: Option<String>,
        kind: MessageKind,
        file_url: Option<String>,
        private: bool,
    ) -> Result<MessagePayload> {
        if content.as_deref().map_or(true, str::is_empty) && file_url.is_none() {
            return Err(Error::InvalidInput("Message is empty".to_string()));
        }

        let message = Message::new(
            room_id.clone(),
            sender_id.clone(),
            content,
            kind,
            file_url,
        );

        match self.message_repository.create(&message).await {
            Ok(_) => {
                if let Err(err) = self.seed_receipts(&message).await {
                    warn!(
                        message_id = %message.id,
                        error = %err,
                        "Failed to seed delivery receipts"
                    );
                }
            }
            Err(err) => {
                warn!(
                    room_id = %room_id,
                    error = %err,
                    "Message persistence failed, fanning out anyway"
                );
            }
        }

        let payload = MessagePayload {
            message_id: message.id.clone(),
            room_id: room_id.clone(),
            sender_id,
            sender_username,
            content: message.content.clone(),
            message_type: message.kind,
            file_url: message.file_url.clone(),
            created_at: message.created_at,
            edited_at: None,
        };

        let event = if private {
            ServerEvent::ReceivePrivateMessage(payload.clone())
        } else {
            ServerEvent::ReceiveGroupMessage(payload.clone())
        };
        self.fanout.emit_to_room(&room_id, &event, None).await;

        info!(room_id = %room_id, message_id = %payload.message_id, "Message sent");

        Ok(payload)
    }

    async fn seed_receipts(&self, message: &Message) -> Result<()> {
        let recipients: Vec<UserId> = self
            .room_repository
            .active_participants(&message.room_id)
            .await?
            .into_iter()
            .map(|p| p.user_id)
            .filter(|user_id| *user_id != message.sender_id)
            .collect();

        self.receipt_repository
            .seed_sent(&message.id, &recipients)
            .await
    }

    /// A recipient confirms delivery. The receipt never moves backwards;
    /// the originator alone is notified.
    pub async fn message_delivered(&self, message_id: &str, recipient: &UserId) -> Result<()> {
        let advanced = self
            .receipt_repository
            .advance(message_id, recipient, DeliveryStatus::Delivered)
            .await?;
        if !advanced {
            return Ok(());
        }

        let Some(message) = self.message_repository.get(message_id).await? else {
            return Ok(());
        };

        self.notify_sender(
            &message.sender_id,
            ServerEvent::MessageStatusUpdate {
                message_id: Some(message_id.to_string()),
                room_id: message.room_id,
                user_id: recipient.clone(),
                status: DeliveryStatus::Delivered,
            },
        );

        Ok(())
    }

    /// A session marks a whole room read. Every message not authored by
    /// the reader advances to `read`; each distinct sender in recent
    /// history gets one status update.
    pub async fn mark_read(&self, room_id: &RoomId, reader: &UserId) -> Result<()> {
        let updated = self.receipt_repository.mark_room_read(room_id, reader).await?;

        info!(room_id = %room_id, user_id = %reader, updated, "Room marked read");

        let senders = self
            .message_repository
            .recent_senders(room_id, READ_NOTIFY_SCAN)
            .await?;

        for sender_id in senders.iter().filter(|s| *s != reader) {
            self.notify_sender(
                sender_id,
                ServerEvent::MessageStatusUpdate {
                    message_id: None,
                    room_id: room_id.clone(),
                    user_id: reader.clone(),
                    status: DeliveryStatus::Read,
                },
            );
        }

        Ok(())
    }

    /// Edit a message's content (sender only) and fan out the new body.
    pub async fn edit_message(
        &self,
        message_id: &str,
        editor: &UserId,
        editor_username: String,
        content: &str,
    ) -> Result<MessagePayload> {
        if content.is_empty() {
            return Err(Error::InvalidInput("Message is empty".to_string()));
        }

        let message = self
            .message_repository
            .edit(message_id, editor, content)
            .await?;

        let payload = MessagePayload {
            message_id: message.id.clone(),
            room_id: message.room_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_username: editor_username,
            content: message.content.clone(),
            message_type: message.kind,
            file_url: message.file_url.clone(),
            created_at: message.created_at,
            edited_at: message.edited_at,
        };

        self.fanout
            .emit_to_room(
                &message.room_id,
                &ServerEvent::MessageEdited(payload.clone()),
                None,
            )
            .await;

        Ok(payload)
    }

    /// Chat history with aggregated delivery status, newest first. The
    /// aggregate is the minimum receipt state per message, `sent` when no
    /// receipt rows exist.
    pub async fn get_history(
        &self,
        room_id: &RoomId,
        before: Option<DateTime<Utc>>,
        limit: i32,
    ) -> Result<Vec<MessageView>> {
        let rows = self
            .message_repository
            .history(room_id, before, limit)
            .await?;

        let message_ids: Vec<String> = rows.iter().map(|(message, _)| message.id.clone()).collect();
        let receipts = self
            .receipt_repository
            .list_for_messages(&message_ids)
            .await?;

        let mut statuses: HashMap<String, Vec<DeliveryStatus>> = HashMap::new();
        for receipt in receipts {
            statuses
                .entry(receipt.message_id)
                .or_default()
                .push(receipt.status);
        }

        Ok(rows
            .into_iter()
            .map(|(message, sender_username)| {
                let delivery_status =
                    aggregate_status(statuses.get(&message.id).map_or(&[][..], Vec::as_slice));
                MessageView {
                    message,
                    sender_username,
                    delivery_status,
                }
            })
            .collect())
    }

    /// Typing indicators: room fan-out minus the originator.
    pub async fn typing(
        &self,
        room_id: &RoomId,
        session_id: &SessionId,
        user_id: UserId,
        username: String,
        started: bool,
    ) {
        let event = if started {
            ServerEvent::UserTyping {
                room_id: room_id.clone(),
                user_id,
                username,
            }
        } else {
            ServerEvent::UserStoppedTyping {
                room_id: room_id.clone(),
                user_id,
                username,
            }
        };

        self.fanout
            .emit_to_room(room_id, &event, Some(session_id))
            .await;
    }

    fn notify_sender(&self, sender_id: &UserId, event: ServerEvent) {
        if let Some(session_id) = self.registry.session_of(sender_id) {
            self.registry.send_to_session(&session_id, &event);
        }
    }
}
