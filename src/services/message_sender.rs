/// Message sender.
/// Persists new messages with a single remote insert per call and returns
/// the stored row; the caller appends it locally only after success. Also
/// covers the per-message status updates and attachment uploads.

use crate::backend::{decode, decode_all, encode, Backend, Query};
use crate::error::{ClientError, Result};
use crate::models::{
    buckets, collections, file_extension, ConversationId, DeliveryStatus, Message, MessageId,
    MessageType, NewMessage, UserId,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

/// An uploaded attachment ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub url: String,
    pub message_type: MessageType,
    pub file_name: String,
}

pub struct MessageSender {
    backend: Arc<dyn Backend>,
}

impl MessageSender {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        MessageSender { backend }
    }

    /// Insert a message and return it as stored
    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Message> {
        self.insert(conversation_id, sender_id, content, message_type, None)
            .await
    }

    /// Send an uploaded attachment; `caption` may be empty
    pub async fn send_attachment(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        attachment: &Attachment,
        caption: &str,
    ) -> Result<Message> {
        let content = if caption.trim().is_empty() {
            attachment.file_name.as_str()
        } else {
            caption
        };
        self.insert(
            conversation_id,
            sender_id,
            content,
            attachment.message_type,
            Some(attachment.url.clone()),
        )
        .await
    }

    async fn insert(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
        message_type: MessageType,
        file_url: Option<String>,
    ) -> Result<Message> {
        if content.trim().is_empty() && file_url.is_none() {
            return Err(ClientError::Validation("Cannot send empty message".to_string()));
        }
        if message_type != MessageType::Text && file_url.is_none() {
            return Err(ClientError::Validation(
                "Attachment messages need a file URL".to_string(),
            ));
        }

        let new = NewMessage {
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.clone(),
            content: content.to_string(),
            message_type,
            file_url,
            status: DeliveryStatus::Sent,
        };
        let row = match self.backend.insert_row(collections::MESSAGES, encode(&new)?).await {
            Ok(row) => row,
            Err(e) => {
                log::error!("Failed to send message to {}: {}", conversation_id, e);
                return Err(e);
            }
        };
        let message: Message = decode(row)?;
        log::debug!("Sent message {} to {}", message.id, conversation_id);
        Ok(message)
    }

    /// Upload a file into the conversation's attachment folder
    pub async fn upload_attachment(
        &self,
        conversation_id: &ConversationId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Attachment> {
        if bytes.is_empty() {
            return Err(ClientError::Validation("Attachment is empty".to_string()));
        }
        let extension = file_extension(file_name);
        let path = format!(
            "{}/{}.{}",
            conversation_id,
            Utc::now().timestamp_millis(),
            extension
        );
        let url = self
            .backend
            .upload_file(buckets::MESSAGE_ATTACHMENTS, &path, bytes, false)
            .await?;
        Ok(Attachment {
            url,
            message_type: MessageType::for_attachment(&extension),
            file_name: file_name.to_string(),
        })
    }

    pub async fn pin(&self, message_id: &MessageId, pinned: bool) -> Result<Message> {
        self.update(message_id, json!({ "is_pinned": pinned })).await
    }

    pub async fn mark_read(&self, message_id: &MessageId) -> Result<Message> {
        self.update(message_id, json!({ "status": DeliveryStatus::Read }))
            .await
    }

    async fn update(&self, message_id: &MessageId, changes: serde_json::Value) -> Result<Message> {
        let rows = self
            .backend
            .update_rows(
                &Query::table(collections::MESSAGES).eq("id", message_id),
                changes,
            )
            .await?;
        decode_all::<Message>(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Message {}", message_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn setup() -> (Arc<MemoryBackend>, MessageSender) {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(
            collections::CONVERSATIONS,
            vec![json!({ "id": "c1", "created_at": "2025-01-01T00:00:00Z" })],
        );
        let sender = MessageSender::new(backend.clone());
        (backend, sender)
    }

    #[tokio::test]
    async fn test_send_returns_stored_message() {
        let (backend, sender) = setup();
        let c1 = ConversationId::from("c1");
        let u1 = UserId::from("u1");
        let message = sender.send(&c1, &u1, "hello", MessageType::Text).await.unwrap();
        assert_eq!(message.conversation_id, c1);
        assert_eq!(message.sender_id, u1);
        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(backend.rows(collections::MESSAGES).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_without_remote_call() {
        let (backend, sender) = setup();
        let err = sender
            .send(&ConversationId::from("c1"), &UserId::from("u1"), "  ", MessageType::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(backend.rows(collections::MESSAGES).is_empty());
    }

    #[tokio::test]
    async fn test_attachment_upload_and_send() {
        let (backend, sender) = setup();
        let c1 = ConversationId::from("c1");
        let attachment = sender
            .upload_attachment(&c1, "diagram.PNG", vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(attachment.message_type, MessageType::Image);
        assert!(attachment.url.ends_with(".png"));

        let message = sender
            .send_attachment(&c1, &UserId::from("u1"), &attachment, "")
            .await
            .unwrap();
        assert_eq!(message.content, "diagram.PNG");
        assert_eq!(message.file_url.as_deref(), Some(attachment.url.as_str()));
        let path = attachment.url.trim_start_matches("memory://message-attachments/");
        assert_eq!(backend.file(buckets::MESSAGE_ATTACHMENTS, path), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_pin_and_mark_read() {
        let (_backend, sender) = setup();
        let message = sender
            .send(&ConversationId::from("c1"), &UserId::from("u1"), "hi", MessageType::Text)
            .await
            .unwrap();
        let pinned = sender.pin(&message.id, true).await.unwrap();
        assert!(pinned.is_pinned);
        let read = sender.mark_read(&message.id).await.unwrap();
        assert_eq!(read.status, DeliveryStatus::Read);

        let missing = sender.pin(&MessageId::from("nope"), true).await.unwrap_err();
        assert!(missing.is_not_found());
    }
}
