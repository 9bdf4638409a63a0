/// Message model.
/// Rows of the `messages` collection; immutable once created apart from the
/// delivery status and pinned flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl MessageType {
    /// Attachment type inferred from a file extension
    pub fn for_attachment(extension: &str) -> Self {
        match extension {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "heic" => MessageType::Image,
            _ => MessageType::File,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Sent,
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: DeliveryStatus,
    #[serde(default)]
    pub is_pinned: bool,
}

impl Message {
    pub fn is_attachment(&self) -> bool {
        self.message_type != MessageType::Text
    }

    /// Short single-line form used in conversation lists
    pub fn preview(&self, max_chars: usize) -> String {
        let text = match self.message_type {
            MessageType::Text => self.content.as_str(),
            MessageType::Image => "[image]",
            MessageType::File => "[file]",
        };
        let line = text.lines().next().unwrap_or_default();
        if line.chars().count() > max_chars {
            let cut: String = line.chars().take(max_chars).collect();
            format!("{}…", cut)
        } else {
            line.to_string()
        }
    }
}

/// Insert payload for a new message; the backend assigns id and timestamp
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub status: DeliveryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_from_backend_row() {
        let row = json!({
            "id": "m1",
            "conversation_id": "c1",
            "sender_id": "u1",
            "content": "hello",
            "message_type": "text",
            "file_url": null,
            "created_at": "2025-03-01T10:00:00.123456+00:00",
            "is_pinned": false
        });
        let msg: Message = serde_json::from_value(row).unwrap();
        assert_eq!(msg.id.as_str(), "m1");
        assert_eq!(msg.status, DeliveryStatus::Sent);
        assert!(!msg.is_attachment());
    }

    #[test]
    fn test_row_missing_required_field_is_rejected() {
        let row = json!({ "id": "m1", "content": "hello" });
        assert!(serde_json::from_value::<Message>(row).is_err());
    }

    #[test]
    fn test_attachment_type_inference() {
        assert_eq!(MessageType::for_attachment("png"), MessageType::Image);
        assert_eq!(MessageType::for_attachment("pdf"), MessageType::File);
    }

    #[test]
    fn test_preview_truncates_first_line() {
        let msg = Message {
            id: MessageId::from("m"),
            conversation_id: ConversationId::from("c"),
            sender_id: UserId::from("u"),
            content: "a fairly long first line\nsecond".to_string(),
            message_type: MessageType::Text,
            file_url: None,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            is_pinned: false,
        };
        assert_eq!(msg.preview(8), "a fairly…");
        assert_eq!(msg.preview(100), "a fairly long first line");
    }

    #[test]
    fn test_new_message_omits_missing_file_url() {
        let new = NewMessage {
            conversation_id: ConversationId::from("c1"),
            sender_id: UserId::from("u1"),
            content: "hi".to_string(),
            message_type: MessageType::Text,
            file_url: None,
            status: DeliveryStatus::Sent,
        };
        let json = serde_json::to_value(&new).unwrap();
        assert!(json.get("file_url").is_none());
        assert_eq!(json["message_type"], "text");
    }
}
