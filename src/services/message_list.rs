/// Message list for the open conversation.
/// Kept in creation-time order; messages with equal timestamps keep the
/// order in which they arrived. Duplicates are collapsed by id.

use crate::backend::{decode_all, Backend, Query};
use crate::error::Result;
use crate::models::{collections, ConversationId, Message, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New message placed at its position
    Inserted(usize),
    /// A message with this id was already present and has been replaced
    Replaced,
    /// The message belongs to another conversation
    Ignored,
}

#[derive(Debug, Default)]
pub struct MessageList {
    conversation_id: Option<ConversationId>,
    entries: Vec<Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    /// Switch to `conversation_id` with the given history
    pub fn reset(&mut self, conversation_id: ConversationId, history: Vec<Message>) {
        self.conversation_id = Some(conversation_id);
        self.entries.clear();
        for message in history {
            self.insert(message);
        }
    }

    pub fn clear(&mut self) {
        self.conversation_id = None;
        self.entries.clear();
    }

    pub fn insert(&mut self, message: Message) -> InsertOutcome {
        if self.conversation_id.as_ref() != Some(&message.conversation_id) {
            log::debug!(
                "Message {} is for {}, not the open conversation",
                message.id,
                message.conversation_id
            );
            return InsertOutcome::Ignored;
        }
        if self.update(message.clone()) {
            return InsertOutcome::Replaced;
        }
        let position = self
            .entries
            .partition_point(|m| m.created_at <= message.created_at);
        self.entries.insert(position, message);
        InsertOutcome::Inserted(position)
    }

    /// Replace the message with the same id; false if absent
    pub fn update(&mut self, message: Message) -> bool {
        match self.entries.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                *existing = message;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries.iter().find(|m| &m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&Message> {
        self.entries.last()
    }

    pub fn pinned(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter(|m| m.is_pinned)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Full history of a conversation, oldest first
pub async fn get_messages(backend: &dyn Backend, conversation_id: &ConversationId) -> Result<Vec<Message>> {
    let rows = backend
        .list_rows(
            &Query::table(collections::MESSAGES)
                .eq("conversation_id", conversation_id)
                .order_by("created_at", true),
        )
        .await?;
    decode_all(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryStatus, MessageType, UserId};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn message(id: &str, conversation: &str, created_at: DateTime<Utc>) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: ConversationId::from(conversation),
            sender_id: UserId::from("u1"),
            content: id.to_string(),
            message_type: MessageType::Text,
            file_url: None,
            created_at,
            status: DeliveryStatus::Sent,
            is_pinned: false,
        }
    }

    fn ids(list: &MessageList) -> Vec<&str> {
        list.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_out_of_order_arrivals_are_sorted() {
        let mut list = MessageList::new();
        list.reset(ConversationId::from("c1"), Vec::new());
        list.insert(message("late", "c1", at(2)));
        list.insert(message("early", "c1", at(1)));
        assert_eq!(ids(&list), vec!["early", "late"]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut list = MessageList::new();
        list.reset(ConversationId::from("c1"), Vec::new());
        list.insert(message("first", "c1", at(1)));
        list.insert(message("second", "c1", at(1)));
        list.insert(message("third", "c1", at(1)));
        assert_eq!(ids(&list), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_id_is_replaced() {
        let mut list = MessageList::new();
        list.reset(ConversationId::from("c1"), vec![message("m1", "c1", at(1))]);
        let mut pinned = message("m1", "c1", at(1));
        pinned.is_pinned = true;
        assert_eq!(list.insert(pinned), InsertOutcome::Replaced);
        assert_eq!(list.len(), 1);
        assert_eq!(list.pinned().count(), 1);
    }

    #[test]
    fn test_other_conversation_is_ignored() {
        let mut list = MessageList::new();
        list.reset(ConversationId::from("c1"), Vec::new());
        assert_eq!(list.insert(message("m1", "c2", at(1))), InsertOutcome::Ignored);
        assert!(list.is_empty());

        let mut closed = MessageList::new();
        assert_eq!(closed.insert(message("m1", "c1", at(1))), InsertOutcome::Ignored);
    }
}
