#![allow(dead_code)]

/// Common test utilities and helpers for integration tests
/// A seeded in-memory campus: three accounts, conversations and messages

use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use unimesh_client::backend::{AuthApi, Backend, MemoryBackend};
use unimesh_client::models::{collections, ConversationId, MemberRole, MessageId, UserId};
use unimesh_client::services::MessagingHub;
use unimesh_client::Session;
use uuid::Uuid;

pub const PASSWORD: &str = "secret123";

/// Timestamp `secs_ago` seconds in the past, in the backend's format
pub fn stamp(secs_ago: i64) -> String {
    (Utc::now() - Duration::seconds(secs_ago)).to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Test context: a memory backend with Ada (the signed-in user), Bob and Carol
pub struct Campus {
    pub backend: Arc<MemoryBackend>,
    pub me: UserId,
    pub bob: UserId,
    pub carol: UserId,
}

impl Campus {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let me = backend.register_user("ada@uni.edu", PASSWORD, "Ada Lovelace");
        let bob = backend.register_user("bob@uni.edu", PASSWORD, "Bob Builder");
        let carol = backend.register_user("carol@uni.edu", PASSWORD, "Carol Shaw");
        Campus {
            backend,
            me,
            bob,
            carol,
        }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub async fn session(&self) -> Session {
        self.backend
            .sign_in("ada@uni.edu", PASSWORD)
            .await
            .expect("Seeded account should sign in")
    }

    /// Hub for Ada with conversations already loaded
    pub async fn hub(&self) -> MessagingHub {
        let mut hub = MessagingHub::new(self.backend(), self.me.clone());
        hub.load_conversations()
            .await
            .expect("Conversations should load");
        hub
    }

    pub fn conversation(&self) -> ConversationBuilder<'_> {
        ConversationBuilder::new(self)
    }

    /// Store a message sent `secs_ago` seconds ago
    pub fn message(
        &self,
        conversation_id: &ConversationId,
        sender: &UserId,
        content: &str,
        secs_ago: i64,
    ) -> MessageId {
        let row = message_row(conversation_id, sender, content, secs_ago);
        let id = MessageId::from(row["id"].as_str().unwrap_or_default());
        self.backend.seed(collections::MESSAGES, vec![row]);
        id
    }
}

/// A message row as the push channel would deliver it
pub fn message_row(
    conversation_id: &ConversationId,
    sender: &UserId,
    content: &str,
    secs_ago: i64,
) -> Value {
    json!({
        "id": Uuid::new_v4().to_string(),
        "conversation_id": conversation_id,
        "sender_id": sender,
        "content": content,
        "message_type": "text",
        "file_url": null,
        "created_at": stamp(secs_ago),
        "status": "sent",
        "is_pinned": false,
    })
}

/// Helper for seeding conversations; Ada is always a participant
pub struct ConversationBuilder<'a> {
    campus: &'a Campus,
    others: Vec<UserId>,
    name: Option<String>,
    is_group: bool,
    age_secs: i64,
}

impl<'a> ConversationBuilder<'a> {
    fn new(campus: &'a Campus) -> Self {
        ConversationBuilder {
            campus,
            others: Vec::new(),
            name: None,
            is_group: false,
            age_secs: 3600,
        }
    }

    pub fn with(mut self, user: &UserId) -> Self {
        self.others.push(user.clone());
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn group(mut self) -> Self {
        self.is_group = true;
        self
    }

    /// Created `secs` seconds ago
    pub fn created(mut self, secs: i64) -> Self {
        self.age_secs = secs;
        self
    }

    pub fn create(self) -> ConversationId {
        let id = ConversationId::new();
        let me = &self.campus.me;
        self.campus.backend.seed(
            collections::CONVERSATIONS,
            vec![json!({
                "id": id,
                "name": self.name,
                "is_group": self.is_group,
                "created_by": me,
                "created_at": stamp(self.age_secs),
            })],
        );

        let mut participants = vec![(me.clone(), MemberRole::Admin)];
        participants.extend(self.others.into_iter().map(|u| (u, MemberRole::Member)));
        let rows = participants
            .into_iter()
            .map(|(user, role)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "conversation_id": id,
                    "user_id": user,
                    "role": role,
                    "joined_at": stamp(self.age_secs),
                })
            })
            .collect();
        self.campus.backend.seed(collections::PARTICIPANTS, rows);
        id
    }
}

/// Assertion helpers
pub struct Assertions;

impl Assertions {
    /// Messages are in ascending timestamp order with no duplicate ids
    pub fn assert_chronological(messages: &[unimesh_client::models::Message]) {
        for pair in messages.windows(2) {
            assert!(
                pair[0].created_at <= pair[1].created_at,
                "{} is newer than {}",
                pair[0].id,
                pair[1].id
            );
        }
        let mut ids: Vec<_> = messages.iter().map(|m| &m.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), messages.len(), "duplicate message ids");
    }
}
