/// Conversation store.
/// Holds the signed-in user's conversations, most recent activity first.
/// Loaded in three round-trips whatever the number of conversations
/// (memberships, rows with participants, profiles with messages) and patched
/// in place as new messages arrive.

use crate::backend::{decode, decode_all, encode, Backend, Query, Row};
use crate::error::{ClientError, Result};
use crate::models::{
    collections, Conversation, ConversationId, ConversationRow, MemberRole, Message, Participant,
    ParticipantRow, Profile, UserId,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub struct ConversationStore {
    backend: Arc<dyn Backend>,
    user_id: UserId,
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn Backend>, user_id: UserId) -> Self {
        ConversationStore {
            backend,
            user_id,
            conversations: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Fetch every conversation `user_id` participates in and replace the
    /// local list. On failure the previous list is kept.
    pub async fn load(&mut self, user_id: &UserId) -> Result<&[Conversation]> {
        let memberships: Vec<ParticipantRow> = decode_all(
            self.backend
                .list_rows(&Query::table(collections::PARTICIPANTS).eq("user_id", user_id))
                .await?,
        )?;
        let ids: Vec<ConversationId> = memberships
            .into_iter()
            .map(|m| m.conversation_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let conversations = hydrate(self.backend.as_ref(), &ids, user_id).await?;
        log::info!("Loaded {} conversations for {}", conversations.len(), user_id);

        self.user_id = user_id.clone();
        self.conversations = conversations;
        self.sort();
        Ok(&self.conversations)
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Existing direct conversation with `other`, if any
    pub fn find_direct_with(&self, other: &UserId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| !c.is_group && c.counterpart(&self.user_id).map(|p| &p.user_id) == Some(other))
    }

    /// Replace the latest-message snapshot of a conversation. Returns whether
    /// the store changed. Unknown conversations and messages older than the
    /// current snapshot leave the store untouched.
    pub fn patch_latest_message(&mut self, id: &ConversationId, message: &Message) -> bool {
        let Some(conversation) = self.conversations.iter_mut().find(|c| &c.id == id) else {
            log::warn!(
                "Message {} refers to conversation {} which is not loaded; ignoring",
                message.id,
                id
            );
            return false;
        };

        if let Some(current) = &conversation.latest_message {
            if current.id != message.id && current.created_at > message.created_at {
                log::debug!("Message {} is older than the snapshot of {}", message.id, id);
                return false;
            }
        }

        conversation.latest_message = Some(message.clone());
        self.sort();
        true
    }

    /// Insert or replace by id
    pub fn upsert(&mut self, conversation: Conversation) {
        match self.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => *existing = conversation,
            None => self.conversations.push(conversation),
        }
        self.sort();
    }

    pub fn remove(&mut self, id: &ConversationId) -> Option<Conversation> {
        let index = self.conversations.iter().position(|c| &c.id == id)?;
        Some(self.conversations.remove(index))
    }

    /// Start a conversation with `participants`. A direct conversation takes
    /// exactly one other user and is reused if one already exists.
    pub async fn create_conversation(
        &mut self,
        participants: &[UserId],
        is_group: bool,
        name: Option<&str>,
    ) -> Result<Conversation> {
        let others: Vec<&UserId> = participants
            .iter()
            .filter(|p| *p != &self.user_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if others.is_empty() {
            return Err(ClientError::Validation(
                "A conversation needs at least one other participant".to_string(),
            ));
        }
        if !is_group {
            if others.len() != 1 {
                return Err(ClientError::Validation(
                    "A direct conversation has exactly one other participant".to_string(),
                ));
            }
            if let Some(existing) = self.find_direct_with(others[0]) {
                log::debug!("Reusing direct conversation {}", existing.id);
                return Ok(existing.clone());
            }
        }

        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let row: ConversationRow = decode(
            self.backend
                .insert_row(
                    collections::CONVERSATIONS,
                    json!({
                        "name": name,
                        "is_group": is_group,
                        "created_by": self.user_id,
                    }),
                )
                .await?,
        )?;

        let creator_role = if is_group { MemberRole::Admin } else { MemberRole::Member };
        let mut rows: Vec<Row> = vec![participant_row(&row.id, &self.user_id, creator_role)?];
        for other in &others {
            rows.push(participant_row(&row.id, other, MemberRole::Member)?);
        }
        self.backend.insert_rows(collections::PARTICIPANTS, rows).await?;
        log::info!("Created conversation {} with {} others", row.id, others.len());

        self.refresh_conversation(&row.id).await
    }

    /// Add a member to a group conversation
    pub async fn add_participant(&mut self, id: &ConversationId, user_id: &UserId) -> Result<Conversation> {
        let conversation = self
            .get(id)
            .ok_or_else(|| ClientError::NotFound(format!("Conversation {}", id)))?;
        if !conversation.is_group {
            return Err(ClientError::Validation(
                "Participants can only be added to group conversations".to_string(),
            ));
        }
        self.backend
            .insert_row(
                collections::PARTICIPANTS,
                participant_row(id, user_id, MemberRole::Member)?,
            )
            .await?;
        self.refresh_conversation(id).await
    }

    /// Remove the signed-in user's membership. The conversation itself is
    /// kept on the backend; it only disappears from this list.
    pub async fn leave_conversation(&mut self, id: &ConversationId) -> Result<()> {
        self.backend
            .delete_rows(
                &Query::table(collections::PARTICIPANTS)
                    .eq("conversation_id", id)
                    .eq("user_id", &self.user_id),
            )
            .await?;
        self.remove(id);
        log::info!("Left conversation {}", id);
        Ok(())
    }

    /// Re-fetch one conversation and upsert it
    pub async fn refresh_conversation(&mut self, id: &ConversationId) -> Result<Conversation> {
        let conversation = hydrate(self.backend.as_ref(), std::slice::from_ref(id), &self.user_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Conversation {}", id)))?;
        self.upsert(conversation.clone());
        Ok(conversation)
    }

    fn sort(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
    }
}

fn participant_row(conversation_id: &ConversationId, user_id: &UserId, role: MemberRole) -> Result<Row> {
    encode(&ParticipantRow {
        id: None,
        conversation_id: conversation_id.clone(),
        user_id: user_id.clone(),
        role,
    })
    .map(|mut row| {
        if let Value::Object(fields) = &mut row {
            fields.remove("id");
        }
        row
    })
}

/// Build hydrated conversations for `ids`: rows and participants in one
/// round-trip, then profiles and messages. The newest message per
/// conversation becomes its snapshot.
async fn hydrate(backend: &dyn Backend, ids: &[ConversationId], viewer: &UserId) -> Result<Vec<Conversation>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows_query = Query::table(collections::CONVERSATIONS).is_in("id", ids);
    let participants_query = Query::table(collections::PARTICIPANTS).is_in("conversation_id", ids);
    let (rows, participant_rows) = futures::try_join!(
        backend.list_rows(&rows_query),
        backend.list_rows(&participants_query),
    )?;
    let rows: Vec<ConversationRow> = decode_all(rows)?;
    let participant_rows: Vec<ParticipantRow> = decode_all(participant_rows)?;

    let user_ids: BTreeSet<&UserId> = participant_rows.iter().map(|p| &p.user_id).collect();
    let profiles_query = Query::table(collections::PROFILES).is_in("id", user_ids);
    let messages_query = Query::table(collections::MESSAGES)
        .is_in("conversation_id", ids)
        .order_by("created_at", false);
    let (profiles, messages) = futures::try_join!(
        backend.list_rows(&profiles_query),
        backend.list_rows(&messages_query),
    )?;

    // Newest first, so the first row seen per conversation is its latest
    let mut latest: HashMap<ConversationId, Message> = HashMap::new();
    for message in decode_all::<Message>(messages)? {
        latest.entry(message.conversation_id.clone()).or_insert(message);
    }

    let profiles: HashMap<UserId, Profile> = decode_all::<Profile>(profiles)?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let mut by_conversation: HashMap<&ConversationId, Vec<Participant>> = HashMap::new();
    for row in &participant_rows {
        by_conversation
            .entry(&row.conversation_id)
            .or_default()
            .push(Participant::from_profile(row, profiles.get(&row.user_id)));
    }

    let mut conversations = Vec::with_capacity(rows.len());
    for row in &rows {
        let latest = latest.remove(&row.id);
        let participants = by_conversation.remove(&row.id).unwrap_or_default();
        conversations.push(Conversation::assemble(row.clone(), participants, latest, viewer));
    }
    Ok(conversations)
}
