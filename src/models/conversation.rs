/// Conversation model.
/// `ConversationRow` and `ParticipantRow` mirror the backend collections;
/// `Conversation` is the hydrated form held by the conversation store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, MemberRole, Message, Profile, RowId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRow {
    #[serde(default)]
    pub id: Option<RowId>,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default)]
    pub role: MemberRole,
}

/// A user's membership within a conversation, joined with their profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// Best-effort; refreshed only when conversations are reloaded
    pub is_online: bool,
    pub role: MemberRole,
}

impl Participant {
    pub fn from_profile(row: &ParticipantRow, profile: Option<&Profile>) -> Self {
        Participant {
            user_id: row.user_id.clone(),
            display_name: profile
                .map(|p| p.full_name.clone())
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| "Unknown user".to_string()),
            avatar_url: profile.and_then(|p| p.profile_picture_url.clone()),
            is_online: profile.map(|p| p.is_online).unwrap_or(false),
            role: row.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// Explicit group name, if one was given
    pub name: Option<String>,
    pub display_name: String,
    pub is_group: bool,
    pub participants: Vec<Participant>,
    pub latest_message: Option<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Build the hydrated form. `viewer` is the signed-in user and is
    /// excluded when deriving the display name.
    pub fn assemble(
        row: ConversationRow,
        participants: Vec<Participant>,
        latest_message: Option<Message>,
        viewer: &UserId,
    ) -> Self {
        let display_name = derive_display_name(&row, &participants, viewer);
        Conversation {
            id: row.id,
            name: row.name,
            display_name,
            is_group: row.is_group,
            participants,
            latest_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    /// Timestamp used to order the conversation list
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.latest_message
            .as_ref()
            .map(|m| m.created_at)
            .or(self.updated_at)
            .unwrap_or(self.created_at)
    }

    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user_id)
    }

    /// The other side of a direct conversation
    pub fn counterpart(&self, viewer: &UserId) -> Option<&Participant> {
        if self.is_group {
            return None;
        }
        self.participants.iter().find(|p| &p.user_id != viewer)
    }
}

fn derive_display_name(row: &ConversationRow, participants: &[Participant], viewer: &UserId) -> String {
    let others: Vec<&str> = participants
        .iter()
        .filter(|p| &p.user_id != viewer)
        .map(|p| p.display_name.as_str())
        .collect();

    if row.is_group {
        if let Some(name) = row.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        if others.is_empty() {
            return "Group".to_string();
        }
        return others.join(", ");
    }

    others
        .first()
        .map(|name| name.to_string())
        .unwrap_or_else(|| "Unknown user".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str, name: &str) -> Participant {
        Participant {
            user_id: UserId::from(id),
            display_name: name.to_string(),
            avatar_url: None,
            is_online: false,
            role: MemberRole::Member,
        }
    }

    fn row(is_group: bool, name: Option<&str>) -> ConversationRow {
        ConversationRow {
            id: ConversationId::from("c1"),
            name: name.map(str::to_string),
            is_group,
            created_by: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_direct_name_is_other_participant() {
        let me = UserId::from("me");
        let conv = Conversation::assemble(
            row(false, None),
            vec![participant("me", "Me"), participant("u2", "Ada Lovelace")],
            None,
            &me,
        );
        assert_eq!(conv.display_name, "Ada Lovelace");
        assert_eq!(conv.counterpart(&me).unwrap().user_id.as_str(), "u2");
    }

    #[test]
    fn test_group_name_explicit_or_derived() {
        let me = UserId::from("me");
        let members = vec![
            participant("me", "Me"),
            participant("u2", "Ada"),
            participant("u3", "Grace"),
        ];
        let named = Conversation::assemble(row(true, Some("Study group")), members.clone(), None, &me);
        assert_eq!(named.display_name, "Study group");

        let unnamed = Conversation::assemble(row(true, Some("  ")), members, None, &me);
        assert_eq!(unnamed.display_name, "Ada, Grace");
        assert!(unnamed.counterpart(&me).is_none());
    }

    #[test]
    fn test_new_conversation_has_no_snapshot() {
        let me = UserId::from("me");
        let conv = Conversation::assemble(row(false, None), vec![participant("me", "Me")], None, &me);
        assert!(conv.latest_message.is_none());
        assert_eq!(conv.last_activity(), conv.created_at);
        assert_eq!(conv.display_name, "Unknown user");
    }

    #[test]
    fn test_participant_without_profile() {
        let row = ParticipantRow {
            id: None,
            conversation_id: ConversationId::from("c1"),
            user_id: UserId::from("ghost"),
            role: MemberRole::Admin,
        };
        let p = Participant::from_profile(&row, None);
        assert_eq!(p.display_name, "Unknown user");
        assert_eq!(p.role, MemberRole::Admin);
        assert!(!p.is_online);
    }
}
