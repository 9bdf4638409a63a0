/// Data models for the UniMesh client.
/// Typed records for every backend collection the client reads or writes.

pub mod connection;
pub mod conversation;
pub mod event;
pub mod message;
pub mod notice;
pub mod organization;
pub mod profile;

pub use connection::{Connection, ConnectionStatus};
pub use conversation::{Conversation, ConversationRow, Participant, ParticipantRow};
pub use event::{Attendance, Event, EventDetails, EventFilters, EventUpdate, MyEventsKind, NewEvent};
pub use message::{DeliveryStatus, Message, MessageType, NewMessage};
pub use notice::{NewNotice, Notice, NoticeDetails, NoticeFilters, NoticeUpdate};
pub use organization::{
    JoinRequest, JoinRequestStatus, MembershipStatus, NewOrganization, Organization,
    OrganizationDetails, OrganizationFilters, OrganizationMember, OrganizationUpdate,
};
pub use profile::{
    ClassEnrollment, DiscoveryFilters, Interest, NewClass, NewProject, Profile, ProfileDetails,
    ProfileUpdate, Project, ProjectUpdate, SignUpProfile, Skill,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a string-backed identifier. Backend ids are opaque strings
/// (UUIDs in practice); new ids are v4 UUIDs.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<$name> for serde_json::Value {
            fn from(id: $name) -> Self {
                serde_json::Value::String(id.0)
            }
        }

        impl From<&$name> for serde_json::Value {
            fn from(id: &$name) -> Self {
                serde_json::Value::String(id.0.clone())
            }
        }
    };
}

string_id!(UserId);
string_id!(ConversationId);
string_id!(MessageId);
string_id!(EventId);
string_id!(OrganizationId);
string_id!(NoticeId);
string_id!(RowId);

/// Role within a group conversation or an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    #[default]
    Member,
    Admin,
}

/// Collection names exposed by the backend
pub mod collections {
    pub const PROFILES: &str = "user_profiles";
    pub const SKILLS: &str = "user_skills";
    pub const INTERESTS: &str = "user_interests";
    pub const CLASSES: &str = "user_classes";
    pub const PROJECTS: &str = "user_projects";
    pub const CONNECTIONS: &str = "connections";
    pub const CONVERSATIONS: &str = "conversations";
    pub const PARTICIPANTS: &str = "conversation_participants";
    pub const MESSAGES: &str = "messages";
    pub const EVENTS: &str = "events";
    pub const ATTENDEES: &str = "event_attendees";
    pub const ORGANIZATIONS: &str = "organizations";
    pub const MEMBERSHIPS: &str = "organization_members";
    pub const JOIN_REQUESTS: &str = "join_requests";
    pub const NOTICES: &str = "notices";
}

/// Storage buckets
pub mod buckets {
    pub const PROFILE_IMAGES: &str = "profile-images";
    pub const MESSAGE_ATTACHMENTS: &str = "message-attachments";
    pub const EVENT_IMAGES: &str = "event-images";
    pub const ORGANIZATION_LOGOS: &str = "organization-logos";
}

/// Extension of an uploaded file name, lowercased; `bin` when absent
pub fn file_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
        _ => "bin".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let id1 = ConversationId::new();
        let id2 = ConversationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_is_transparent_in_json() {
        let id = UserId::from("user-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user-1\"");
        let back: UserId = serde_json::from_str("\"user-1\"").unwrap();
        assert_eq!(back, id);
        assert_eq!(id.to_string(), "user-1");
    }

    #[test]
    fn test_member_role_wire_names() {
        assert_eq!(serde_json::to_string(&MemberRole::Admin).unwrap(), "\"admin\"");
        let role: MemberRole = serde_json::from_str("\"member\"").unwrap();
        assert_eq!(role, MemberRole::Member);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("photo.JPG"), "jpg");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("README"), "bin");
        assert_eq!(file_extension(".hidden"), "bin");
    }
}
