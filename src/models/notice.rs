/// Campus notice model.
/// Notices are posted by students, shown once approved, and may expire or be
/// pinned to the top of the board.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NoticeId, Profile, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub id: NoticeId,
    pub author_id: UserId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Notice {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoticeDetails {
    pub notice: Notice,
    pub author: Option<Profile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewNotice {
    pub author_id: UserId,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NoticeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Board filters. A category of `all` is the same as no category.
#[derive(Debug, Clone)]
pub struct NoticeFilters {
    pub category: Option<String>,
    pub search: Option<String>,
    pub limit: usize,
}

impl Default for NoticeFilters {
    fn default() -> Self {
        NoticeFilters {
            category: None,
            search: None,
            limit: 50,
        }
    }
}
