/// Campus event model.
/// Events, RSVP (attendance) rows, and the payloads for creating or
/// editing events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, Profile, RowId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub organizer_id: UserId,
    #[serde(default = "default_public")]
    pub is_public: bool,
    #[serde(default)]
    pub max_attendees: Option<u32>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_public() -> bool {
    true
}

/// RSVP row in `event_attendees`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: RowId,
    pub event_id: EventId,
    pub user_id: UserId,
    #[serde(default)]
    pub attended: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventDetails {
    pub event: Event,
    pub organizer: Option<Profile>,
    pub attendees: Vec<Attendance>,
}

impl EventDetails {
    pub fn attendee_count(&self) -> usize {
        self.attendees.len()
    }

    pub fn is_full(&self) -> bool {
        self.event
            .max_attendees
            .map(|max| self.attendees.len() >= max as usize)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub organizer_id: UserId,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attendees: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attendees: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventFilters {
    pub event_type: Option<String>,
    pub location: Option<String>,
    pub search: Option<String>,
    pub limit: usize,
}

impl Default for EventFilters {
    fn default() -> Self {
        EventFilters {
            event_type: None,
            location: None,
            search: None,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MyEventsKind {
    Attending,
    Organizing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(max: Option<u32>) -> Event {
        Event {
            id: EventId::from("e1"),
            title: "Hack night".to_string(),
            description: None,
            event_type: Some("social".to_string()),
            location: None,
            start_date: Utc::now(),
            end_date: None,
            organizer_id: UserId::from("u1"),
            is_public: true,
            max_attendees: max,
            image_url: None,
            created_at: None,
        }
    }

    fn attendance(user: &str) -> Attendance {
        Attendance {
            id: RowId::new(),
            event_id: EventId::from("e1"),
            user_id: UserId::from(user),
            attended: false,
            created_at: None,
        }
    }

    #[test]
    fn test_capacity() {
        let details = EventDetails {
            event: event(Some(1)),
            organizer: None,
            attendees: vec![attendance("u2")],
        };
        assert!(details.is_full());

        let open = EventDetails {
            event: event(None),
            organizer: None,
            attendees: vec![attendance("u2"), attendance("u3")],
        };
        assert!(!open.is_full());
        assert_eq!(open.attendee_count(), 2);
    }

    #[test]
    fn test_event_row_defaults_to_public() {
        let ev: Event = serde_json::from_value(json!({
            "id": "e1",
            "title": "Talk",
            "start_date": "2030-01-01T18:00:00Z",
            "organizer_id": "u1"
        }))
        .unwrap();
        assert!(ev.is_public);
        assert!(ev.end_date.is_none());
    }
}
