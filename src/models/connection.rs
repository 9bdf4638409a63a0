/// Connection model.
/// A request from one student to another; accepted requests are the
/// student's connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RowId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Declined,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Accepted => "accepted",
            ConnectionStatus::Declined => "declined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: RowId,
    pub requester_id: UserId,
    pub requestee_id: UserId,
    #[serde(default)]
    pub message: Option<String>,
    pub status: ConnectionStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Connection {
    /// The user on the other end, seen from `viewer`
    pub fn other_party(&self, viewer: &UserId) -> &UserId {
        if &self.requester_id == viewer {
            &self.requestee_id
        } else {
            &self.requester_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_party() {
        let conn = Connection {
            id: RowId::from("r1"),
            requester_id: UserId::from("a"),
            requestee_id: UserId::from("b"),
            message: None,
            status: ConnectionStatus::Accepted,
            created_at: None,
            updated_at: None,
        };
        assert_eq!(conn.other_party(&UserId::from("a")).as_str(), "b");
        assert_eq!(conn.other_party(&UserId::from("b")).as_str(), "a");
    }
}
