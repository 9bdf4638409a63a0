/// Student organization model.
/// Organizations, their members, join requests and the derived membership
/// status of a user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MemberRole, OrganizationId, RowId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub admin_id: UserId,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationMember {
    pub id: RowId,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    #[serde(default)]
    pub role: MemberRole,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl JoinRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinRequestStatus::Pending => "pending",
            JoinRequestStatus::Approved => "approved",
            JoinRequestStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: RowId,
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub status: JoinRequestStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Where a user stands with respect to one organization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Member { role: MemberRole },
    Pending,
    None,
}

impl MembershipStatus {
    pub fn is_member(&self) -> bool {
        matches!(self, MembershipStatus::Member { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            MembershipStatus::Member { .. } => "member",
            MembershipStatus::Pending => "pending",
            MembershipStatus::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationDetails {
    pub organization: Organization,
    pub members: Vec<OrganizationMember>,
    pub join_requests: Vec<JoinRequest>,
}

impl OrganizationDetails {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &JoinRequest> {
        self.join_requests
            .iter()
            .filter(|r| r.status == JoinRequestStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewOrganization {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub admin_id: UserId,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrganizationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct OrganizationFilters {
    pub category: Option<String>,
    pub search: Option<String>,
    pub limit: usize,
}

impl Default for OrganizationFilters {
    fn default() -> Self {
        OrganizationFilters {
            category: None,
            search: None,
            limit: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_status_labels() {
        assert_eq!(MembershipStatus::None.label(), "none");
        assert_eq!(MembershipStatus::Pending.label(), "pending");
        let member = MembershipStatus::Member {
            role: MemberRole::Admin,
        };
        assert!(member.is_member());
        assert_eq!(member.label(), "member");
    }

    #[test]
    fn test_join_request_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&JoinRequestStatus::Approved).unwrap(),
            "\"approved\""
        );
        assert_eq!(JoinRequestStatus::Rejected.as_str(), "rejected");
    }
}
