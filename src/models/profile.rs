/// Profile model.
/// Student profiles plus the skill, interest, class and project rows attached
/// to them, and the filter set used by discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RowId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub university: Option<String>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub looking_for: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: RowId,
    pub user_id: UserId,
    pub skill_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interest {
    pub id: RowId,
    pub user_id: UserId,
    pub interest_name: String,
}

/// Class the student is taking, row in `user_classes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEnrollment {
    pub id: RowId,
    pub user_id: UserId,
    pub class_code: String,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewClass {
    pub class_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
}

/// Portfolio project, row in `user_projects`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: RowId,
    pub user_id: UserId,
    pub project_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub demo_url: Option<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewProject {
    pub project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_url: Option<String>,
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technologies: Option<Vec<String>>,
}

/// Profile with its attached rows. Discovery listings carry skills and
/// interests only; classes and projects are filled by a full profile fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDetails {
    pub profile: Profile,
    pub skills: Vec<Skill>,
    pub interests: Vec<Interest>,
    pub classes: Vec<ClassEnrollment>,
    pub projects: Vec<Project>,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub university: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub looking_for: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.university.is_none()
            && self.major.is_none()
            && self.academic_year.is_none()
            && self.bio.is_none()
            && self.looking_for.is_none()
            && self.profile_picture_url.is_none()
            && self.is_active.is_none()
    }
}

/// Metadata attached to a new account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUpProfile {
    pub full_name: String,
    pub university: String,
}

#[derive(Debug, Clone)]
pub struct DiscoveryFilters {
    pub university: Option<String>,
    pub major: Option<String>,
    pub academic_year: Option<String>,
    pub looking_for: Option<String>,
    pub exclude_user_id: Option<UserId>,
    pub limit: usize,
}

impl Default for DiscoveryFilters {
    fn default() -> Self {
        DiscoveryFilters {
            university: None,
            major: None,
            academic_year: None,
            looking_for: None,
            exclude_user_id: None,
            limit: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_defaults() {
        let profile: Profile = serde_json::from_value(json!({ "id": "u1" })).unwrap();
        assert!(profile.is_active);
        assert!(!profile.is_online);
        assert_eq!(profile.full_name, "");
    }

    #[test]
    fn test_profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            bio: Some("Rustacean".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, json!({ "bio": "Rustacean" }));
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn test_discovery_default_limit() {
        assert_eq!(DiscoveryFilters::default().limit, 20);
    }
}
