/// Profile service.
/// Reads and edits student profiles, their skills, interests, classes and
/// projects, and the profile picture.

use crate::backend::{decode, decode_all, encode, Backend, Query};
use crate::error::{ClientError, Result};
use crate::models::{
    buckets, collections, file_extension, ClassEnrollment, Interest, NewClass, NewProject,
    Profile, ProfileDetails, ProfileUpdate, Project, ProjectUpdate, RowId, Skill, UserId,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct ProfileService {
    backend: Arc<dyn Backend>,
}

impl ProfileService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        ProfileService { backend }
    }

    /// Profile with its skills, interests, classes and projects
    pub async fn get_profile(&self, user_id: &UserId) -> Result<ProfileDetails> {
        let profile_query = Query::table(collections::PROFILES).eq("id", user_id);
        let skills_query = Query::table(collections::SKILLS)
            .eq("user_id", user_id)
            .order_by("skill_name", true);
        let interests_query = Query::table(collections::INTERESTS)
            .eq("user_id", user_id)
            .order_by("interest_name", true);
        let classes_query = Query::table(collections::CLASSES)
            .eq("user_id", user_id)
            .order_by("class_code", true);
        let projects_query = Query::table(collections::PROJECTS)
            .eq("user_id", user_id)
            .order_by("project_name", true);

        let (profile, skills, interests, classes, projects) = futures::try_join!(
            self.backend.maybe_single(&profile_query),
            self.backend.list_rows(&skills_query),
            self.backend.list_rows(&interests_query),
            self.backend.list_rows(&classes_query),
            self.backend.list_rows(&projects_query),
        )?;
        let profile = profile.ok_or_else(|| ClientError::NotFound(format!("Profile {}", user_id)))?;

        Ok(ProfileDetails {
            profile: decode(profile)?,
            skills: decode_all(skills)?,
            interests: decode_all(interests)?,
            classes: decode_all(classes)?,
            projects: decode_all(projects)?,
        })
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Profile>> {
        self.backend
            .maybe_single(&Query::table(collections::PROFILES).eq("email", email.trim()))
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn update_profile(&self, user_id: &UserId, update: &ProfileUpdate) -> Result<Profile> {
        if update.is_empty() {
            return Err(ClientError::Validation("Nothing to update".to_string()));
        }
        if let Some(name) = &update.full_name {
            if name.trim().is_empty() {
                return Err(ClientError::Validation("Full name cannot be empty".to_string()));
            }
        }
        let rows = self
            .backend
            .update_rows(
                &Query::table(collections::PROFILES).eq("id", user_id),
                encode(update)?,
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Profile {}", user_id)))?;
        log::info!("Updated profile {}", user_id);
        decode(row)
    }

    pub async fn add_skill(&self, user_id: &UserId, skill_name: &str) -> Result<Skill> {
        let skill_name = non_blank(skill_name, "Skill")?;
        decode(
            self.backend
                .insert_row(
                    collections::SKILLS,
                    json!({ "user_id": user_id, "skill_name": skill_name }),
                )
                .await?,
        )
    }

    pub async fn remove_skill(&self, skill_id: &RowId) -> Result<()> {
        self.backend
            .delete_rows(&Query::table(collections::SKILLS).eq("id", skill_id.as_str()))
            .await
    }

    pub async fn add_interest(&self, user_id: &UserId, interest_name: &str) -> Result<Interest> {
        let interest_name = non_blank(interest_name, "Interest")?;
        decode(
            self.backend
                .insert_row(
                    collections::INTERESTS,
                    json!({ "user_id": user_id, "interest_name": interest_name }),
                )
                .await?,
        )
    }

    pub async fn remove_interest(&self, interest_id: &RowId) -> Result<()> {
        self.backend
            .delete_rows(&Query::table(collections::INTERESTS).eq("id", interest_id.as_str()))
            .await
    }

    pub async fn add_class(&self, user_id: &UserId, class: &NewClass) -> Result<ClassEnrollment> {
        non_blank(&class.class_code, "Class code")?;
        let row = with_owner(encode(class)?, user_id);
        decode(self.backend.insert_row(collections::CLASSES, row).await?)
    }

    pub async fn remove_class(&self, class_id: &RowId) -> Result<()> {
        self.backend
            .delete_rows(&Query::table(collections::CLASSES).eq("id", class_id.as_str()))
            .await
    }

    pub async fn add_project(&self, user_id: &UserId, project: &NewProject) -> Result<Project> {
        non_blank(&project.project_name, "Project name")?;
        let row = with_owner(encode(project)?, user_id);
        decode(self.backend.insert_row(collections::PROJECTS, row).await?)
    }

    pub async fn update_project(&self, project_id: &RowId, update: &ProjectUpdate) -> Result<Project> {
        if let Some(name) = &update.project_name {
            non_blank(name, "Project name")?;
        }
        let rows = self
            .backend
            .update_rows(
                &Query::table(collections::PROJECTS).eq("id", project_id.as_str()),
                encode(update)?,
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Project {}", project_id)))?;
        decode(row)
    }

    pub async fn remove_project(&self, project_id: &RowId) -> Result<()> {
        self.backend
            .delete_rows(&Query::table(collections::PROJECTS).eq("id", project_id.as_str()))
            .await
    }

    /// Upload a new picture (replacing the previous one) and point the
    /// profile at it
    pub async fn upload_profile_picture(
        &self,
        user_id: &UserId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Profile> {
        if bytes.is_empty() {
            return Err(ClientError::Validation("Image is empty".to_string()));
        }
        let path = format!("{}/profile.{}", user_id, file_extension(file_name));
        let url = self
            .backend
            .upload_file(buckets::PROFILE_IMAGES, &path, bytes, true)
            .await?;
        self.update_profile(
            user_id,
            &ProfileUpdate {
                profile_picture_url: Some(url),
                ..Default::default()
            },
        )
        .await
    }

    /// Best-effort presence flag
    pub async fn set_online(&self, user_id: &UserId, online: bool) -> Result<()> {
        self.backend
            .update_rows(
                &Query::table(collections::PROFILES).eq("id", user_id),
                json!({ "is_online": online }),
            )
            .await
            .map(|_| ())
    }
}

fn non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClientError::Validation(format!("{} cannot be empty", what)));
    }
    Ok(trimmed)
}

fn with_owner(mut row: Value, user_id: &UserId) -> Value {
    if let Value::Object(fields) = &mut row {
        fields.insert("user_id".to_string(), user_id.into());
    }
    row
}
