/// Student discovery and connections.

use crate::backend::{decode, decode_all, Backend, Filter, Query};
use crate::error::{ClientError, Result};
use crate::models::{
    collections, Connection, ConnectionStatus, DiscoveryFilters, Interest, Profile,
    ProfileDetails, RowId, Skill, UserId,
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct DiscoveryService {
    backend: Arc<dyn Backend>,
}

impl DiscoveryService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        DiscoveryService { backend }
    }

    fn base_query(filters: &DiscoveryFilters) -> Query {
        let mut query = Query::table(collections::PROFILES)
            .eq("is_active", true)
            .order_by("full_name", true)
            .limit(filters.limit);
        if let Some(exclude) = &filters.exclude_user_id {
            query = query.neq("id", exclude);
        }
        query
    }

    /// Active profiles narrowed by the given filters
    pub async fn list_profiles(&self, filters: &DiscoveryFilters) -> Result<Vec<ProfileDetails>> {
        let mut query = Self::base_query(filters);
        if let Some(university) = &filters.university {
            query = query.contains("university", university);
        }
        if let Some(major) = &filters.major {
            query = query.contains("major", major);
        }
        if let Some(year) = &filters.academic_year {
            query = query.eq("academic_year", year.as_str());
        }
        if let Some(looking_for) = &filters.looking_for {
            query = query.contains("looking_for", looking_for);
        }
        self.with_details(query).await
    }

    /// Case-insensitive match of `term` against name, major, bio and what the
    /// student is looking for
    pub async fn search_students(&self, term: &str, filters: &DiscoveryFilters) -> Result<Vec<ProfileDetails>> {
        let mut query = Self::base_query(filters);
        let term = term.trim();
        if !term.is_empty() {
            query = query.any(
                ["full_name", "major", "bio", "looking_for"]
                    .iter()
                    .map(|column| Filter::contains(column, term))
                    .collect(),
            );
        }
        self.with_details(query).await
    }

    /// Run a profile query and attach skills and interests in two batched calls
    async fn with_details(&self, query: Query) -> Result<Vec<ProfileDetails>> {
        let profiles: Vec<Profile> = decode_all(self.backend.list_rows(&query).await?)?;
        if profiles.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&UserId> = profiles.iter().map(|p| &p.id).collect();
        let skills_query = Query::table(collections::SKILLS).is_in("user_id", ids.iter().copied());
        let interests_query = Query::table(collections::INTERESTS).is_in("user_id", ids.iter().copied());
        let (skills, interests) = futures::try_join!(
            self.backend.list_rows(&skills_query),
            self.backend.list_rows(&interests_query),
        )?;

        let mut skills_by_user: HashMap<UserId, Vec<Skill>> = HashMap::new();
        for skill in decode_all::<Skill>(skills)? {
            skills_by_user.entry(skill.user_id.clone()).or_default().push(skill);
        }
        let mut interests_by_user: HashMap<UserId, Vec<Interest>> = HashMap::new();
        for interest in decode_all::<Interest>(interests)? {
            interests_by_user
                .entry(interest.user_id.clone())
                .or_default()
                .push(interest);
        }

        Ok(profiles
            .into_iter()
            .map(|profile| ProfileDetails {
                skills: skills_by_user.remove(&profile.id).unwrap_or_default(),
                interests: interests_by_user.remove(&profile.id).unwrap_or_default(),
                classes: Vec::new(),
                projects: Vec::new(),
                profile,
            })
            .collect())
    }

    pub async fn send_connection_request(
        &self,
        requester_id: &UserId,
        requestee_id: &UserId,
        message: Option<&str>,
    ) -> Result<Connection> {
        if requester_id == requestee_id {
            return Err(ClientError::Validation(
                "You cannot connect with yourself".to_string(),
            ));
        }
        if let Some(existing) = self.connection_status(requester_id, requestee_id).await? {
            if existing.status != ConnectionStatus::Declined {
                return Err(ClientError::AlreadyExists(format!(
                    "Connection already {}",
                    existing.status.as_str()
                )));
            }
        }
        let row = self
            .backend
            .insert_row(
                collections::CONNECTIONS,
                json!({
                    "requester_id": requester_id,
                    "requestee_id": requestee_id,
                    "message": message.unwrap_or_default(),
                    "status": ConnectionStatus::Pending,
                }),
            )
            .await?;
        log::info!("Connection request {} -> {}", requester_id, requestee_id);
        decode(row)
    }

    /// The connection between two users in either direction, if any
    pub async fn connection_status(&self, user_id: &UserId, other_id: &UserId) -> Result<Option<Connection>> {
        let query = Query::table(collections::CONNECTIONS)
            .any(vec![
                Filter::all(vec![
                    Filter::eq("requester_id", user_id),
                    Filter::eq("requestee_id", other_id),
                ]),
                Filter::all(vec![
                    Filter::eq("requester_id", other_id),
                    Filter::eq("requestee_id", user_id),
                ]),
            ])
            .order_by("created_at", false);
        self.backend
            .maybe_single(&query)
            .await?
            .map(decode)
            .transpose()
    }

    /// Requests waiting for `user_id` to answer
    pub async fn pending_connection_requests(&self, user_id: &UserId) -> Result<Vec<Connection>> {
        let rows = self
            .backend
            .list_rows(
                &Query::table(collections::CONNECTIONS)
                    .eq("requestee_id", user_id)
                    .eq("status", ConnectionStatus::Pending.as_str())
                    .order_by("created_at", false),
            )
            .await?;
        decode_all(rows)
    }

    pub async fn respond_to_connection(&self, connection_id: &RowId, accept: bool) -> Result<Connection> {
        let status = if accept {
            ConnectionStatus::Accepted
        } else {
            ConnectionStatus::Declined
        };
        let rows = self
            .backend
            .update_rows(
                &Query::table(collections::CONNECTIONS).eq("id", connection_id),
                json!({ "status": status, "updated_at": Utc::now() }),
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Connection {}", connection_id)))?;
        decode(row)
    }

    /// Accepted connections in either direction
    pub async fn my_connections(&self, user_id: &UserId) -> Result<Vec<Connection>> {
        let rows = self
            .backend
            .list_rows(
                &Query::table(collections::CONNECTIONS)
                    .any(vec![
                        Filter::eq("requester_id", user_id),
                        Filter::eq("requestee_id", user_id),
                    ])
                    .eq("status", ConnectionStatus::Accepted.as_str()),
            )
            .await?;
        decode_all(rows)
    }
}
