/// Student organizations, memberships and join requests.

use crate::backend::{decode, decode_all, encode, Backend, Filter, Query};
use crate::error::{ClientError, Result};
use crate::models::{
    buckets, collections, file_extension, JoinRequest, JoinRequestStatus, MemberRole,
    MembershipStatus, NewOrganization, Organization, OrganizationDetails, OrganizationFilters,
    OrganizationId, OrganizationMember, OrganizationUpdate, RowId, UserId,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct OrganizationService {
    backend: Arc<dyn Backend>,
}

impl OrganizationService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        OrganizationService { backend }
    }

    /// Active organizations ordered by name
    pub async fn list_organizations(&self, filters: &OrganizationFilters) -> Result<Vec<Organization>> {
        let mut query = Query::table(collections::ORGANIZATIONS)
            .eq("is_active", true)
            .order_by("name", true)
            .limit(filters.limit);
        if let Some(category) = &filters.category {
            query = query.eq("category", category.as_str());
        }
        if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.any(vec![
                Filter::contains("name", search),
                Filter::contains("description", search),
            ]);
        }
        decode_all(self.backend.list_rows(&query).await?)
    }

    /// Organization with its members and join requests
    pub async fn get_organization(&self, organization_id: &OrganizationId) -> Result<OrganizationDetails> {
        let org_query = Query::table(collections::ORGANIZATIONS).eq("id", organization_id);
        let members_query = Query::table(collections::MEMBERSHIPS)
            .eq("organization_id", organization_id)
            .order_by("joined_at", true);
        let requests_query = Query::table(collections::JOIN_REQUESTS)
            .eq("organization_id", organization_id)
            .order_by("created_at", false);
        let (organization, members, requests) = futures::try_join!(
            self.backend.single(&org_query),
            self.backend.list_rows(&members_query),
            self.backend.list_rows(&requests_query),
        )?;
        Ok(OrganizationDetails {
            organization: decode(organization)?,
            members: decode_all(members)?,
            join_requests: decode_all(requests)?,
        })
    }

    /// Create an organization; its admin becomes the first member
    pub async fn create_organization(&self, new: &NewOrganization) -> Result<Organization> {
        if new.name.trim().is_empty() {
            return Err(ClientError::Validation("Organization name is required".to_string()));
        }
        let mut row = encode(new)?;
        if let Value::Object(fields) = &mut row {
            fields.insert("is_active".to_string(), Value::Bool(true));
        }
        let organization: Organization = decode(
            self.backend
                .insert_row(collections::ORGANIZATIONS, row)
                .await?,
        )?;
        self.backend
            .insert_row(
                collections::MEMBERSHIPS,
                json!({
                    "organization_id": organization.id,
                    "user_id": new.admin_id,
                    "role": MemberRole::Admin,
                    "joined_at": Utc::now(),
                }),
            )
            .await?;
        log::info!("Created organization {} ({})", organization.id, organization.name);
        Ok(organization)
    }

    pub async fn update_organization(
        &self,
        organization_id: &OrganizationId,
        update: &OrganizationUpdate,
    ) -> Result<Organization> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(ClientError::Validation("Organization name is required".to_string()));
            }
        }
        let rows = self
            .backend
            .update_rows(
                &Query::table(collections::ORGANIZATIONS).eq("id", organization_id),
                encode(update)?,
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Organization {}", organization_id)))?;
        decode(row)
    }

    pub async fn delete_organization(&self, organization_id: &OrganizationId) -> Result<()> {
        self.backend
            .delete_rows(&Query::table(collections::ORGANIZATIONS).eq("id", organization_id))
            .await?;
        log::info!("Deleted organization {}", organization_id);
        Ok(())
    }

    /// Ask to join. Members and users with a pending request are turned away.
    pub async fn request_to_join(
        &self,
        organization_id: &OrganizationId,
        user_id: &UserId,
        message: Option<&str>,
    ) -> Result<JoinRequest> {
        match self.check_membership_status(organization_id, user_id).await? {
            MembershipStatus::Member { .. } => {
                return Err(ClientError::AlreadyExists(
                    "You are already a member of this organization".to_string(),
                ))
            }
            MembershipStatus::Pending => {
                return Err(ClientError::AlreadyExists(
                    "You already have a pending request".to_string(),
                ))
            }
            MembershipStatus::None => {}
        }
        let row = self
            .backend
            .insert_row(
                collections::JOIN_REQUESTS,
                json!({
                    "organization_id": organization_id,
                    "user_id": user_id,
                    "message": message.unwrap_or_default(),
                    "status": JoinRequestStatus::Pending,
                }),
            )
            .await?;
        decode(row)
    }

    /// Approve or reject a pending request; approval adds the member row
    pub async fn respond_to_join_request(&self, request_id: &RowId, approve: bool) -> Result<JoinRequest> {
        let request: JoinRequest = decode(
            self.backend
                .single(&Query::table(collections::JOIN_REQUESTS).eq("id", request_id))
                .await?,
        )?;
        if request.status != JoinRequestStatus::Pending {
            return Err(ClientError::Validation(format!(
                "Request was already {}",
                request.status.as_str()
            )));
        }

        let status = if approve {
            JoinRequestStatus::Approved
        } else {
            JoinRequestStatus::Rejected
        };
        let rows = self
            .backend
            .update_rows(
                &Query::table(collections::JOIN_REQUESTS).eq("id", request_id),
                json!({ "status": status, "updated_at": Utc::now() }),
            )
            .await?;
        let updated: JoinRequest = rows
            .into_iter()
            .next()
            .map(decode)
            .transpose()?
            .ok_or_else(|| ClientError::NotFound(format!("Join request {}", request_id)))?;

        if approve {
            self.backend
                .insert_row(
                    collections::MEMBERSHIPS,
                    json!({
                        "organization_id": request.organization_id,
                        "user_id": request.user_id,
                        "role": MemberRole::Member,
                        "joined_at": Utc::now(),
                    }),
                )
                .await?;
        }
        log::info!("Join request {} {}", request_id, status.as_str());
        Ok(updated)
    }

    /// Pending requests, newest first
    pub async fn pending_requests(&self, organization_id: &OrganizationId) -> Result<Vec<JoinRequest>> {
        decode_all(
            self.backend
                .list_rows(
                    &Query::table(collections::JOIN_REQUESTS)
                        .eq("organization_id", organization_id)
                        .eq("status", JoinRequestStatus::Pending.as_str())
                        .order_by("created_at", false),
                )
                .await?,
        )
    }

    pub async fn check_membership_status(
        &self,
        organization_id: &OrganizationId,
        user_id: &UserId,
    ) -> Result<MembershipStatus> {
        let member_query = Query::table(collections::MEMBERSHIPS)
            .eq("organization_id", organization_id)
            .eq("user_id", user_id);
        let request_query = Query::table(collections::JOIN_REQUESTS)
            .eq("organization_id", organization_id)
            .eq("user_id", user_id)
            .eq("status", JoinRequestStatus::Pending.as_str());
        let (member, request) = futures::try_join!(
            self.backend.maybe_single(&member_query),
            self.backend.maybe_single(&request_query),
        )?;

        if let Some(row) = member {
            let member: OrganizationMember = decode(row)?;
            return Ok(MembershipStatus::Member { role: member.role });
        }
        Ok(if request.is_some() {
            MembershipStatus::Pending
        } else {
            MembershipStatus::None
        })
    }

    /// Membership status for each of `organization_ids`, two queries in total
    pub async fn memberships_for_organizations(
        &self,
        organization_ids: &[OrganizationId],
        user_id: &UserId,
    ) -> Result<HashMap<OrganizationId, MembershipStatus>> {
        let mut statuses: HashMap<OrganizationId, MembershipStatus> = organization_ids
            .iter()
            .map(|id| (id.clone(), MembershipStatus::None))
            .collect();
        if organization_ids.is_empty() {
            return Ok(statuses);
        }

        let member_query = Query::table(collections::MEMBERSHIPS)
            .eq("user_id", user_id)
            .is_in("organization_id", organization_ids);
        let request_query = Query::table(collections::JOIN_REQUESTS)
            .eq("user_id", user_id)
            .eq("status", JoinRequestStatus::Pending.as_str())
            .is_in("organization_id", organization_ids);
        let (members, requests) = futures::try_join!(
            self.backend.list_rows(&member_query),
            self.backend.list_rows(&request_query),
        )?;

        for request in decode_all::<JoinRequest>(requests)? {
            statuses.insert(request.organization_id, MembershipStatus::Pending);
        }
        for member in decode_all::<OrganizationMember>(members)? {
            statuses.insert(
                member.organization_id,
                MembershipStatus::Member { role: member.role },
            );
        }
        Ok(statuses)
    }

    pub async fn leave_organization(&self, organization_id: &OrganizationId, user_id: &UserId) -> Result<()> {
        self.backend
            .delete_rows(
                &Query::table(collections::MEMBERSHIPS)
                    .eq("organization_id", organization_id)
                    .eq("user_id", user_id),
            )
            .await?;
        log::info!("{} left organization {}", user_id, organization_id);
        Ok(())
    }

    /// Organizations `user_id` belongs to, by name
    pub async fn my_organizations(&self, user_id: &UserId) -> Result<Vec<Organization>> {
        let memberships: Vec<OrganizationMember> = decode_all(
            self.backend
                .list_rows(&Query::table(collections::MEMBERSHIPS).eq("user_id", user_id))
                .await?,
        )?;
        if memberships.is_empty() {
            return Ok(Vec::new());
        }
        decode_all(
            self.backend
                .list_rows(
                    &Query::table(collections::ORGANIZATIONS)
                        .is_in("id", memberships.iter().map(|m| &m.organization_id))
                        .order_by("name", true),
                )
                .await?,
        )
    }

    /// Upload a logo and store its URL on the organization
    pub async fn upload_organization_logo(
        &self,
        organization_id: &OrganizationId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Organization> {
        if bytes.is_empty() {
            return Err(ClientError::Validation("Logo is empty".to_string()));
        }
        let path = format!("{}/logo.{}", organization_id, file_extension(file_name));
        let url = self
            .backend
            .upload_file(buckets::ORGANIZATION_LOGOS, &path, bytes, true)
            .await?;
        self.update_organization(
            organization_id,
            &OrganizationUpdate {
                logo_url: Some(url),
                ..Default::default()
            },
        )
        .await
    }
}
