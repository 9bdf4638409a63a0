/// Campus notice board.
/// Students post notices; they appear on the board once approved and until
/// they expire, pinned notices first.

use crate::backend::{decode, decode_all, encode, Backend, Filter, Query};
use crate::error::{ClientError, Result};
use crate::models::{
    collections, NewNotice, Notice, NoticeDetails, NoticeFilters, NoticeId, NoticeUpdate, Profile,
    UserId,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct NoticeService {
    backend: Arc<dyn Backend>,
}

impl NoticeService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        NoticeService { backend }
    }

    /// Approved, unexpired notices: pinned first, then newest first
    pub async fn list_notices(&self, filters: &NoticeFilters) -> Result<Vec<Notice>> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let unexpired = Filter::any(vec![
            Filter::is_null("expires_at"),
            Filter::gte("expires_at", now),
        ]);

        let mut query = Query::table(collections::NOTICES)
            .eq("is_approved", true)
            .order_by("is_pinned", false)
            .order_by("created_at", false)
            .limit(filters.limit);
        if let Some(category) = filters
            .category
            .as_deref()
            .filter(|c| !c.is_empty() && *c != "all")
        {
            query = query.eq("category", category);
        }
        match filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            // Two alternatives must both hold, so group them under one `and`
            Some(search) => {
                query = query.filter(Filter::all(vec![
                    unexpired,
                    Filter::any(vec![
                        Filter::contains("title", search),
                        Filter::contains("content", search),
                    ]),
                ]))
            }
            None => query = query.filter(unexpired),
        }
        decode_all(self.backend.list_rows(&query).await?)
    }

    /// Notice with its author's profile
    pub async fn get_notice(&self, notice_id: &NoticeId) -> Result<NoticeDetails> {
        let notice: Notice = decode(
            self.backend
                .single(&Query::table(collections::NOTICES).eq("id", notice_id))
                .await?,
        )?;
        let author = self
            .backend
            .maybe_single(&Query::table(collections::PROFILES).eq("id", &notice.author_id))
            .await?
            .map(decode::<Profile>)
            .transpose()?;
        Ok(NoticeDetails { notice, author })
    }

    /// Post a notice. It stays off the board until approved.
    pub async fn create_notice(&self, new: &NewNotice) -> Result<Notice> {
        require_text(&new.title, "Notice title")?;
        require_text(&new.content, "Notice content")?;
        if let Some(expires_at) = new.expires_at {
            if expires_at <= Utc::now() {
                return Err(ClientError::Validation(
                    "Expiry must be in the future".to_string(),
                ));
            }
        }
        let mut row = encode(new)?;
        if let Value::Object(fields) = &mut row {
            fields.insert("is_approved".to_string(), Value::Bool(false));
            fields.insert("is_pinned".to_string(), Value::Bool(false));
        }
        let notice: Notice = decode(self.backend.insert_row(collections::NOTICES, row).await?)?;
        log::info!("Created notice {} ({})", notice.id, notice.title);
        Ok(notice)
    }

    pub async fn update_notice(&self, notice_id: &NoticeId, update: &NoticeUpdate) -> Result<Notice> {
        if let Some(title) = &update.title {
            require_text(title, "Notice title")?;
        }
        if let Some(content) = &update.content {
            require_text(content, "Notice content")?;
        }
        let mut changes = encode(update)?;
        if let Value::Object(fields) = &mut changes {
            fields.insert("updated_at".to_string(), json!(Utc::now()));
        }
        self.update_one(notice_id, changes).await
    }

    pub async fn delete_notice(&self, notice_id: &NoticeId) -> Result<()> {
        self.backend
            .delete_rows(&Query::table(collections::NOTICES).eq("id", notice_id))
            .await?;
        log::info!("Deleted notice {}", notice_id);
        Ok(())
    }

    /// Everything `author_id` has posted, approved or not, newest first
    pub async fn my_notices(&self, author_id: &UserId) -> Result<Vec<Notice>> {
        decode_all(
            self.backend
                .list_rows(
                    &Query::table(collections::NOTICES)
                        .eq("author_id", author_id)
                        .order_by("created_at", false),
                )
                .await?,
        )
    }

    /// Notices waiting for moderation, newest first
    pub async fn pending_notices(&self) -> Result<Vec<Notice>> {
        decode_all(
            self.backend
                .list_rows(
                    &Query::table(collections::NOTICES)
                        .eq("is_approved", false)
                        .order_by("created_at", false),
                )
                .await?,
        )
    }

    /// Approve a notice, or withdraw an approval
    pub async fn approve_notice(&self, notice_id: &NoticeId, approve: bool) -> Result<Notice> {
        let notice = self
            .update_one(
                notice_id,
                json!({ "is_approved": approve, "updated_at": Utc::now() }),
            )
            .await?;
        log::info!("Notice {} approved: {}", notice_id, approve);
        Ok(notice)
    }

    pub async fn pin_notice(&self, notice_id: &NoticeId, pin: bool) -> Result<Notice> {
        self.update_one(
            notice_id,
            json!({ "is_pinned": pin, "updated_at": Utc::now() }),
        )
        .await
    }

    async fn update_one(&self, notice_id: &NoticeId, changes: Value) -> Result<Notice> {
        let rows = self
            .backend
            .update_rows(
                &Query::table(collections::NOTICES).eq("id", notice_id),
                changes,
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Notice {}", notice_id)))?;
        decode(row)
    }
}

fn require_text(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ClientError::Validation(format!("{} is required", what)));
    }
    Ok(())
}
