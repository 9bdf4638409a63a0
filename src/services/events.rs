/// Campus events and RSVPs.

use crate::backend::{decode, decode_all, encode, Backend, Filter, Query};
use crate::error::{ClientError, Result};
use crate::models::{
    buckets, collections, file_extension, Attendance, Event, EventDetails, EventFilters, EventId,
    EventUpdate, MyEventsKind, NewEvent, Profile, UserId,
};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct EventService {
    backend: Arc<dyn Backend>,
}

impl EventService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        EventService { backend }
    }

    /// Upcoming public events, soonest first
    pub async fn list_events(&self, filters: &EventFilters) -> Result<Vec<Event>> {
        let mut query = Query::table(collections::EVENTS)
            .eq("is_public", true)
            .gte(
                "start_date",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .order_by("start_date", true)
            .limit(filters.limit);
        if let Some(event_type) = &filters.event_type {
            query = query.eq("event_type", event_type.as_str());
        }
        if let Some(location) = &filters.location {
            query = query.contains("location", location);
        }
        if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.any(vec![
                Filter::contains("title", search),
                Filter::contains("description", search),
                Filter::contains("location", search),
            ]);
        }
        decode_all(self.backend.list_rows(&query).await?)
    }

    /// Event with its organizer profile and attendees
    pub async fn get_event(&self, event_id: &EventId) -> Result<EventDetails> {
        let event: Event = decode(
            self.backend
                .single(&Query::table(collections::EVENTS).eq("id", event_id))
                .await?,
        )?;
        let organizer_query = Query::table(collections::PROFILES).eq("id", &event.organizer_id);
        let attendees_query = Query::table(collections::ATTENDEES)
            .eq("event_id", event_id)
            .order_by("created_at", true);
        let (organizer, attendees) = futures::try_join!(
            self.backend.maybe_single(&organizer_query),
            self.backend.list_rows(&attendees_query),
        )?;

        Ok(EventDetails {
            organizer: organizer.map(decode::<Profile>).transpose()?,
            attendees: decode_all(attendees)?,
            event,
        })
    }

    pub async fn create_event(&self, new: &NewEvent) -> Result<Event> {
        if new.title.trim().is_empty() {
            return Err(ClientError::Validation("Event title is required".to_string()));
        }
        if let Some(end) = new.end_date {
            if end <= new.start_date {
                return Err(ClientError::Validation(
                    "Event must end after it starts".to_string(),
                ));
            }
        }
        if new.max_attendees == Some(0) {
            return Err(ClientError::Validation(
                "Capacity must be at least one".to_string(),
            ));
        }
        let event: Event = decode(
            self.backend
                .insert_row(collections::EVENTS, encode(new)?)
                .await?,
        )?;
        log::info!("Created event {} ({})", event.id, event.title);
        Ok(event)
    }

    pub async fn update_event(&self, event_id: &EventId, update: &EventUpdate) -> Result<Event> {
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(ClientError::Validation("Event title is required".to_string()));
            }
        }
        if let (Some(start), Some(end)) = (update.start_date, update.end_date) {
            if end <= start {
                return Err(ClientError::Validation(
                    "Event must end after it starts".to_string(),
                ));
            }
        }
        let rows = self
            .backend
            .update_rows(
                &Query::table(collections::EVENTS).eq("id", event_id),
                encode(update)?,
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NotFound(format!("Event {}", event_id)))?;
        decode(row)
    }

    pub async fn delete_event(&self, event_id: &EventId) -> Result<()> {
        self.backend
            .delete_rows(&Query::table(collections::EVENTS).eq("id", event_id))
            .await?;
        log::info!("Deleted event {}", event_id);
        Ok(())
    }

    /// RSVP to an event. Full events and repeat RSVPs are rejected.
    pub async fn join_event(&self, event_id: &EventId, user_id: &UserId) -> Result<Attendance> {
        let details = self.get_event(event_id).await?;
        if details.attendees.iter().any(|a| &a.user_id == user_id) {
            return Err(ClientError::AlreadyExists(
                "You are already attending this event".to_string(),
            ));
        }
        if details.is_full() {
            return Err(ClientError::Validation("This event is full".to_string()));
        }
        decode(
            self.backend
                .insert_row(
                    collections::ATTENDEES,
                    json!({ "event_id": event_id, "user_id": user_id }),
                )
                .await?,
        )
    }

    pub async fn leave_event(&self, event_id: &EventId, user_id: &UserId) -> Result<()> {
        self.backend
            .delete_rows(
                &Query::table(collections::ATTENDEES)
                    .eq("event_id", event_id)
                    .eq("user_id", user_id),
            )
            .await
    }

    pub async fn check_attendance(&self, event_id: &EventId, user_id: &UserId) -> Result<Option<Attendance>> {
        self.backend
            .maybe_single(
                &Query::table(collections::ATTENDEES)
                    .eq("event_id", event_id)
                    .eq("user_id", user_id),
            )
            .await?
            .map(decode)
            .transpose()
    }

    /// Attendance of `user_id` for each of `event_ids`, in one query
    pub async fn attendance_for_events(
        &self,
        event_ids: &[EventId],
        user_id: &UserId,
    ) -> Result<HashMap<EventId, Attendance>> {
        if event_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self
            .backend
            .list_rows(
                &Query::table(collections::ATTENDEES)
                    .eq("user_id", user_id)
                    .is_in("event_id", event_ids),
            )
            .await?;
        Ok(decode_all::<Attendance>(rows)?
            .into_iter()
            .map(|a| (a.event_id.clone(), a))
            .collect())
    }

    pub async fn my_events(&self, user_id: &UserId, kind: MyEventsKind) -> Result<Vec<Event>> {
        let query = match kind {
            MyEventsKind::Organizing => Query::table(collections::EVENTS).eq("organizer_id", user_id),
            MyEventsKind::Attending => {
                let attendances: Vec<Attendance> = decode_all(
                    self.backend
                        .list_rows(&Query::table(collections::ATTENDEES).eq("user_id", user_id))
                        .await?,
                )?;
                if attendances.is_empty() {
                    return Ok(Vec::new());
                }
                Query::table(collections::EVENTS)
                    .is_in("id", attendances.iter().map(|a| &a.event_id))
            }
        };
        decode_all(
            self.backend
                .list_rows(&query.order_by("start_date", true))
                .await?,
        )
    }

    /// Upload the event's cover image and store its URL on the event
    pub async fn upload_event_image(&self, event_id: &EventId, file_name: &str, bytes: Vec<u8>) -> Result<Event> {
        if bytes.is_empty() {
            return Err(ClientError::Validation("Image is empty".to_string()));
        }
        let path = format!("{}/event-image.{}", event_id, file_extension(file_name));
        let url = self
            .backend
            .upload_file(buckets::EVENT_IMAGES, &path, bytes, true)
            .await?;
        self.update_event(
            event_id,
            &EventUpdate {
                image_url: Some(url),
                ..Default::default()
            },
        )
        .await
    }
}
