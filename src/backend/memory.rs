/// In-process backend.
/// Rows live in memory, filters are evaluated locally and inserts are fanned
/// out to matching subscriptions. Implements both `Backend` and `AuthApi`;
/// used by the test suite and the offline demo mode of the binary.

use super::{AuthApi, Backend, Filter, PushEvent, Query, Row, Subscription, SubscriptionHandle};
use crate::error::{ClientError, Result};
use crate::models::{collections, SignUpProfile, UserId};
use crate::session::{validate_credentials, AuthUser, Session, SignUpOutcome};
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Column pairs that must be unique per collection
const UNIQUE_KEYS: &[(&str, &[&str])] = &[
    (collections::PARTICIPANTS, &["conversation_id", "user_id"]),
    (collections::ATTENDEES, &["event_id", "user_id"]),
    (collections::MEMBERSHIPS, &["organization_id", "user_id"]),
    (collections::SKILLS, &["user_id", "skill_name"]),
    (collections::INTERESTS, &["user_id", "interest_name"]),
];

/// (child collection, column, parent collection): rows that must reference
/// an existing parent and are removed with it
const FOREIGN_KEYS: &[(&str, &str, &str)] = &[
    (collections::PARTICIPANTS, "conversation_id", collections::CONVERSATIONS),
    (collections::MESSAGES, "conversation_id", collections::CONVERSATIONS),
    (collections::ATTENDEES, "event_id", collections::EVENTS),
    (collections::MEMBERSHIPS, "organization_id", collections::ORGANIZATIONS),
    (collections::JOIN_REQUESTS, "organization_id", collections::ORGANIZATIONS),
];

struct Subscriber {
    collection: String,
    filter: Filter,
    topic: String,
    events: mpsc::UnboundedSender<PushEvent>,
    leave: oneshot::Receiver<()>,
}

impl Subscriber {
    fn is_live(&mut self) -> bool {
        !self.events.is_closed()
            && matches!(self.leave.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }
}

struct Account {
    id: UserId,
    password: String,
    confirmed: bool,
    created_at: String,
}

struct Inner {
    tables: HashMap<String, Vec<Row>>,
    subscribers: Vec<Subscriber>,
    files: HashMap<String, Vec<u8>>,
    accounts: HashMap<String, Account>,
    /// access token -> (email, refresh token)
    sessions: HashMap<String, (String, String)>,
    offline: bool,
    /// collections whose next read fails once
    failing_reads: HashSet<String>,
    reads: HashMap<String, usize>,
    require_confirmation: bool,
    next_topic: u64,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn key_matches(a: &Row, b: &Row, columns: &[&str]) -> bool {
    columns
        .iter()
        .all(|c| a.get(*c).is_some() && a.get(*c) == b.get(*c))
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            inner: Mutex::new(Inner {
                tables: HashMap::new(),
                subscribers: Vec::new(),
                files: HashMap::new(),
                accounts: HashMap::new(),
                sessions: HashMap::new(),
                offline: false,
                failing_reads: HashSet::new(),
                reads: HashMap::new(),
                require_confirmation: false,
                next_topic: 1,
            }),
        }
    }

    /// New accounts must confirm their email before signing in
    pub fn with_email_confirmation(self) -> Self {
        self.lock().require_confirmation = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(inner: &Inner) -> Result<()> {
        if inner.offline {
            return Err(ClientError::Network("Backend unreachable".to_string()));
        }
        Ok(())
    }

    /// Simulate losing (or regaining) the connection
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make the next `list_rows` on `collection` fail with a network error
    pub fn fail_next_read(&self, collection: &str) {
        self.lock().failing_reads.insert(collection.to_string());
    }

    /// Number of `list_rows` calls made against `collection`
    pub fn read_count(&self, collection: &str) -> usize {
        self.lock().reads.get(collection).copied().unwrap_or(0)
    }

    /// Store rows verbatim, without constraint checks or fan-out
    pub fn seed(&self, collection: &str, rows: Vec<Row>) {
        self.lock()
            .tables
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
    }

    /// Snapshot of a collection in insertion order
    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Deliver a push event for `row` without storing it
    pub fn broadcast(&self, collection: &str, row: Row) {
        let mut inner = self.lock();
        Self::fan_out(&mut inner, collection, &row);
    }

    /// Live subscriptions on a collection
    pub fn active_subscriptions(&self, collection: &str) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain_mut(Subscriber::is_live);
        inner
            .subscribers
            .iter()
            .filter(|s| s.collection == collection)
            .count()
    }

    /// Close every subscription on a collection with an error
    pub fn fail_subscriptions(&self, collection: &str, reason: &str) {
        let mut inner = self.lock();
        let (failed, kept): (Vec<Subscriber>, Vec<Subscriber>) = inner
            .subscribers
            .drain(..)
            .partition(|s| s.collection == collection);
        inner.subscribers = kept;
        for sub in failed {
            log::debug!("Failing subscription {}", sub.topic);
            let _ = sub.events.send(PushEvent::Error(reason.to_string()));
        }
    }

    /// Contents of an uploaded file
    pub fn file(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&format!("{}/{}", bucket, path)).cloned()
    }

    /// Create a confirmed account and its profile row
    pub fn register_user(&self, email: &str, password: &str, full_name: &str) -> UserId {
        let mut inner = self.lock();
        let id = UserId::new();
        let created_at = now_stamp();
        inner.accounts.insert(
            email.to_string(),
            Account {
                id: id.clone(),
                password: password.to_string(),
                confirmed: true,
                created_at: created_at.clone(),
            },
        );
        inner
            .tables
            .entry(collections::PROFILES.to_string())
            .or_default()
            .push(json!({
                "id": id,
                "email": email,
                "full_name": full_name,
                "is_active": true,
                "is_online": false,
                "created_at": created_at,
            }));
        id
    }

    pub fn confirm_email(&self, email: &str) {
        if let Some(account) = self.lock().accounts.get_mut(email) {
            account.confirmed = true;
        }
    }

    fn fan_out(inner: &mut Inner, collection: &str, row: &Row) {
        inner.subscribers.retain_mut(Subscriber::is_live);
        for sub in inner
            .subscribers
            .iter()
            .filter(|s| s.collection == collection && s.filter.matches(row))
        {
            let _ = sub.events.send(PushEvent::Insert(row.clone()));
        }
    }

    fn check_constraints(inner: &Inner, collection: &str, row: &Row, pending: &[Row]) -> Result<()> {
        let existing = inner.tables.get(collection);
        let stored = existing.into_iter().flatten().chain(pending.iter());

        for other in stored {
            if other.get("id") == row.get("id") {
                return Err(ClientError::AlreadyExists(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    collection
                )));
            }
            for (table, columns) in UNIQUE_KEYS {
                if *table == collection && key_matches(other, row, columns) {
                    return Err(ClientError::AlreadyExists(format!(
                        "duplicate key value violates unique constraint on {}({})",
                        collection,
                        columns.join(", ")
                    )));
                }
            }
        }

        for (child, column, parent) in FOREIGN_KEYS {
            if *child != collection {
                continue;
            }
            let Some(reference) = row.get(*column) else {
                continue;
            };
            let found = inner
                .tables
                .get(*parent)
                .map(|rows| rows.iter().any(|p| p.get("id") == Some(reference)))
                .unwrap_or(false);
            if !found {
                return Err(ClientError::Backend {
                    status: 409,
                    message: format!(
                        "insert or update on table \"{}\" violates foreign key constraint on {}",
                        collection, column
                    ),
                });
            }
        }
        Ok(())
    }

    fn require_filters(query: &Query, action: &str) -> Result<()> {
        if query.filters.is_empty() {
            return Err(ClientError::Validation(format!(
                "Refusing to {} every row of {}",
                action, query.collection
            )));
        }
        Ok(())
    }

    /// Remove matching rows and, recursively, the rows that reference them
    fn remove_cascading(inner: &mut Inner, collection: &str, matches: &dyn Fn(&Row) -> bool) {
        let removed: Vec<Row> = match inner.tables.get_mut(collection) {
            Some(rows) => {
                let (gone, kept): (Vec<Row>, Vec<Row>) = rows.drain(..).partition(|r| matches(r));
                *rows = kept;
                gone
            }
            None => return,
        };
        let ids: Vec<Value> = removed.iter().filter_map(|r| r.get("id").cloned()).collect();
        if ids.is_empty() {
            return;
        }
        for (child, column, parent) in FOREIGN_KEYS {
            if *parent == collection {
                let ids = ids.clone();
                Self::remove_cascading(inner, child, &move |r: &Row| {
                    r.get(*column).map(|v| ids.contains(v)).unwrap_or(false)
                });
            }
        }
    }

    fn issue_session(inner: &mut Inner, email: &str, id: &UserId) -> Session {
        let access_token = format!("mem-access-{}", Uuid::new_v4());
        let refresh_token = format!("mem-refresh-{}", Uuid::new_v4());
        inner
            .sessions
            .insert(access_token.clone(), (email.to_string(), refresh_token.clone()));
        Session {
            user_id: id.clone(),
            email: email.to_string(),
            access_token,
            refresh_token,
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_rows(&self, query: &Query) -> Result<Vec<Row>> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        *inner.reads.entry(query.collection.clone()).or_insert(0) += 1;
        if inner.failing_reads.remove(&query.collection) {
            return Err(ClientError::Network(format!(
                "Read of {} dropped",
                query.collection
            )));
        }
        let rows = inner.tables.get(&query.collection);
        Ok(query.apply(rows.into_iter().flatten()))
    }

    async fn insert_rows(&self, collection: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;

        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(mut fields) = row else {
                return Err(ClientError::Validation(format!(
                    "Rows inserted into {} must be objects",
                    collection
                )));
            };
            if fields.get("id").map_or(true, Value::is_null) {
                fields.insert("id".to_string(), json!(Uuid::new_v4().to_string()));
            }
            if fields.get("created_at").map_or(true, Value::is_null) {
                fields.insert("created_at".to_string(), json!(now_stamp()));
            }
            let row = Value::Object(fields);
            Self::check_constraints(&inner, collection, &row, &prepared)?;
            prepared.push(row);
        }

        inner
            .tables
            .entry(collection.to_string())
            .or_default()
            .extend(prepared.iter().cloned());
        for row in &prepared {
            Self::fan_out(&mut inner, collection, row);
        }
        Ok(prepared)
    }

    async fn update_rows(&self, query: &Query, changes: Row) -> Result<Vec<Row>> {
        Self::require_filters(query, "update")?;
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        let Value::Object(changes) = changes else {
            return Err(ClientError::Validation("Update payload must be an object".to_string()));
        };

        let mut updated = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&query.collection) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                if let Value::Object(fields) = row {
                    for (k, v) in &changes {
                        fields.insert(k.clone(), v.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete_rows(&self, query: &Query) -> Result<()> {
        Self::require_filters(query, "delete")?;
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        Self::remove_cascading(&mut inner, &query.collection, &|r: &Row| query.matches(r));
        Ok(())
    }

    async fn subscribe(&self, collection: &str, filter: &Filter) -> Result<Subscription> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        if filter.to_realtime().is_none() {
            return Err(ClientError::Subscription(format!(
                "Filter {:?} cannot be used on a realtime channel",
                filter
            )));
        }

        let topic = format!("realtime:{}:{}", collection, inner.next_topic);
        inner.next_topic += 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (leave_tx, leave_rx) = oneshot::channel();
        inner.subscribers.push(Subscriber {
            collection: collection.to_string(),
            filter: filter.clone(),
            topic: topic.clone(),
            events: events_tx,
            leave: leave_rx,
        });
        log::debug!("Memory subscription {} opened", topic);
        Ok(Subscription::new(SubscriptionHandle::new(topic, leave_tx), events_rx))
    }

    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        upsert: bool,
    ) -> Result<String> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        let key = format!("{}/{}", bucket, path);
        if !upsert && inner.files.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("The resource {} already exists", key)));
        }
        inner.files.insert(key, bytes);
        Ok(format!("memory://{}/{}", bucket, path))
    }
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: &SignUpProfile,
    ) -> Result<SignUpOutcome> {
        validate_credentials(email, password)?;
        let email = email.trim();
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        if inner.accounts.contains_key(email) {
            return Err(ClientError::Auth("User already registered".to_string()));
        }

        let id = UserId::new();
        let created_at = now_stamp();
        let confirmed = !inner.require_confirmation;
        inner.accounts.insert(
            email.to_string(),
            Account {
                id: id.clone(),
                password: password.to_string(),
                confirmed,
                created_at: created_at.clone(),
            },
        );
        // Mirrors the server-side trigger that creates the profile row
        inner
            .tables
            .entry(collections::PROFILES.to_string())
            .or_default()
            .push(json!({
                "id": id,
                "email": email,
                "full_name": profile.full_name,
                "university": profile.university,
                "is_active": true,
                "is_online": false,
                "created_at": created_at,
            }));

        if confirmed {
            Ok(SignUpOutcome::SignedIn(Self::issue_session(&mut inner, email, &id)))
        } else {
            Ok(SignUpOutcome::ConfirmationRequired { user_id: id })
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        validate_credentials(email, password)?;
        let email = email.trim();
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        let (id, confirmed) = match inner.accounts.get(email) {
            Some(account) if account.password == password => (account.id.clone(), account.confirmed),
            _ => return Err(ClientError::Auth("Invalid login credentials".to_string())),
        };
        if !confirmed {
            return Err(ClientError::Auth("Email not confirmed".to_string()));
        }
        Ok(Self::issue_session(&mut inner, email, &id))
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        inner.sessions.remove(&session.access_token);
        Ok(())
    }

    async fn get_user(&self, session: &Session) -> Result<AuthUser> {
        let inner = self.lock();
        Self::check_online(&inner)?;
        let (email, _) = inner
            .sessions
            .get(&session.access_token)
            .ok_or_else(|| ClientError::Auth("Invalid or expired session".to_string()))?;
        let account = inner
            .accounts
            .get(email)
            .ok_or_else(|| ClientError::Auth("User not found".to_string()))?;
        Ok(AuthUser {
            id: account.id.clone(),
            email: Some(email.clone()),
            email_confirmed_at: None,
            created_at: account.created_at.parse().ok(),
        })
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        let token = inner
            .sessions
            .iter()
            .find(|(_, (_, refresh))| *refresh == session.refresh_token)
            .map(|(access, (email, _))| (access.clone(), email.clone()));
        let Some((old_access, email)) = token else {
            return Err(ClientError::Auth("Invalid Refresh Token".to_string()));
        };
        inner.sessions.remove(&old_access);
        let id = inner
            .accounts
            .get(&email)
            .map(|a| a.id.clone())
            .ok_or_else(|| ClientError::Auth("User not found".to_string()))?;
        Ok(Self::issue_session(&mut inner, &email, &id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(backend: &MemoryBackend, id: &str) {
        backend.seed(
            collections::CONVERSATIONS,
            vec![json!({ "id": id, "is_group": false, "created_at": now_stamp() })],
        );
    }

    #[tokio::test]
    async fn test_insert_fills_id_and_timestamp() {
        let backend = MemoryBackend::new();
        conversation(&backend, "c1");
        let row = backend
            .insert_row(
                collections::MESSAGES,
                json!({ "conversation_id": "c1", "sender_id": "u1", "content": "hi" }),
            )
            .await
            .unwrap();
        assert!(row["id"].is_string());
        assert!(row["created_at"].is_string());
        assert_eq!(backend.rows(collections::MESSAGES).len(), 1);
    }

    #[tokio::test]
    async fn test_message_requires_existing_conversation() {
        let backend = MemoryBackend::new();
        let err = backend
            .insert_row(collections::MESSAGES, json!({ "conversation_id": "nope" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Backend { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_unique_membership() {
        let backend = MemoryBackend::new();
        backend.seed(collections::ORGANIZATIONS, vec![json!({ "id": "o1", "name": "Chess" })]);
        let member = json!({ "organization_id": "o1", "user_id": "u1", "role": "member" });
        backend.insert_row(collections::MEMBERSHIPS, member.clone()).await.unwrap();
        let err = backend.insert_row(collections::MEMBERSHIPS, member).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_children() {
        let backend = MemoryBackend::new();
        backend.seed(collections::ORGANIZATIONS, vec![json!({ "id": "o1", "name": "Chess" })]);
        backend
            .insert_row(collections::MEMBERSHIPS, json!({ "organization_id": "o1", "user_id": "u1" }))
            .await
            .unwrap();
        backend
            .delete_rows(&Query::table(collections::ORGANIZATIONS).eq("id", "o1"))
            .await
            .unwrap();
        assert!(backend.rows(collections::MEMBERSHIPS).is_empty());
    }

    #[tokio::test]
    async fn test_delete_without_filter_is_refused() {
        let backend = MemoryBackend::new();
        let err = backend
            .delete_rows(&Query::table(collections::MESSAGES))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn test_insert_reaches_matching_subscriber_only() {
        let backend = MemoryBackend::new();
        conversation(&backend, "c1");
        conversation(&backend, "c2");
        let mut sub = backend
            .subscribe(collections::MESSAGES, &Filter::eq("conversation_id", "c1"))
            .await
            .unwrap();

        backend
            .insert_row(collections::MESSAGES, json!({ "conversation_id": "c2", "content": "other" }))
            .await
            .unwrap();
        backend
            .insert_row(collections::MESSAGES, json!({ "conversation_id": "c1", "content": "mine" }))
            .await
            .unwrap();

        match sub.next().await {
            Some(PushEvent::Insert(row)) => assert_eq!(row["content"], "mine"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_prunes_subscriber() {
        let backend = MemoryBackend::new();
        let sub = backend
            .subscribe(collections::MESSAGES, &Filter::eq("conversation_id", "c1"))
            .await
            .unwrap();
        assert_eq!(backend.active_subscriptions(collections::MESSAGES), 1);
        sub.unsubscribe();
        assert_eq!(backend.active_subscriptions(collections::MESSAGES), 0);
    }

    #[tokio::test]
    async fn test_offline_calls_fail_with_network_error() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        let err = backend
            .list_rows(&Query::table(collections::PROFILES))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
    }

    #[tokio::test]
    async fn test_failed_read_is_one_shot() {
        let backend = MemoryBackend::new();
        backend.fail_next_read(collections::MESSAGES);
        let query = Query::table(collections::MESSAGES);
        tokio_test::assert_err!(backend.list_rows(&query).await);
        tokio_test::assert_ok!(backend.list_rows(&query).await);
    }

    #[tokio::test]
    async fn test_sign_up_and_sign_in() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .sign_up(
                "ada@uni.edu",
                "secret1",
                &SignUpProfile {
                    full_name: "Ada".to_string(),
                    university: "MIT".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SignUpOutcome::SignedIn(_)));
        assert_eq!(backend.rows(collections::PROFILES).len(), 1);

        let err = backend.sign_in("ada@uni.edu", "wrong-pass").await.unwrap_err();
        assert!(matches!(err, ClientError::Auth(ref m) if m == "Invalid login credentials"));

        let session = backend.sign_in("ada@uni.edu", "secret1").await.unwrap();
        let user = backend.get_user(&session).await.unwrap();
        assert_eq!(user.id, session.user_id);

        let refreshed = backend.refresh(&session).await.unwrap();
        tokio_test::assert_err!(backend.get_user(&session).await);
        tokio_test::assert_ok!(backend.get_user(&refreshed).await);
    }

    #[tokio::test]
    async fn test_unconfirmed_account_cannot_sign_in() {
        let backend = MemoryBackend::new().with_email_confirmation();
        let outcome = backend
            .sign_up("grace@uni.edu", "secret1", &SignUpProfile::default())
            .await
            .unwrap();
        assert!(matches!(outcome, SignUpOutcome::ConfirmationRequired { .. }));
        let err = backend.sign_in("grace@uni.edu", "secret1").await.unwrap_err();
        assert!(err.user_message().contains("confirm"));

        backend.confirm_email("grace@uni.edu");
        tokio_test::assert_ok!(backend.sign_in("grace@uni.edu", "secret1").await);
    }
}
