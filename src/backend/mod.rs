/// Backend access layer.
/// The `Backend` trait covers rows, push subscriptions and file storage;
/// `AuthApi` covers accounts and sessions. `RestBackend`/`RestAuth` talk to
/// the hosted service, `MemoryBackend` keeps everything in process.

pub mod auth;
pub mod memory;
pub mod query;
pub mod realtime;
pub mod rest;

pub use auth::RestAuth;
pub use memory::MemoryBackend;
pub use query::{Filter, Order, Query};
pub use realtime::RealtimeClient;
pub use rest::RestBackend;

use crate::error::{ClientError, Result};
use crate::session::{AuthUser, Session, SignUpOutcome};
use crate::models::SignUpProfile;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

/// A backend row as returned on the wire
pub type Row = serde_json::Value;

/// Event delivered on a push subscription
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A row was inserted that matches the subscription filter
    Insert(Row),
    /// The channel failed or was closed by the server; no further events follow
    Error(String),
}

/// Owned handle that tears a subscription down
#[derive(Debug)]
pub struct SubscriptionHandle {
    topic: String,
    leave: Option<oneshot::Sender<()>>,
}

impl SubscriptionHandle {
    pub fn new(topic: String, leave: oneshot::Sender<()>) -> Self {
        SubscriptionHandle {
            topic,
            leave: Some(leave),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Leave the channel. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(leave) = self.leave.take() {
            let _ = leave.send(());
            log::debug!("Left channel {}", self.topic);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// An open push subscription: a teardown handle plus the event stream
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    events: mpsc::UnboundedReceiver<PushEvent>,
}

impl Subscription {
    pub fn new(handle: SubscriptionHandle, events: mpsc::UnboundedReceiver<PushEvent>) -> Self {
        Subscription { handle, events }
    }

    pub fn topic(&self) -> &str {
        self.handle.topic()
    }

    /// Next event, or `None` once the channel is gone
    pub async fn next(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    pub fn into_parts(self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<PushEvent>) {
        (self.handle, self.events)
    }

    pub fn unsubscribe(mut self) {
        self.handle.unsubscribe();
    }
}

/// Row, subscription and storage operations
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_rows(&self, query: &Query) -> Result<Vec<Row>>;

    /// Insert rows and return them as stored (ids and timestamps filled in)
    async fn insert_rows(&self, collection: &str, rows: Vec<Row>) -> Result<Vec<Row>>;

    /// Apply `changes` to every row matched by `query`; returns the updated rows
    async fn update_rows(&self, query: &Query, changes: Row) -> Result<Vec<Row>>;

    async fn delete_rows(&self, query: &Query) -> Result<()>;

    /// Open a push subscription for inserts into `collection` matching `filter`.
    /// Resolves once the backend has confirmed the channel.
    async fn subscribe(&self, collection: &str, filter: &Filter) -> Result<Subscription>;

    /// Store a file and return its public URL
    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        upsert: bool,
    ) -> Result<String>;

    async fn insert_row(&self, collection: &str, row: Row) -> Result<Row> {
        self.insert_rows(collection, vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Backend {
                status: 0,
                message: format!("Insert into {} returned no row", collection),
            })
    }

    /// At most one row; zero rows is `Ok(None)`
    async fn maybe_single(&self, query: &Query) -> Result<Option<Row>> {
        let query = query.clone().limit(1);
        Ok(self.list_rows(&query).await?.into_iter().next())
    }

    /// Exactly one row; zero rows is `NotFound`
    async fn single(&self, query: &Query) -> Result<Row> {
        self.maybe_single(query)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("No row in {}", query.collection)))
    }
}

/// Account and session operations
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: &SignUpProfile,
    ) -> Result<SignUpOutcome>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_out(&self, session: &Session) -> Result<()>;

    async fn get_user(&self, session: &Session) -> Result<AuthUser>;

    async fn refresh(&self, session: &Session) -> Result<Session>;

    /// Refresh the session if it is close to expiry, otherwise return it as is
    async fn ensure_fresh(&self, session: Session) -> Result<Session> {
        if session.is_expired() {
            log::debug!("Refreshing session for {}", session.user_id);
            self.refresh(&session).await
        } else {
            Ok(session)
        }
    }
}

/// Deserialize one row into a typed record
pub fn decode<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(row)?)
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

/// Serialize a typed payload into a row
pub fn encode<T: Serialize>(value: &T) -> Result<Row> {
    Ok(serde_json::to_value(value)?)
}
