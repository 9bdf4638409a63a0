//! HTTP backend for the hosted row, storage and realtime APIs

use super::{Backend, Filter, Query, RealtimeClient, Row, Subscription};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::Session;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

/// Row API client. Requests carry the anon key and, once a session is
/// attached, the user's bearer token.
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
    realtime: Arc<RealtimeClient>,
}

/// Error body shapes returned by the row and storage APIs
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ErrorBody {
    pub(crate) fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    pub(crate) fn code(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub(crate) fn text(&self, fallback: &str) -> String {
        self.error_description
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.msg.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Build the HTTP client shared by the REST layers
pub(crate) fn http_client(config: &ClientConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Map a non-success response of the row API onto the error taxonomy
pub(crate) fn map_error(status: StatusCode, body: &str) -> ClientError {
    let parsed = ErrorBody::parse(body);
    let code = parsed.code();
    let message = parsed.text(body);

    match (status.as_u16(), code.as_deref()) {
        (_, Some("PGRST116")) | (404, _) | (406, _) => ClientError::NotFound(message),
        // Foreign key violations also arrive as 409
        (status, Some("23503")) => ClientError::Backend { status, message },
        (_, Some("23505")) | (409, _) => ClientError::AlreadyExists(message),
        (401, _) | (403, _) => ClientError::Auth(message),
        (540, _) => ClientError::Auth("Backend project is paused".to_string()),
        (status, _) => ClientError::Backend { status, message },
    }
}

impl RestBackend {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(RestBackend {
            client: http_client(config)?,
            base_url: config.base_url.clone(),
            anon_key: config.anon_key.clone(),
            access_token: None,
            realtime: Arc::new(RealtimeClient::new(config)?),
        })
    }

    /// Attach the signed-in user's token to every subsequent call
    pub fn with_session(mut self, session: &Session) -> Self {
        self.access_token = Some(session.access_token.clone());
        self
    }

    pub fn realtime(&self) -> &Arc<RealtimeClient> {
        &self.realtime
    }

    fn rest_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn read_rows(&self, response: Response) -> Result<Vec<Row>> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(map_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Row>(&body)? {
            Row::Array(rows) => Ok(rows),
            Row::Null => Ok(Vec::new()),
            single => Ok(vec![single]),
        }
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
}

#[async_trait]
impl Backend for RestBackend {
    async fn list_rows(&self, query: &Query) -> Result<Vec<Row>> {
        log::debug!("GET {} {:?}", query.collection, query.to_query_pairs());
        let response = self
            .authorize(self.client.get(self.rest_url(&query.collection)))
            .query(&query.to_query_pairs())
            .send()
            .await?;
        self.read_rows(response).await
    }

    async fn insert_rows(&self, collection: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .authorize(self.client.post(self.rest_url(collection)))
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await?;
        self.read_rows(response).await
    }

    async fn update_rows(&self, query: &Query, changes: Row) -> Result<Vec<Row>> {
        Self::require_filters(query, "update")?;
        let response = self
            .authorize(self.client.patch(self.rest_url(&query.collection)))
            .header("Prefer", "return=representation")
            .query(&query.filter_pairs())
            .json(&changes)
            .send()
            .await?;
        self.read_rows(response).await
    }

    async fn delete_rows(&self, query: &Query) -> Result<()> {
        Self::require_filters(query, "delete")?;
        let response = self
            .authorize(self.client.delete(self.rest_url(&query.collection)))
            .query(&query.filter_pairs())
            .send()
            .await?;
        self.read_rows(response).await.map(|_| ())
    }

    async fn subscribe(&self, collection: &str, filter: &Filter) -> Result<Subscription> {
        self.realtime
            .subscribe(collection, filter, self.access_token.as_deref())
            .await
    }

    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        upsert: bool,
    ) -> Result<String> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let response = self
            .authorize(self.client.post(&url))
            .header("x-upsert", if upsert { "true" } else { "false" })
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            let message = ErrorBody::parse(&body).text(&body);
            return Err(match status.as_u16() {
                401 | 403 => ClientError::Auth(message),
                409 => ClientError::AlreadyExists(message),
                _ => ClientError::Storage(format!("Upload to {} failed ({}): {}", bucket, status, message)),
            });
        }

        log::info!("Uploaded {}/{}", bucket, path);
        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        ))
    }
}
