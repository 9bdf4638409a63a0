/// Error types for the UniMesh client.
/// Every backend call returns a `Result` carrying one of these variants; callers
/// render `ClientError::user_message` as an inline banner.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Fetch or connect failure, timeouts included
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid credentials, unconfirmed account, expired session, paused project
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Client-side input checks
    #[error("Validation error: {0}")]
    Validation(String),

    /// Single-row lookup matched nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint rejected an insert
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Any other rejection reported by the backend
    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    /// Fixed human-readable string for inline display.
    pub fn user_message(&self) -> &'static str {
        match self {
            ClientError::Network(_) => {
                "Cannot reach the server. Please check your connection and try again."
            }
            ClientError::Auth(msg) if msg.contains("paused") => {
                "Cannot connect to authentication service. The backend project may be paused or inactive."
            }
            ClientError::Auth(msg) if msg.contains("not confirmed") => {
                "Please check your email and confirm your account before signing in."
            }
            ClientError::Auth(msg) if msg.contains("Invalid login credentials") => {
                "Invalid email or password. Please check your credentials and try again."
            }
            ClientError::Auth(_) => "Your session is no longer valid. Please sign in again.",
            ClientError::Validation(_) => "Some fields are invalid. Please review them and try again.",
            ClientError::NotFound(_) => "The requested item could not be found.",
            ClientError::AlreadyExists(_) => "That already exists.",
            ClientError::Subscription(_) => "Live updates are unavailable. Reopen the conversation to retry.",
            ClientError::Backend { .. }
            | ClientError::Json(_)
            | ClientError::Url(_) => "Something went wrong. Please try again.",
            ClientError::Storage(_) | ClientError::Db(_) | ClientError::Io(_) => {
                "Failed to access local data. Please try again."
            }
            ClientError::Config(_) => "The client is misconfigured.",
            ClientError::State(_) => "That action is not available right now.",
        }
    }

    /// True for the "no row matched" sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Backend {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: format!("Malformed response body: {}", err),
            }
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Subscription(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
