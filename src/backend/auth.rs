//! Auth API client (sign-up, password sign-in, refresh, sign-out)

use super::rest::{http_client, ErrorBody};
use super::AuthApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::models::SignUpProfile;
use crate::session::{token_expiry, validate_credentials, AuthUser, Session, SignUpOutcome};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

pub struct RestAuth {
    client: Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|at| Utc.timestamp_opt(at, 0).single())
            .or_else(|| self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)))
            .or_else(|| token_expiry(&self.access_token));
        Session {
            user_id: self.user.id,
            email: self.user.email.unwrap_or_default(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

/// Map a non-success auth response
fn map_auth_error(status: StatusCode, body: &str) -> ClientError {
    let message = ErrorBody::parse(body).text(body);
    match status.as_u16() {
        400 | 401 | 403 | 422 => ClientError::Auth(message),
        404 => ClientError::NotFound(message),
        540 => ClientError::Auth("Backend project is paused".to_string()),
        status => ClientError::Backend { status, message },
    }
}

impl RestAuth {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(RestAuth {
            client: http_client(config)?,
            base_url: config.base_url.clone(),
            anon_key: config.anon_key.clone(),
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    async fn read_json(response: Response) -> Result<serde_json::Value> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(map_auth_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let response = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let value = Self::read_json(response).await?;
        let token: TokenResponse = serde_json::from_value(value)?;
        Ok(token.into_session())
    }
}

#[async_trait]
impl AuthApi for RestAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: &SignUpProfile,
    ) -> Result<SignUpOutcome> {
        validate_credentials(email, password)?;
        let response = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&json!({
                "email": email.trim(),
                "password": password,
                "data": {
                    "full_name": profile.full_name,
                    "university": profile.university,
                    "role": "student",
                }
            }))
            .send()
            .await?;
        let value = Self::read_json(response).await?;

        if value.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(value)?;
            log::info!("Signed up {}", email);
            return Ok(SignUpOutcome::SignedIn(token.into_session()));
        }

        // Confirmation pending: the body is the user itself, or wraps it
        let user = value.get("user").cloned().unwrap_or(value);
        let user: AuthUser = serde_json::from_value(user)?;
        log::info!("Signed up {}; confirmation required", email);
        Ok(SignUpOutcome::ConfirmationRequired { user_id: user.id })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        validate_credentials(email, password)?;
        let session = self
            .token_grant(
                "password",
                json!({ "email": email.trim(), "password": password }),
            )
            .await?;
        log::info!("Signed in as {}", session.user_id);
        Ok(session)
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let response = self
            .client
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        match Self::read_json(response).await {
            Ok(_) => Ok(()),
            // The token already lapsed server-side; the session is gone either way
            Err(ClientError::Auth(msg)) | Err(ClientError::NotFound(msg)) => {
                log::debug!("Sign-out with stale token: {}", msg);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_user(&self, session: &Session) -> Result<AuthUser> {
        let response = self
            .client
            .get(self.auth_url("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        let value = Self::read_json(response).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        self.token_grant(
            "refresh_token",
            json!({ "refresh_token": session.refresh_token }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;

    #[test]
    fn test_map_auth_error() {
        let err = map_auth_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(
            err.user_message(),
            "Invalid email or password. Please check your credentials and try again."
        );

        let unconfirmed = map_auth_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Email not confirmed"}"#,
        );
        assert!(unconfirmed.user_message().contains("confirm your account"));

        let server = map_auth_error(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(matches!(server, ClientError::Backend { status: 500, .. }));
    }

    #[test]
    fn test_token_response_to_session() {
        let token: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_at": 1_900_000_000,
            "user": { "id": "u1", "email": "ada@uni.edu" }
        }))
        .unwrap();
        let session = token.into_session();
        assert_eq!(session.user_id, UserId::from("u1"));
        assert_eq!(session.email, "ada@uni.edu");
        assert_eq!(session.expires_at.unwrap().timestamp(), 1_900_000_000);
    }
}
