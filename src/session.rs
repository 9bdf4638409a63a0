/// Authenticated session.
/// Returned by sign-in and passed explicitly to the backend and the client
/// facade; nothing holds it globally.

use crate::error::{ClientError, Result};
use crate::models::UserId;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Expired, or within 30 seconds of expiring
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at - Duration::seconds(30) <= Utc::now(),
            None => false,
        }
    }
}

/// Result of a sign-up: projects that require email confirmation return no
/// session until the address is confirmed.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    ConfirmationRequired { user_id: UserId },
}

/// Account as reported by the auth service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Read the `exp` claim of a JWT without verifying it
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Client-side checks run before any auth call
pub fn validate_credentials(email: &str, password: &str) -> Result<()> {
    let email = email.trim();
    let valid_email = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid_email {
        return Err(ClientError::Validation(format!("Invalid email address: {}", email)));
    }
    if password.chars().count() < 6 {
        return Err(ClientError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_exp(exp: i64) -> String {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = general_purpose::URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{}}}"#, exp));
        format!("{}.{}.signature", header, claims)
    }

    #[test]
    fn test_token_expiry_reads_exp_claim() {
        let token = jwt_with_exp(1_900_000_000);
        let exp = token_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_900_000_000);
        assert!(token_expiry("not-a-jwt").is_none());
    }

    #[test]
    fn test_session_expiry_with_skew() {
        let mut session = Session {
            user_id: UserId::from("u1"),
            email: "a@uni.edu".to_string(),
            access_token: "t".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(Utc::now() + Duration::seconds(10)),
        };
        assert!(session.is_expired());
        session.expires_at = Some(Utc::now() + Duration::hours(1));
        assert!(!session.is_expired());
        session.expires_at = None;
        assert!(!session.is_expired());
    }

    #[test]
    fn test_validate_credentials() {
        assert!(validate_credentials("ada@uni.edu", "secret1").is_ok());
        assert!(validate_credentials("ada", "secret1").is_err());
        assert!(validate_credentials("ada@uni", "secret1").is_err());
        assert!(matches!(
            validate_credentials("ada@uni.edu", "123"),
            Err(ClientError::Validation(_))
        ));
    }
}
