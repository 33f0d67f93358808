//! OAuth2 access tokens for the BigQuery API.
//!
//! Service accounts authenticate with a self-signed RS256 JWT that is
//! exchanged for a short-lived bearer token (the `jwt-bearer` grant). Tokens
//! are cached until shortly before they expire.

use std::path::Path;

use aula_core::{
    Error,
    error::{CryptoError, DependencyError},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// The fields of a Google service account key file that the token exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read credentials {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid service account key: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

enum Credentials {
    ServiceAccount {
        key: ServiceAccountKey,
        token_url: String,
    },
    Static(String),
}

/// Hands out bearer tokens for API calls.
pub struct TokenProvider {
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Exchange service account assertions at `token_url`, or the key's own
    /// `token_uri` when none is given.
    pub fn service_account(key: ServiceAccountKey, token_url: Option<String>) -> Self {
        let token_url = token_url.unwrap_or_else(|| key.token_uri.clone());
        Self {
            credentials: Credentials::ServiceAccount { key, token_url },
            cached: Mutex::new(None),
        }
    }

    /// Always use the same, externally obtained token.
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::Static(token.into()),
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self, client: &reqwest::Client) -> Result<String, Error> {
        let (key, token_url) = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount { key, token_url } => (key, token_url),
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(EXPIRY_MARGIN_SECONDS) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let fresh = exchange(client, key, token_url).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

fn sign_assertion(key: &ServiceAccountKey, audience: &str) -> Result<String, Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: SCOPE,
        aud: audience,
        iat: now,
        exp: now + 3600,
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| CryptoError::TokenSigning(format!("Invalid service account key: {e}")))?;

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| CryptoError::TokenSigning(e.to_string()).into())
}

async fn exchange(
    client: &reqwest::Client,
    key: &ServiceAccountKey,
    token_url: &str,
) -> Result<CachedToken, Error> {
    let assertion = sign_assertion(key, token_url)?;

    tracing::debug!(client_email = %key.client_email, "Requesting BigQuery access token");

    let response = client
        .post(token_url)
        .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Token exchange request failed");
            DependencyError::Http(format!("Token exchange failed: {e}"))
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, body = %body, "Token exchange rejected");
        return Err(DependencyError::Http(format!("Token exchange returned {status}")).into());
    }

    let token: TokenResponse = response.json().await.map_err(|e| {
        tracing::error!(error = %e, "Token response is not valid");
        DependencyError::Http(format!("Invalid token response: {e}"))
    })?;

    Ok(CachedToken {
        value: token.access_token,
        expires_at: Utc::now() + Duration::seconds(token.expires_in),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_token() {
        let provider = TokenProvider::fixed("abc");
        let token = provider
            .access_token(&reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(token, "abc");
    }

    #[test]
    fn test_key_defaults_token_uri() {
        let key = ServiceAccountKey::from_json(
            r#"{ "client_email": "sync@example.iam.gserviceaccount.com", "private_key": "x" }"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_invalid_key_is_a_config_error() {
        let err = ServiceAccountKey::from_json("{}").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bad_private_key_fails_signing() {
        let key = ServiceAccountKey {
            client_email: "sync@example.iam.gserviceaccount.com".to_string(),
            private_key: "not a pem".to_string(),
            token_uri: default_token_uri(),
        };
        let err = sign_assertion(&key, &key.token_uri).unwrap_err();
        assert!(err.is_crypto_error());
    }
}
