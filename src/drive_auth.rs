//! Google Drive credentials.
//!
//! Drive requests carry an OAuth bearer token. It is either handed over as
//! is (`GOOGLE_DRIVE_ACCESS_TOKEN`) or minted from a service-account key
//! file (`drive.credentials_path`) through the JWT-bearer grant:
//!
//! 1. Sign an RS256 assertion with the key's `private_key`, issued by
//!    `client_email` for the `drive.readonly` scope.
//! 2. POST it to the key's `token_uri`.
//! 3. Cache the returned access token until shortly before it expires.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

use crate::error::{IngestError, Result};

/// Scope requested for service-account tokens.
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Lifetime requested for each signed assertion. Google caps it at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// A cached token is refreshed this long before it expires.
const REFRESH_MARGIN_SECS: i64 = 60;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Fields of a service-account key file used for the JWT-bearer grant.
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
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read drive credentials {}: {}", path.display(), e)
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            anyhow::anyhow!("Invalid service account key {}: {}", path.display(), e)
        })
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Mints and caches access tokens for one service account.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey) -> anyhow::Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid private_key for {}: {}", key.client_email, e))?;
        Ok(Self {
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Return a valid access token, exchanging a fresh assertion when the
    /// cached one is missing or about to expire.
    pub async fn access_token(&self, client: &reqwest::Client) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        let assertion = self.assertion(now)?;
        let response = client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| IngestError::Source(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Source(format!(
                "token endpoint error {}: {}",
                status, body
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IngestError::Source(format!("invalid token response: {}", e)))?;

        tracing::debug!(
            account = %self.key.client_email,
            expires_in = token.expires_in,
            "minted drive access token"
        );
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        });
        Ok(access_token)
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: DRIVE_READONLY_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| IngestError::Source(format!("failed to sign assertion: {}", e)))
    }
}

/// How a Drive request is authorized.
pub enum DriveAuth {
    /// A bearer token used as is.
    Static(String),
    ServiceAccount(ServiceAccountAuth),
}

impl DriveAuth {
    pub async fn bearer(&self, client: &reqwest::Client) -> Result<String> {
        match self {
            DriveAuth::Static(token) => Ok(token.clone()),
            DriveAuth::ServiceAccount(auth) => auth.access_token(client).await,
        }
    }
}
