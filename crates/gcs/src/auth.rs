use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{GcsError, Result};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where access tokens come from.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// No `Authorization` header, for emulators and public buckets.
    Anonymous,
    /// A pre-minted OAuth2 access token.
    Token(String),
    /// The GCE/GKE/Cloud Run metadata server.
    MetadataServer,
}

impl Credentials {
    /// `STORAGE_EMULATOR_HOST` implies anonymous access, `GCS_ACCESS_TOKEN`
    /// supplies a fixed token, otherwise ask the metadata server.
    pub fn from_env() -> Self {
        if std::env::var_os("STORAGE_EMULATOR_HOST").is_some() {
            Credentials::Anonymous
        } else if let Ok(token) = std::env::var("GCS_ACCESS_TOKEN") {
            Credentials::Token(token)
        } else {
            Credentials::MetadataServer
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct AuthProvider {
    credentials: Credentials,
    http: reqwest::Client,
    cache: Arc<RwLock<Option<CachedToken>>>,
}

impl AuthProvider {
    pub fn new(credentials: Credentials, http: reqwest::Client) -> Self {
        Self {
            credentials,
            http,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Bearer token for the next request, `None` when running anonymously.
    pub async fn get_token(&self) -> Result<Option<String>> {
        match &self.credentials {
            Credentials::Anonymous => Ok(None),
            Credentials::Token(token) => Ok(Some(token.clone())),
            Credentials::MetadataServer => self.metadata_token().await.map(Some),
        }
    }

    async fn metadata_token(&self) -> Result<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.expires_at > Instant::now() + Duration::from_secs(60)
            {
                return Ok(cached.access_token.clone());
            }
        }

        let resp = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| GcsError::Auth(format!("metadata server unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GcsError::Auth(format!("token request failed ({status}): {body}")));
        }

        let token_resp: TokenResponse = resp
            .json()
            .await
            .map_err(|e| GcsError::Auth(format!("failed to parse token response: {e}")))?;
        debug!(expires_in = token_resp.expires_in, "fetched GCS access token");

        let mut cache = self.cache.write().await;
        *cache = Some(CachedToken {
            access_token: token_resp.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token_resp.expires_in),
        });
        Ok(token_resp.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_credentials_need_no_network() {
        let http = reqwest::Client::new();
        let anonymous = AuthProvider::new(Credentials::Anonymous, http.clone());
        assert_eq!(anonymous.get_token().await.unwrap(), None);

        let fixed = AuthProvider::new(Credentials::Token("ya29.test".into()), http);
        assert_eq!(fixed.get_token().await.unwrap().as_deref(), Some("ya29.test"));
    }
}
