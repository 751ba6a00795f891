use std::time::Duration;

use bytes::Bytes;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::auth::{AuthProvider, Credentials};
use crate::error::{GcsError, Result};
use crate::objects::{ListParams, ObjectList, ObjectResource};

const GCS_BASE: &str = "https://storage.googleapis.com";
const MAX_RETRIES: u32 = 5;

/// Thin client for the Cloud Storage JSON API.
#[derive(Clone)]
pub struct GcsClient {
    auth: AuthProvider,
    http: reqwest::Client,
    base_url: Url,
}

impl GcsClient {
    /// Client for Google's endpoint, or the emulator named by
    /// `STORAGE_EMULATOR_HOST`.
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var("STORAGE_EMULATOR_HOST") {
            Ok(host) if host.starts_with("http://") || host.starts_with("https://") => host,
            Ok(host) => format!("http://{host}"),
            Err(_) => GCS_BASE.to_string(),
        };
        Self::with_base_url(Credentials::from_env(), &base)
    }

    pub fn with_base_url(credentials: Credentials, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| GcsError::Url(format!("{base_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            auth: AuthProvider::new(credentials, http.clone()),
            http,
            base_url,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GcsError::Url(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, bucket: &str, name: &str) -> Result<Url> {
        self.url(&["storage", "v1", "b", bucket, "o", name])
    }

    /// Send a request, retrying on throttling with the server's `Retry-After`.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut retries = 0;
        loop {
            let mut request = build(&self.http);
            if let Some(token) = self.auth.get_token().await? {
                request = request.bearer_auth(token);
            }
            let resp = request.send().await?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(GcsError::RetriesExhausted(resp.url().to_string()));
                }
                let retry_after = resp
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(2u64.pow(retries));
                warn!(url = %resp.url(), retry_after, retries, "throttled, backing off");
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(GcsError::Status { status, body });
            }

            debug!(url = %resp.url(), %status, "OK");
            return Ok(resp);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.send(|http| http.get(url.clone())).await?;
        Ok(resp.json().await?)
    }

    pub async fn get_object(&self, bucket: &str, name: &str) -> Result<ObjectResource> {
        self.get_json(self.object_url(bucket, name)?).await
    }

    /// Start downloading an object's content; the body is left unread.
    pub async fn download(&self, bucket: &str, name: &str) -> Result<Response> {
        let mut url = self.object_url(bucket, name)?;
        url.query_pairs_mut().append_pair("alt", "media");
        self.send(|http| http.get(url.clone())).await
    }

    pub async fn list_objects(&self, bucket: &str, params: &ListParams) -> Result<ObjectList> {
        let mut url = self.url(&["storage", "v1", "b", bucket, "o"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &params.max_results.max(1).to_string());
            if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
                query.append_pair("prefix", prefix);
            }
            if let Some(token) = &params.page_token {
                query.append_pair("pageToken", token);
            }
            if let Some(offset) = &params.start_offset {
                query.append_pair("startOffset", offset);
            }
        }
        self.get_json(url).await
    }

    /// Single-request media upload.
    pub async fn upload(
        &self,
        bucket: &str,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<ObjectResource> {
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", name);
        let resp = self
            .send(|http| {
                http.post(url.clone())
                    .header(reqwest::header::CONTENT_TYPE, content_type)
                    .body(data.clone())
            })
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn delete_object(&self, bucket: &str, name: &str) -> Result<()> {
        let url = self.object_url(bucket, name)?;
        self.send(|http| http.delete(url.clone())).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GcsClient {
        GcsClient::with_base_url(Credentials::Anonymous, "http://localhost:4443").unwrap()
    }

    #[test]
    fn object_names_are_path_encoded() {
        let url = client().object_url("photos", "cats/tabby cat.png").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/storage/v1/b/photos/o/cats%2Ftabby%20cat.png"
        );
    }

    #[test]
    fn base_path_is_kept() {
        let client =
            GcsClient::with_base_url(Credentials::Anonymous, "http://localhost:4443/gcs/").unwrap();
        let url = client.url(&["storage", "v1", "b", "photos", "o"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:4443/gcs/storage/v1/b/photos/o");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            GcsClient::with_base_url(Credentials::Anonymous, "not a url"),
            Err(GcsError::Url(_))
        ));
    }
}
