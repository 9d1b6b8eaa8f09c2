//! Google Cloud Storage over the JSON API
//!
//! Uses blocking `reqwest` calls. Authentication is a bearer token taken
//! from `GCS_ACCESS_TOKEN` or, on GCE/Cloud Run/Vertex, from the instance
//! metadata server. `STORAGE_EMULATOR_HOST` points the client at a local
//! emulator and disables authentication.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::{ObjectMeta, ObjectStore};
use crate::utils::error::{CropDiseaseError, Result};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Where bearer tokens come from
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// A fixed token
    Static(String),
    /// The GCE instance metadata server
    MetadataServer,
    /// No authentication (emulators, public buckets)
    Anonymous,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
    size: Option<String>,
}

/// Cloud Storage bucket client
pub struct GcsStore {
    bucket: String,
    endpoint: String,
    client: Client,
    tokens: TokenSource,
    cached_token: Mutex<Option<(String, Instant)>>,
}

impl GcsStore {
    /// Create a client for `bucket`
    pub fn new(bucket: &str, endpoint: &str, tokens: TokenSource) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            bucket: bucket.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            tokens,
            cached_token: Mutex::new(None),
        })
    }

    /// Create a client configured from the environment
    pub fn from_env(bucket: &str) -> Result<Self> {
        if let Ok(host) = std::env::var("STORAGE_EMULATOR_HOST") {
            let endpoint = if host.starts_with("http") {
                host
            } else {
                format!("http://{}", host)
            };
            return Self::new(bucket, &endpoint, TokenSource::Anonymous);
        }

        let tokens = match std::env::var("GCS_ACCESS_TOKEN") {
            Ok(token) if !token.is_empty() => TokenSource::Static(token),
            _ => TokenSource::MetadataServer,
        };

        Self::new(bucket, DEFAULT_ENDPOINT, tokens)
    }

    fn token(&self) -> Result<Option<String>> {
        match &self.tokens {
            TokenSource::Anonymous => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::MetadataServer => {
                let mut cached = self
                    .cached_token
                    .lock()
                    .map_err(|_| CropDiseaseError::Storage("token cache poisoned".to_string()))?;

                if let Some((token, expires)) = cached.as_ref() {
                    if Instant::now() < *expires {
                        return Ok(Some(token.clone()));
                    }
                }

                let response = self
                    .client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .timeout(Duration::from_secs(10))
                    .send()?;

                if !response.status().is_success() {
                    return Err(CropDiseaseError::Storage(format!(
                        "Metadata server returned {}",
                        response.status()
                    )));
                }

                let token: MetadataToken = response.json()?;
                // Refresh a minute early
                let ttl = Duration::from_secs(token.expires_in.saturating_sub(60));
                *cached = Some((token.access_token.clone(), Instant::now() + ttl));
                debug!("Fetched access token from metadata server");

                Ok(Some(token.access_token))
            }
        }
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match self.token()? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| CropDiseaseError::Config(format!("Invalid storage endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| CropDiseaseError::Config("Storage endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o", key]);
        Ok(url)
    }

    fn list_url(&self) -> String {
        format!("{}/storage/v1/b/{}/o", self.endpoint, self.bucket)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket)
    }
}

fn check_status(response: reqwest::blocking::Response, what: &str) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(CropDiseaseError::ObjectNotFound(what.to_string()));
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(CropDiseaseError::Storage(format!(
            "{} failed with {}: {}",
            what, status, body
        )));
    }
    Ok(response)
}

fn parse_list_page(body: &str) -> Result<(Vec<ObjectMeta>, Option<String>)> {
    let page: ListResponse = serde_json::from_str(body)?;
    let objects = page
        .items
        .into_iter()
        .map(|item| ObjectMeta {
            size: item.size.and_then(|s| s.parse().ok()),
            key: item.name,
        })
        .collect();
    Ok((objects, page.next_page_token))
}

impl ObjectStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("prefix", prefix.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let request = self.authorized(self.client.get(self.list_url()).query(&query))?;
            let response = check_status(request.send()?, &format!("list {}", prefix))?;
            let (page, next) = parse_list_page(&response.text()?)?;
            objects.extend(page);

            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut url = self.object_url(key)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let request = self.authorized(self.client.get(url))?;
        let response = check_status(request.send()?, key)?;
        Ok(response.bytes()?.to_vec())
    }

    fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        let request = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", key)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);

        let request = self.authorized(request)?;
        check_status(request.send()?, &format!("upload {}", key))?;
        debug!("Uploaded gs://{}/{}", self.bucket, key);
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}
