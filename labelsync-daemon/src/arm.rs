//! Azure Resource Manager compute collaborator.
//!
//! # Wire contract
//!
//! - read: `GET {endpoint}{resource}?api-version=…`, tags taken from `tags`
//! - write: `PATCH` the same URL with `{"tags": <full map>}`
//! - `201`/`202` answers are followed through `Azure-AsyncOperation` (or
//!   `Location`) until the operation reports `Succeeded`
//!
//! Virtual machines and scale sets share this contract; only the resource
//! type segment of the path differs.
//!
//! # Tokens
//!
//! `AZURE_ACCESS_TOKEN` wins when set. Otherwise tokens come from the
//! instance metadata endpoint (managed identity) and are cached until shortly
//! before they expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, LOCATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;

use labelsync_core::{ResourceId, TagMap};
use labelsync_sync::{ClientError, ComputeProvider, ComputeResource};

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_API_VERSION: &str = "2019-03-01";
pub const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const ASYNC_OPERATION: &str = "azure-asyncoperation";
/// Refresh cached tokens this long before they expire.
const TOKEN_SKEW: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Supplies bearer tokens for ARM requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, ClientError>;
}

/// A token handed in from outside, e.g. `AZURE_ACCESS_TOKEN`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, ClientError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// IMDS sends this as a string; accept a number too.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn lifetime(&self) -> Duration {
        let secs = match &self.expires_in {
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            _ => None,
        };
        Duration::from_secs(secs.unwrap_or(300))
    }
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Managed-identity tokens from the instance metadata service.
pub struct ManagedIdentity {
    http: reqwest::Client,
    token_url: String,
    resource: String,
    client_id: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl ManagedIdentity {
    pub fn new(http: reqwest::Client, resource: impl Into<String>) -> Self {
        Self {
            http,
            token_url: IMDS_TOKEN_URL.to_owned(),
            resource: resource.into(),
            client_id: None,
            cached: Mutex::new(None),
        }
    }

    /// Request tokens for a user-assigned identity.
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    async fn request(&self) -> Result<TokenResponse, ClientError> {
        let mut query = vec![
            ("api-version", IMDS_API_VERSION.to_owned()),
            ("resource", self.resource.clone()),
        ];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.clone()));
        }
        let resp = self
            .http
            .get(&self.token_url)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await
            .map_err(|e| ClientError::api("managed identity token request failed", e))?;
        let resp = error_for_status(resp, "managed identity token").await?;
        resp.json::<TokenResponse>()
            .await
            .map_err(|e| ClientError::api("malformed managed identity token response", e))
    }
}

#[async_trait]
impl TokenSource for ManagedIdentity {
    async fn token(&self) -> Result<String, ClientError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.request().await?;
        let lifetime = fresh.lifetime().saturating_sub(TOKEN_SKEW);
        tracing::debug!(lifetime_secs = lifetime.as_secs(), "fetched managed identity token");
        let value = fresh.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Compute provider
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ArmInner {
    http: reqwest::Client,
    endpoint: String,
    api_version: String,
    tokens: Arc<dyn TokenSource>,
    poll_interval: Duration,
}

/// ARM-backed [`ComputeProvider`].
#[derive(Clone)]
pub struct ArmCompute {
    inner: Arc<ArmInner>,
}

impl ArmCompute {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            inner: Arc::new(ArmInner {
                http,
                endpoint: endpoint.into().trim_end_matches('/').to_owned(),
                api_version: DEFAULT_API_VERSION.to_owned(),
                tokens,
                poll_interval: Duration::from_secs(5),
            }),
        }
    }

    /// Build from the environment:
    /// `AZURE_RESOURCE_MANAGER_ENDPOINT`, `AZURE_ACCESS_TOKEN`, `AZURE_CLIENT_ID`.
    pub fn from_env() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let endpoint = std::env::var("AZURE_RESOURCE_MANAGER_ENDPOINT")
            .ok()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());
        let tokens: Arc<dyn TokenSource> = match std::env::var("AZURE_ACCESS_TOKEN") {
            Ok(token) if !token.is_empty() => Arc::new(StaticToken::new(token)),
            _ => Arc::new(
                ManagedIdentity::new(http.clone(), format!("{}/", endpoint.trim_end_matches('/')))
                    .with_client_id(std::env::var("AZURE_CLIENT_ID").ok()),
            ),
        };
        Ok(Self::new(http, endpoint, tokens))
    }

    /// Interval between long-running-operation polls when the service sends
    /// no `Retry-After`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        Arc::make_mut(&mut self.inner).poll_interval = interval;
        self
    }
}

impl ArmInner {
    fn resource_url(&self, id: &ResourceId) -> String {
        format!(
            "{}{}?api-version={}",
            self.endpoint,
            id.arm_path(),
            self.api_version
        )
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let token = self.tokens.token().await?;
        let mut req = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("Bearer {token}"));
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send()
            .await
            .map_err(|e| ClientError::api(format!("{method} {url} failed"), e))
    }

    /// Follow a long-running operation until it settles.
    async fn wait(&self, initial: &HeaderMap) -> Result<(), ClientError> {
        let (url, via_async_operation) = match header(initial, ASYNC_OPERATION) {
            Some(url) => (url, true),
            None => match header(initial, LOCATION.as_str()) {
                Some(url) => (url, false),
                None => return Ok(()),
            },
        };
        let mut delay = retry_after(initial).unwrap_or(self.poll_interval);

        loop {
            tokio::time::sleep(delay).await;
            let resp = self.send(Method::GET, &url, None).await?;
            delay = retry_after(resp.headers()).unwrap_or(self.poll_interval);

            if via_async_operation {
                let resp = error_for_status(resp, "operation status").await?;
                let status: OperationStatus = resp
                    .json()
                    .await
                    .map_err(|e| ClientError::api("malformed operation status", e))?;
                match status.status.as_str() {
                    "Succeeded" => return Ok(()),
                    "Failed" | "Canceled" => {
                        return Err(ClientError::message(format!(
                            "tag update {}: {}",
                            status.status.to_lowercase(),
                            status.error.map(|e| e.to_string()).unwrap_or_default()
                        )))
                    }
                    other => tracing::debug!(status = %other, "tag update in progress"),
                }
            } else if resp.status() != StatusCode::ACCEPTED {
                error_for_status(resp, "operation result").await?;
                return Ok(());
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ResourceBody {
    #[serde(default)]
    tags: Option<TagMap>,
}

#[async_trait]
impl ComputeProvider for ArmCompute {
    async fn fetch(&self, id: &ResourceId) -> Result<Box<dyn ComputeResource>, ClientError> {
        let url = self.inner.resource_url(id);
        let resp = self.inner.send(Method::GET, &url, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                what: format!("{} {}", id.kind, id.name),
            });
        }
        let resp = error_for_status(resp, "resource read").await?;
        let body: ResourceBody = resp
            .json()
            .await
            .map_err(|e| ClientError::api(format!("malformed body for {id}"), e))?;
        Ok(Box::new(ArmResource {
            id: id.clone(),
            tags: body.tags.unwrap_or_default(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// Tag handle for one virtual machine or scale set.
pub struct ArmResource {
    id: ResourceId,
    tags: TagMap,
    inner: Arc<ArmInner>,
}

#[async_trait]
impl ComputeResource for ArmResource {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn tags(&self) -> &TagMap {
        &self.tags
    }

    fn replace_tags(&mut self, tags: TagMap) {
        self.tags = tags;
    }

    async fn commit(&mut self) -> Result<(), ClientError> {
        let url = self.inner.resource_url(&self.id);
        let body = json!({ "tags": self.tags });
        let resp = self.inner.send(Method::PATCH, &url, Some(&body)).await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        error_for_status(resp, "tag update").await?;
        if status == StatusCode::CREATED || status == StatusCode::ACCEPTED {
            self.inner.wait(&headers).await?;
        }
        tracing::debug!(resource = %self.id, tags = self.tags.len(), "committed tags");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header(headers, RETRY_AFTER.as_str())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a non-success response into a [`ClientError`] carrying its body.
async fn error_for_status(
    resp: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::message(format!(
        "{what} returned {status}: {}",
        body.trim()
    )))
}
