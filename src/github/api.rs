//! Interact with the GitHub REST API.

use std::{fmt::Display, sync::Arc, time::Duration};

use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

pub use self::auth::{
    AppCredential, InstallationToken, InstallationTokenProvider, TokenExchangeError,
};

pub mod auth;
pub mod check;
pub mod hook;
pub mod pr;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug)]
pub enum ApiError {
    Reqwest(reqwest::Error),
    Json(serde_json::Error),
    UnexpectedResponse(String),
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Reqwest(e) => Some(e),
            ApiError::Json(e) => Some(e),
            ApiError::UnexpectedResponse(_) => None,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Reqwest(e) => write!(f, "Network error: {}", e),
            ApiError::Json(e) => write!(f, "JSON ser/de error: {}", e),
            ApiError::UnexpectedResponse(e) => write!(f, "Unexpected response: {:?}", e),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        ApiError::Reqwest(value)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::Json(value)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Where and how to reach the GitHub API, shared by every client.
#[derive(Clone, Debug)]
pub struct Endpoint {
    req: reqwest::Client,
    base_url: Arc<str>,
}

impl Endpoint {
    /// Every request made through this endpoint gives up after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let req = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("doghouse")
            .build()?;
        Ok(Endpoint {
            req,
            base_url: base_url.trim_end_matches('/').into(),
        })
    }

    pub fn client<A>(&self, auth: A) -> GitHub<A> {
        GitHub {
            auth,
            endpoint: self.clone(),
        }
    }
}

/// A GitHub API client, authenticated with `A`.
///
/// `A` is either a [`auth::SignedAssertion`], that can only talk to the `app/`
/// endpoints, or an [`InstallationToken`], scoped to the repositories of one
/// installation.
pub struct GitHub<A> {
    auth: A,
    endpoint: Endpoint,
}

impl<A: Display> GitHub<A> {
    fn get(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.with_headers(self.endpoint.req.get(self.url(url)))
    }

    fn patch(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.with_headers(self.endpoint.req.patch(self.url(url)))
    }

    fn post(&self, url: impl AsRef<str>) -> RequestBuilder {
        self.with_headers(self.endpoint.req.post(self.url(url)))
    }

    fn with_headers(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.auth)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn url<S: AsRef<str>>(&self, path: S) -> String {
        let u = format!("{}/{}", self.endpoint.base_url, path.as_ref());
        debug!("API URL: {}", u);
        u
    }
}

#[derive(Debug, Clone)]
pub struct OwnerId(String);

#[derive(Debug, Clone)]
pub struct RepoId(String);

impl OwnerId {
    pub fn new(owner: &str) -> Self {
        OwnerId(owner.to_owned())
    }
}

impl RepoId {
    pub fn new(repo: &str) -> Self {
        RepoId(repo.to_owned())
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for RepoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct Installation {
    pub id: u64,
}

trait JsonExt {
    async fn parse_json<T: for<'a> Deserialize<'a>>(self) -> Result<T, ApiError>;
}

impl JsonExt for Response {
    async fn parse_json<T: for<'a> Deserialize<'a>>(self) -> Result<T, ApiError> {
        let bytes = self.bytes().await?;

        debug!(
            "Parsing JSON: {}",
            std::str::from_utf8(&bytes).unwrap_or("[INVALID UTF8]")
        );

        Ok(serde_json::from_slice(&bytes)?)
    }
}
