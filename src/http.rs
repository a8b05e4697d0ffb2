//! HTTP client abstraction.
//!
//! Every remote call in the crate goes through [`HttpClient`] so the sync,
//! auth and resource flows can be driven by an in-memory client in tests.
use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;

use crate::error::FetchError;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// User agent sent with every request, GitHub rejects requests without one.
pub const USER_AGENT: &str = concat!("altv-pkg/", env!("CARGO_PKG_VERSION"));

/// Extra headers attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_authorization(self, value: &str) -> Self {
        self.with("Authorization", value)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Trait for HTTP GET operations.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs a GET request and returns the body of a successful response.
    async fn get(&self, url: &str, headers: &Headers) -> Result<Vec<u8>, FetchError>;
}

/// Fetches `url` and decodes the body as JSON.
pub async fn get_json<T: DeserializeOwned>(
    client: &dyn HttpClient,
    url: &str,
    headers: &Headers,
) -> Result<T, FetchError> {
    let body = client.get(url, headers).await?;
    serde_json::from_slice(&body).map_err(|err| FetchError::Body {
        url: url.to_string(),
        reason: err.to_string(),
    })
}

/// HTTP client backed by reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| FetchError::Request {
                url: String::new(),
                reason: format!("failed to create HTTP client, {}", err),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Vec<u8>, FetchError> {
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        for (name, value) in headers.iter() {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|err| FetchError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| FetchError::Body {
                url: url.to_string(),
                reason: err.to_string(),
            })
    }
}
