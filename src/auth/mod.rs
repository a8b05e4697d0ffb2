//! Authorization for QA branches.
//!
//! An OAuth code is requested from the local Discord client and exchanged for
//! a CDN token, which is then sent with every CDN request of the run.
pub mod ipc;

use std::io;

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;

use crate::{
    error::FetchError,
    http::{get_json, Headers, HttpClient},
};

pub const DISCORD_CLIENT_ID: &str = "580868196270342175";
pub const QA_AUTH_URL: &str = "https://qa-auth.alt-mp.com/auth";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Could not connect to Discord, make sure the Discord client is running")]
    NotRunning,

    #[error("Discord IPC failed, {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected Discord IPC message, {0}")]
    Protocol(String),

    #[error("Discord authorization failed, {0}")]
    Rejected(String),

    #[error("You do not have permissions to access this branch")]
    Forbidden,

    #[error("CDN authorization failed, {0}")]
    Fetch(FetchError),

    #[error("CDN authorization returned no token")]
    MissingToken,
}

/// Something able to produce an OAuth authorization code.
#[async_trait]
pub trait AuthorizationCodeSource: Send + Sync {
    async fn authorization_code(&self) -> Result<String, AuthError>;
}

/// Requests the code from the Discord client over its local IPC socket.
pub struct DiscordIpc {
    client_id: String,
}

impl Default for DiscordIpc {
    fn default() -> Self {
        Self::new(DISCORD_CLIENT_ID)
    }
}

impl DiscordIpc {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
        }
    }
}

#[async_trait]
impl AuthorizationCodeSource for DiscordIpc {
    async fn authorization_code(&self) -> Result<String, AuthError> {
        let stream = ipc::connect().await?;
        let mut client = ipc::IpcClient::new(stream, &self.client_id);
        client.handshake().await?;
        client.authorize().await
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Exchanges an authorization code for a CDN token.
pub async fn exchange_code(
    client: &dyn HttpClient,
    url: &str,
    code: &str,
) -> Result<String, AuthError> {
    let headers = Headers::new().with_authorization(code);
    let response: TokenResponse =
        get_json(client, url, &headers)
            .await
            .map_err(|err| match err.status() {
                Some(403) => AuthError::Forbidden,
                _ => AuthError::Fetch(err),
            })?;

    response
        .token
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Runs the full authorization and returns the headers for later CDN requests.
pub async fn authorize(
    source: &dyn AuthorizationCodeSource,
    client: &dyn HttpClient,
    url: &str,
) -> Result<Headers, AuthError> {
    info!("Authorizing via Discord");
    let code = source.authorization_code().await?;
    debug!("Received authorization code");

    info!("Authorizing in CDN");
    let token = exchange_code(client, url, &code).await?;
    Ok(Headers::new().with_authorization(&token))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::tests::MockHttpClient;

    struct StaticCode(Result<&'static str, ()>);

    #[async_trait]
    impl AuthorizationCodeSource for StaticCode {
        async fn authorization_code(&self) -> Result<String, AuthError> {
            self.0
                .map(str::to_string)
                .map_err(|_| AuthError::NotRunning)
        }
    }

    #[tokio::test]
    async fn token_becomes_authorization_header() {
        let client = MockHttpClient::new().with_json(QA_AUTH_URL, json!({ "token": "cdn-token" }));

        let headers = authorize(&StaticCode(Ok("code")), &client, QA_AUTH_URL)
            .await
            .unwrap();

        assert_eq!(headers.get("Authorization"), Some("cdn-token"));
        assert_eq!(client.requests()[0].1.get("Authorization"), Some("code"));
    }

    #[tokio::test]
    async fn forbidden_is_reported_as_missing_permissions() {
        let client = MockHttpClient::new().with_status(QA_AUTH_URL, 403);

        let err = authorize(&StaticCode(Ok("code")), &client, QA_AUTH_URL)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Forbidden));
        assert_eq!(
            err.to_string(),
            "You do not have permissions to access this branch"
        );
    }

    #[tokio::test]
    async fn other_statuses_are_fetch_errors() {
        let client = MockHttpClient::new().with_status(QA_AUTH_URL, 500);

        let err = exchange_code(&client, QA_AUTH_URL, "code").await.unwrap_err();
        assert!(matches!(err, AuthError::Fetch(FetchError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let client = MockHttpClient::new().with_json(QA_AUTH_URL, json!({ "token": "" }));

        let err = exchange_code(&client, QA_AUTH_URL, "code").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
    }

    #[tokio::test]
    async fn discord_failure_skips_cdn_exchange() {
        let client = MockHttpClient::new();

        let err = authorize(&StaticCode(Err(())), &client, QA_AUTH_URL)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::NotRunning));
        assert!(client.requests().is_empty());
    }
}
