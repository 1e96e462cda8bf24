//! Authenticated HTTP round trips.
//!
//! The remote client never talks to `reqwest` directly: every request goes
//! through an [`Authenticator`], so deployments can plug in their own
//! credentials and tests can answer requests from memory.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};

use super::{ClientError, ClientResult};

/// Status and body of one HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Performs authenticated requests against an aeta server.
///
/// Implementations retry on authentication failures as they see fit and
/// return [`ClientError::Auth`] once they give up. Any other status is
/// returned as a reply for the caller to interpret.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn fetch(&self, method: Method, url: &str) -> ClientResult<HttpReply>;
}

/// Where the bearer token comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// A fixed token.
    Static(String),
    /// A file holding the token, read again on every attempt so that a
    /// refreshed token is picked up.
    File(PathBuf),
}

/// [`Authenticator`] over `reqwest`.
///
/// Sends an optional `Authorization: Bearer` header and gives up after
/// `max_attempts` consecutive 401/403 replies.
pub struct HttpAuthenticator {
    client: Client,
    token: Option<TokenSource>,
    max_attempts: u32,
}

impl HttpAuthenticator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            client: Client::new(),
            token: None,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn with_token(mut self, token: TokenSource) -> Self {
        self.token = Some(token);
        self
    }

    fn current_token(&self) -> ClientResult<Option<String>> {
        match &self.token {
            None => Ok(None),
            Some(TokenSource::Static(token)) => Ok(Some(token.clone())),
            Some(TokenSource::File(path)) => {
                let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
                let token = std::fs::read_to_string(&expanded).map_err(|e| {
                    ClientError::Transport {
                        url: expanded.clone(),
                        message: format!("cannot read token file: {}", e),
                    }
                })?;
                Ok(Some(token.trim().to_string()))
            }
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn fetch(&self, method: Method, url: &str) -> ClientResult<HttpReply> {
        let mut last_status = StatusCode::UNAUTHORIZED;

        for attempt in 1..=self.max_attempts {
            let mut request = self.client.request(method.clone(), url);
            if let Some(token) = self.current_token()? {
                request = request.bearer_auth(token);
            }

            debug!("{} {} (attempt {})", method, url, attempt);
            let response = request.send().await.map_err(|e| ClientError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                warn!(
                    "{} returned {} (attempt {}/{})",
                    url, status, attempt, self.max_attempts
                );
                last_status = status;
                continue;
            }

            let body = response.text().await.map_err(|e| ClientError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            return Ok(HttpReply::new(status.as_u16(), body));
        }

        Err(ClientError::Auth {
            url: url.to_string(),
            status: last_status.as_u16(),
            attempts: self.max_attempts,
        })
    }
}
