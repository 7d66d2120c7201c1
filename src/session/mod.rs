// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authenticated session with the vendor cloud.
//!
//! Logging in is a two-step exchange:
//!
//! 1. `POST api/user/login` with a body signed by the app secret returns a
//!    bearer token and the user's api key.
//! 2. `POST dispatch/app` with that token assigns the relay host the
//!    WebSocket connection must use.
//!
//! Tokens are never refreshed; a later 401 surfaces as an error.

pub mod sign;

use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{Error, ParseError, ProtocolError, Result};

use sign::LoginRequest;

/// Content type the vendor API expects on every call.
const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

const LOGIN_ACTION: &str = "api/user/login";
const DISPATCH_ACTION: &str = "dispatch/app";

/// Credentials and routing obtained from login and dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Region code the session logged into, e.g. `eu`.
    pub region: Option<String>,
    /// Bearer token (`at`).
    pub bearer_token: Option<String>,
    /// Api key of the logged-in user.
    pub user_api_key: Option<String>,
    /// Relay host assigned by dispatch.
    pub relay_host: Option<String>,
}

/// Common envelope of vendor REST replies.
#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(flatten)]
    rest: Value,
}

impl ApiReply {
    fn message(&self) -> String {
        self.info
            .clone()
            .or_else(|| self.msg.clone())
            .unwrap_or_default()
    }
}

/// Reads a reply body, turning HTTP or `error` failures into `(code, message)`.
///
/// Non-200 replies without a JSON body report the HTTP status as the code.
pub(crate) async fn read_reply(
    response: reqwest::Response,
) -> Result<std::result::Result<Value, (i64, String)>> {
    let status = response.status();
    let body = response.text().await?;
    // Login replies carry the bearer token, so the body itself is not logged
    tracing::debug!(status = status.as_u16(), len = body.len(), "Received API reply");

    let reply: Option<ApiReply> = serde_json::from_str(&body).ok();
    match reply {
        Some(reply) if status == StatusCode::OK && reply.error == 0 => Ok(Ok(reply.rest)),
        Some(reply) if reply.error != 0 => Ok(Err((reply.error, reply.message()))),
        Some(reply) => Ok(Err((i64::from(status.as_u16()), reply.message()))),
        None if status == StatusCode::OK => {
            // Bare arrays (device lists) have no envelope
            Ok(Ok(serde_json::from_str(&body)?))
        }
        None => Ok(Err((
            i64::from(status.as_u16()),
            status.canonical_reason().unwrap_or("Unknown").to_string(),
        ))),
    }
}

/// An authenticated session with the vendor cloud.
///
/// Constructed once and shared (usually behind an `Arc`) by the relay
/// connection and the discovery poller.
///
/// # Examples
///
/// ```no_run
/// use coolkit_client::config::{AppCredentials, ClientConfig};
/// use coolkit_client::session::AuthSession;
///
/// # async fn example() -> coolkit_client::Result<()> {
/// let session = AuthSession::new(ClientConfig::new(AppCredentials::new("id", "secret")))?;
/// session.login("user@example.com", "password", "eu").await?;
/// println!("relay: {}", session.relay_url()?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AuthSession {
    config: ClientConfig,
    http: Client,
    state: RwLock<SessionState>,
}

impl AuthSession {
    /// Creates an unauthenticated session.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(ProtocolError::Http)?;

        Ok(Self {
            config,
            http,
            state: RwLock::new(SessionState::default()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns a snapshot of the session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Returns the region, once `login` has been called.
    #[must_use]
    pub fn region(&self) -> Option<String> {
        self.state.read().region.clone()
    }

    /// Returns the bearer token.
    #[must_use]
    pub fn bearer_token(&self) -> Option<String> {
        self.state.read().bearer_token.clone()
    }

    /// Returns the logged-in user's api key.
    #[must_use]
    pub fn user_api_key(&self) -> Option<String> {
        self.state.read().user_api_key.clone()
    }

    /// Returns the dispatched relay host.
    #[must_use]
    pub fn relay_host(&self) -> Option<String> {
        self.state.read().relay_host.clone()
    }

    /// Returns `true` once login and dispatch have both succeeded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let state = self.state.read();
        state.bearer_token.is_some() && state.user_api_key.is_some() && state.relay_host.is_some()
    }

    fn require_region(&self) -> Result<String> {
        self.region().ok_or(Error::NotAuthenticated)
    }

    /// Builds the URL of a REST action in the session's region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before `login` set the region.
    pub fn api_url(&self, action: &str) -> Result<String> {
        Ok(self
            .config
            .endpoints()
            .api_url(&self.require_region()?, action))
    }

    /// Builds the URL of a dispatch action in the session's region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before `login` set the region.
    pub fn dispatch_url(&self, action: &str) -> Result<String> {
        Ok(self
            .config
            .endpoints()
            .dispatch_url(&self.require_region()?, action))
    }

    /// Returns the relay WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before dispatch assigned a host.
    pub fn relay_url(&self) -> Result<String> {
        let host = self.relay_host().ok_or(Error::NotAuthenticated)?;
        Ok(self.config.endpoints().relay_url(&host))
    }

    /// Returns bearer headers for authenticated REST calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before login.
    pub fn auth_headers(&self) -> Result<HeaderMap> {
        let token = self.bearer_token().ok_or(Error::NotAuthenticated)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ProtocolError::InvalidHeader(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        Ok(headers)
    }

    /// Returns the shared HTTP client.
    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Logs in and then asks dispatch for a relay host.
    ///
    /// The username is sent as `email` when it looks like an address and as
    /// `phoneNumber` otherwise. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if login is rejected,
    /// [`Error::Dispatch`] if dispatch fails, or a transport error.
    pub async fn login(&self, username: &str, password: &str, region: &str) -> Result<()> {
        self.state.write().region = Some(region.to_string());

        let url = self.api_url(LOGIN_ACTION)?;
        let request = LoginRequest::new(
            username,
            password,
            self.config.credentials(),
            self.config.profile(),
        );
        // Sign the exact bytes that go on the wire
        let body = serde_json::to_string(&request)?;
        let signature = sign::sign(self.config.credentials().app_secret(), body.as_bytes());

        tracing::debug!(url = %url, region = %region, "Sending login request");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Sign {signature}"))
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let reply = match read_reply(response).await? {
            Ok(reply) => reply,
            Err((code, message)) => {
                tracing::error!(code, message = %message, "Login rejected");
                return Err(Error::Authentication { code, message });
            }
        };

        let token = reply
            .get("at")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::MissingField("at".to_string()))?;
        let api_key = reply
            .pointer("/user/apikey")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::MissingField("user.apikey".to_string()))?;

        {
            let mut state = self.state.write();
            state.bearer_token = Some(token.to_string());
            state.user_api_key = Some(api_key.to_string());
        }
        tracing::info!(user = %username, "User successfully logged in");

        self.dispatch_application().await
    }

    /// Asks the region dispatcher which relay host to use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dispatch`] if the call fails,
    /// [`Error::NotAuthenticated`] before login.
    pub async fn dispatch_application(&self) -> Result<()> {
        let url = self.dispatch_url(DISPATCH_ACTION)?;
        let headers = self.auth_headers()?;

        tracing::debug!(url = %url, "Requesting relay dispatch");

        let response = self.http.post(&url).headers(headers).send().await?;

        let reply = match read_reply(response).await? {
            Ok(reply) => reply,
            Err((code, message)) => {
                tracing::error!(code, message = %message, "Dispatch failed");
                return Err(Error::Dispatch { code, message });
            }
        };

        let host = reply
            .get("domain")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::MissingField("domain".to_string()))?;

        tracing::info!(host = %host, "Application assigned to relay host");
        self.state.write().relay_host = Some(host.to_string());
        Ok(())
    }

    /// Installs session credentials obtained elsewhere.
    ///
    /// Useful for tests and for callers that cache tokens themselves.
    pub fn restore(&self, state: SessionState) {
        *self.state.write() = state;
    }
}
