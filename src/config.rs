// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client configuration.
//!
//! The vendor cloud expects every client to identify itself as a registered
//! mobile app. [`AppCredentials`] carries the app id and signing secret,
//! [`DeviceProfile`] the phone metadata sent with login and the relay
//! handshake, and [`Endpoints`] decides where requests go.
//!
//! # Examples
//!
//! ```
//! use coolkit_client::config::{AppCredentials, ClientConfig};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new(AppCredentials::new("my-app-id", "my-app-secret"))
//!     .with_http_timeout(Duration::from_secs(5))
//!     .with_discovery_interval(Duration::from_secs(120));
//! ```

use std::fmt;
use std::time::Duration;

/// Application identity used to sign the login request.
#[derive(Clone)]
pub struct AppCredentials {
    app_id: String,
    app_secret: Vec<u8>,
}

impl AppCredentials {
    /// Creates credentials from the vendor-issued app id and secret.
    #[must_use]
    pub fn new(app_id: impl Into<String>, app_secret: impl AsRef<[u8]>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.as_ref().to_vec(),
        }
    }

    /// Returns the app id sent as `appid`.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Returns the HMAC key for login signatures.
    #[must_use]
    pub fn app_secret(&self) -> &[u8] {
        &self.app_secret
    }
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// Phone metadata the client reports to the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Phone model, e.g. `iPhone10,6`.
    pub model: String,
    /// OS version string.
    pub rom_version: String,
    /// App version sent with login.
    pub app_version: String,
    /// App version sent with the relay handshake (`apkVesrion`).
    pub apk_version: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            model: "iPhone10,6".to_string(),
            rom_version: "11.1.2".to_string(),
            app_version: "3.5.3".to_string(),
            apk_version: "1.8".to_string(),
        }
    }
}

/// Where REST and relay requests are sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Endpoints {
    /// Region-templated vendor hosts.
    #[default]
    Regional,
    /// Fixed base URLs, ignoring the region and the dispatched relay host.
    Fixed {
        /// Base URL for `api/...` actions.
        api: String,
        /// Base URL for `dispatch/...` actions.
        dispatch: String,
        /// Full relay WebSocket URL. `None` keeps the dispatched host.
        relay: Option<String>,
    },
}

impl Endpoints {
    /// Vendor domain used by the region templates.
    pub const VENDOR_DOMAIN: &'static str = "coolkit.cc";
    /// Port used by every vendor host.
    pub const VENDOR_PORT: u16 = 8080;

    /// Builds the URL of a REST action for the given region.
    #[must_use]
    pub fn api_url(&self, region: &str, action: &str) -> String {
        match self {
            Self::Regional => format!(
                "https://{region}-api.{}:{}/{action}",
                Self::VENDOR_DOMAIN,
                Self::VENDOR_PORT
            ),
            Self::Fixed { api, .. } => join(api, action),
        }
    }

    /// Builds the URL of a dispatch action for the given region.
    #[must_use]
    pub fn dispatch_url(&self, region: &str, action: &str) -> String {
        match self {
            Self::Regional => format!(
                "https://{region}-disp.{}:{}/{action}",
                Self::VENDOR_DOMAIN,
                Self::VENDOR_PORT
            ),
            Self::Fixed { dispatch, .. } => join(dispatch, action),
        }
    }

    /// Builds the relay WebSocket URL for the dispatched host.
    #[must_use]
    pub fn relay_url(&self, relay_host: &str) -> String {
        match self {
            Self::Fixed {
                relay: Some(relay), ..
            } => relay.clone(),
            _ => format!("wss://{relay_host}:{}/api/ws", Self::VENDOR_PORT),
        }
    }
}

fn join(base: &str, action: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), action)
}

/// Top-level configuration for a [`CoolkitClient`](crate::CoolkitClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    credentials: AppCredentials,
    profile: DeviceProfile,
    endpoints: Endpoints,
    http_timeout: Duration,
    discovery_interval: Duration,
    event_capacity: usize,
}

impl ClientConfig {
    /// Default REST request timeout.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default period between discovery polls.
    pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);
    /// Default capacity of the event bus.
    pub const DEFAULT_EVENT_CAPACITY: usize = 256;

    /// Creates a configuration with default profile and regional endpoints.
    #[must_use]
    pub fn new(credentials: AppCredentials) -> Self {
        Self {
            credentials,
            profile: DeviceProfile::default(),
            endpoints: Endpoints::default(),
            http_timeout: Self::DEFAULT_HTTP_TIMEOUT,
            discovery_interval: Self::DEFAULT_DISCOVERY_INTERVAL,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the reported phone metadata.
    #[must_use]
    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Sets the endpoint strategy.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Sets the REST request timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the period between background discovery polls.
    #[must_use]
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    /// Sets the event bus capacity.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Returns the app credentials.
    #[must_use]
    pub fn credentials(&self) -> &AppCredentials {
        &self.credentials
    }

    /// Returns the phone metadata.
    #[must_use]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Returns the endpoint strategy.
    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Returns the REST request timeout.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Returns the discovery poll period.
    #[must_use]
    pub fn discovery_interval(&self) -> Duration {
        self.discovery_interval
    }

    /// Returns the event bus capacity.
    #[must_use]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }
}
