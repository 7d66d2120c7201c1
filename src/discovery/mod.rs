// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device discovery through the account's device list.
//!
//! The vendor cloud lists every device bound to (or shared with) the account
//! at `api/user/device`. Discovery fetches that list and registers devices the
//! repository does not know yet. Known devices are left alone, so callbacks
//! registered on their switches survive repeated polls.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use coolkit_client::config::{AppCredentials, ClientConfig};
//! use coolkit_client::discovery::DeviceDiscovery;
//! use coolkit_client::event::EventBus;
//! use coolkit_client::repository::DeviceRepository;
//! use coolkit_client::session::AuthSession;
//!
//! # async fn example() -> coolkit_client::Result<()> {
//! let session = Arc::new(AuthSession::new(ClientConfig::new(AppCredentials::new("id", "secret")))?);
//! session.login("user@example.com", "password", "eu").await?;
//!
//! let discovery = Arc::new(DeviceDiscovery::new(session, DeviceRepository::new(), EventBus::new()));
//! let added = discovery.discover().await?;
//! println!("{added} new devices");
//!
//! // Keep polling in the background
//! let poller = Arc::clone(&discovery).spawn_polling(Duration::from_secs(60));
//! # poller.abort();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::device::Device;
use crate::error::{Error, ParseError, Result};
use crate::event::{ClientEvent, EventBus};
use crate::repository::DeviceRepository;
use crate::session::{AuthSession, read_reply};

/// REST action listing the account's devices.
pub const DEVICE_LIST_ACTION: &str = "api/user/device";

/// Registers the account's devices in a repository.
#[derive(Debug)]
pub struct DeviceDiscovery {
    session: Arc<AuthSession>,
    repository: DeviceRepository,
    events: EventBus,
}

impl DeviceDiscovery {
    /// Creates a discovery bound to a session and repository.
    #[must_use]
    pub fn new(session: Arc<AuthSession>, repository: DeviceRepository, events: EventBus) -> Self {
        Self {
            session,
            repository,
            events,
        }
    }

    /// Fetches the device list and registers unseen devices.
    ///
    /// Returns the number of devices added by this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the server rejects the call,
    /// [`Error::NotAuthenticated`] before login, or a transport error.
    pub async fn discover(&self) -> Result<usize> {
        let url = self.session.api_url(DEVICE_LIST_ACTION)?;
        let headers = self.session.auth_headers()?;

        tracing::debug!(url = %url, "Fetching device list");
        let response = self.session.http().get(&url).headers(headers).send().await?;

        let reply = match read_reply(response).await? {
            Ok(reply) => reply,
            Err((code, message)) => {
                tracing::error!(code, message = %message, "Error while retrieving device list");
                return Err(Error::Discovery { code, message });
            }
        };

        let documents = device_documents(reply)?;
        Ok(self.register_documents(documents))
    }

    /// Registers device documents that are not in the repository yet.
    ///
    /// Documents without `deviceid` or `apikey` are skipped. Returns the
    /// number of devices added.
    pub fn register_documents(&self, documents: impl IntoIterator<Item = Value>) -> usize {
        let mut added = 0;
        for document in documents {
            let known = document
                .get("deviceid")
                .and_then(Value::as_str)
                .is_some_and(|id| self.repository.has_device(id));
            if known {
                continue;
            }

            let device = match Device::from_payload(document) {
                Ok(device) => device,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed device document");
                    continue;
                }
            };

            let device_id = device.device_id().clone();
            let label = device.to_string();
            if self.repository.add_device(device) {
                tracing::info!(device = %label, "Registered device");
                self.events.publish(ClientEvent::device_added(device_id));
                added += 1;
            }
        }
        added
    }

    /// Runs [`discover`](Self::discover) now and then every `period`.
    ///
    /// Failures are logged and the next tick tries again. Abort the returned
    /// handle to stop polling.
    #[must_use]
    pub fn spawn_polling(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.discover().await {
                    Ok(0) => tracing::trace!("No new devices"),
                    Ok(added) => tracing::debug!(added, "Discovery poll registered devices"),
                    Err(e) => tracing::warn!(error = %e, "Discovery poll failed"),
                }
            }
        })
    }
}

/// Extracts the device documents from either reply shape.
fn device_documents(reply: Value) -> Result<Vec<Value>> {
    match reply {
        Value::Array(documents) => Ok(documents),
        Value::Object(mut fields) => match fields.remove("devicelist") {
            Some(Value::Array(documents)) => Ok(documents),
            _ => Err(ParseError::MissingField("devicelist".to_string()).into()),
        },
        other => Err(ParseError::UnexpectedFormat(format!("device list: {other}")).into()),
    }
}
