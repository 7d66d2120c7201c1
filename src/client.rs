// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entry point tying the session, repository, relay and discovery together.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::device::Device;
use crate::discovery::DeviceDiscovery;
use crate::error::{DeviceError, Error, Result};
use crate::event::{ClientEvent, DeviceId, EventBus};
use crate::relay::{CommandOutcome, InboundOutcome, RelayConnection};
use crate::repository::DeviceRepository;
use crate::session::AuthSession;

/// Background tasks started by [`CoolkitClient::start`].
#[derive(Debug)]
pub struct ClientTasks {
    /// Relay read loop; resolves when the socket closes.
    pub listener: JoinHandle<Result<()>>,
    /// Periodic device list poll; runs until aborted.
    pub poller: JoinHandle<()>,
}

impl ClientTasks {
    /// Stops both tasks.
    pub fn abort(&self) {
        self.listener.abort();
        self.poller.abort();
    }
}

/// A client for one vendor-cloud account.
///
/// Owns one session, one device repository and one relay connection. All
/// handles are cheap to clone out and share with other tasks.
///
/// # Examples
///
/// ```no_run
/// use coolkit_client::CoolkitClient;
/// use coolkit_client::config::{AppCredentials, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> coolkit_client::Result<()> {
///     let client = CoolkitClient::new(ClientConfig::new(AppCredentials::new("app-id", "app-secret")))?;
///
///     let mut events = client.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("{event:?}");
///         }
///     });
///
///     let tasks = client.start("user@example.com", "password", "eu").await?;
///
///     for device in client.devices() {
///         for switch in device.switches() {
///             switch.add_callback("log", |switch, on| async move {
///                 println!("switch {} -> {on}", switch.index());
///             });
///         }
///     }
///
///     tasks.listener.await.ok();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct CoolkitClient {
    session: Arc<AuthSession>,
    repository: DeviceRepository,
    relay: Arc<RelayConnection>,
    discovery: Arc<DeviceDiscovery>,
    events: EventBus,
}

impl CoolkitClient {
    /// Creates a client that has not logged in yet.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let events = EventBus::with_capacity(config.event_capacity());
        let session = Arc::new(AuthSession::new(config)?);
        let repository = DeviceRepository::new();
        let relay = Arc::new(RelayConnection::new(
            Arc::clone(&session),
            repository.clone(),
            events.clone(),
        ));
        let discovery = Arc::new(DeviceDiscovery::new(
            Arc::clone(&session),
            repository.clone(),
            events.clone(),
        ));

        Ok(Self {
            session,
            repository,
            relay,
            discovery,
            events,
        })
    }

    /// Returns the session.
    #[must_use]
    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Returns the device repository.
    #[must_use]
    pub fn repository(&self) -> &DeviceRepository {
        &self.repository
    }

    /// Returns the relay connection.
    #[must_use]
    pub fn relay(&self) -> &Arc<RelayConnection> {
        &self.relay
    }

    /// Returns the discovery collaborator.
    #[must_use]
    pub fn discovery(&self) -> &Arc<DeviceDiscovery> {
        &self.discovery
    }

    /// Subscribes to client events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Returns the number of active event subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Logs in and obtains a relay host.
    ///
    /// # Errors
    ///
    /// See [`AuthSession::login`].
    pub async fn login(&self, username: &str, password: &str, region: &str) -> Result<()> {
        self.session.login(username, password, region).await
    }

    /// Fetches the device list once. Returns the number of new devices.
    ///
    /// # Errors
    ///
    /// See [`DeviceDiscovery::discover`].
    pub async fn discover(&self) -> Result<usize> {
        self.discovery.discover().await
    }

    /// Opens the relay socket.
    ///
    /// # Errors
    ///
    /// See [`RelayConnection::connect`].
    pub async fn connect(&self) -> Result<()> {
        self.relay.connect().await
    }

    /// Closes the relay socket.
    ///
    /// # Errors
    ///
    /// See [`RelayConnection::disconnect`].
    pub async fn disconnect(&self) -> Result<()> {
        self.relay.disconnect().await
    }

    /// Runs the relay read loop on a new task.
    #[must_use]
    pub fn spawn_listener(&self) -> JoinHandle<Result<()>> {
        let relay = Arc::clone(&self.relay);
        tokio::spawn(async move { relay.listen().await })
    }

    /// Polls the device list on a new task at the configured interval.
    #[must_use]
    pub fn spawn_polling(&self) -> JoinHandle<()> {
        let period = self.session.config().discovery_interval();
        Arc::clone(&self.discovery).spawn_polling(period)
    }

    /// Logs in, discovers devices, connects the relay and starts the
    /// background tasks.
    ///
    /// # Errors
    ///
    /// Returns the first login, discovery or connection error.
    pub async fn start(&self, username: &str, password: &str, region: &str) -> Result<ClientTasks> {
        self.login(username, password, region).await?;
        self.discover().await?;
        self.connect().await?;
        Ok(ClientTasks {
            listener: self.spawn_listener(),
            poller: self.spawn_polling(),
        })
    }

    /// Returns the device with this id.
    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.repository.get_device(device_id)
    }

    /// Returns all known devices.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.repository.devices()
    }

    /// Sets one switch of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown id,
    /// [`DeviceError::SwitchOutOfRange`] for a bad index, or a send error.
    pub async fn set_switch(&self, device_id: &str, index: usize, on: bool) -> Result<CommandOutcome> {
        let device = self
            .device(device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
        let switch = device.switch(index).ok_or(DeviceError::SwitchOutOfRange {
            index,
            count: device.switches().len(),
        })?;
        switch.set_state(self.relay.as_ref(), on).await
    }

    /// Feeds a relay message through the same path as pushed frames.
    pub fn inject(&self, message: &Value) -> InboundOutcome {
        self.relay.apply_inbound(message)
    }

    /// Sends a raw params update for a device.
    ///
    /// # Errors
    ///
    /// See [`RelayConnection::send_command`].
    pub async fn send_params(&self, device_id: &DeviceId, params: Value) -> Result<CommandOutcome> {
        self.relay.send_command(device_id, params).await
    }
}
