// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `coolkit_client` - An async client for CoolKit (eWeLink) cloud smart plugs.
//!
//! The vendor cloud exposes devices through two channels:
//!
//! - a signed REST API used to log in, obtain a relay host and list devices
//! - a WebSocket relay that pushes device state and accepts switch commands
//!
//! This crate models each cloud device as a [`Device`] with one [`Switch`]
//! per outlet. Switch callbacks fire when the relay reports a state change,
//! and [`Switch::set_state`] sends commands back through the relay.
//!
//! # Quick Start
//!
//! ```no_run
//! use coolkit_client::CoolkitClient;
//! use coolkit_client::config::{AppCredentials, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> coolkit_client::Result<()> {
//!     let config = ClientConfig::new(AppCredentials::new("app-id", "app-secret"));
//!     let client = CoolkitClient::new(config)?;
//!
//!     client.login("user@example.com", "password", "eu").await?;
//!     client.discover().await?;
//!     client.connect().await?;
//!     let listener = client.spawn_listener();
//!
//!     if let Some(plug) = client.device("1000a1b2c3") {
//!         plug.switches()[0].set_state(client.relay().as_ref(), true).await?;
//!     }
//!
//!     listener.await.ok();
//!     Ok(())
//! }
//! ```
//!
//! ## Switch Callbacks
//!
//! ```no_run
//! use coolkit_client::CoolkitClient;
//! use coolkit_client::config::{AppCredentials, ClientConfig};
//!
//! # async fn example() -> coolkit_client::Result<()> {
//! let client = CoolkitClient::new(ClientConfig::new(AppCredentials::new("id", "secret")))?;
//! let tasks = client.start("user@example.com", "password", "eu").await?;
//!
//! for device in client.devices() {
//!     for switch in device.switches() {
//!         switch.add_callback("print", |switch, on| async move {
//!             println!("outlet {} is now {}", switch.index(), if on { "on" } else { "off" });
//!         });
//!     }
//! }
//! # tasks.abort();
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod event;
pub mod relay;
pub mod repository;
pub mod session;

pub use client::{ClientTasks, CoolkitClient};
pub use config::{AppCredentials, ClientConfig, DeviceProfile, Endpoints};
pub use device::{Device, PayloadUpdate, Switch, SwitchLayout};
pub use error::{DeviceError, Error, ParseError, ProtocolError, Result};
pub use event::{ClientEvent, DeviceId, EventBus};
pub use relay::{CommandOutcome, CommandSink, InboundOutcome, RelayConnection};
pub use repository::DeviceRepository;
pub use session::{AuthSession, SessionState};
