// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system for client notifications.
//!
//! - [`DeviceId`] - Vendor device identifier
//! - [`ClientEvent`] - Events emitted by the repository and the relay
//! - [`EventBus`] - Broadcast channel for distributing events
//!
//! # Examples
//!
//! ```
//! use coolkit_client::event::{ClientEvent, DeviceId, EventBus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(ClientEvent::DeviceAdded {
//!     device_id: DeviceId::from("1000a1b2c3"),
//! });
//! ```

mod device_event;
mod device_id;
mod event_bus;

pub use device_event::ClientEvent;
pub use device_id::DeviceId;
pub use event_bus::EventBus;
