// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory store of known devices.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::Device;
use crate::event::DeviceId;

/// Keyed store of devices shared by discovery and the relay.
///
/// Cloning is cheap and every clone sees the same devices. Devices are
/// never removed during a run.
///
/// # Examples
///
/// ```
/// use coolkit_client::device::Device;
/// use coolkit_client::repository::DeviceRepository;
/// use serde_json::json;
///
/// let repository = DeviceRepository::new();
/// let device = Device::from_payload(json!({
///     "deviceid": "d1", "apikey": "k", "params": {"switch": "off"}
/// }))?;
///
/// assert!(repository.add_device(device));
/// assert!(repository.has_device("d1"));
/// # Ok::<(), coolkit_client::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeviceRepository {
    devices: Arc<RwLock<HashMap<DeviceId, Arc<Device>>>>,
}

impl DeviceRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device.
    ///
    /// Inserting an id that is already present keeps the existing device,
    /// along with its switch callbacks. Returns `true` if the device was
    /// inserted.
    pub fn add_device(&self, device: Arc<Device>) -> bool {
        let mut devices = self.devices.write();
        if devices.contains_key(device.device_id()) {
            return false;
        }
        tracing::debug!(device = %device.device_id(), "Adding device to repository");
        devices.insert(device.device_id().clone(), device);
        true
    }

    /// Returns `true` if a device with this id is registered.
    #[must_use]
    pub fn has_device(&self, device_id: &str) -> bool {
        self.devices.read().contains_key(device_id)
    }

    /// Returns the device with this id.
    #[must_use]
    pub fn get_device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.devices.read().get(device_id).cloned()
    }

    /// Returns all registered devices.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().values().cloned().collect()
    }

    /// Returns all registered device ids.
    #[must_use]
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.read().keys().cloned().collect()
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns `true` if no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
