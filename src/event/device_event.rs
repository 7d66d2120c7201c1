// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client event types.

use super::DeviceId;

/// Events emitted by the client.
///
/// Besides lifecycle notifications, these make the silent paths of the
/// protocol observable: a command dropped before the relay is ready or a
/// push for a device that discovery has not registered yet.
///
/// # Examples
///
/// ```
/// use coolkit_client::event::{ClientEvent, DeviceId};
///
/// let event = ClientEvent::CommandSuppressed {
///     device_id: DeviceId::from("d1"),
/// };
/// assert!(event.is_dropped_message());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A device was registered in the repository.
    DeviceAdded {
        /// The ID of the added device.
        device_id: DeviceId,
    },

    /// The relay accepted the handshake.
    Connected,

    /// The relay socket was closed.
    Disconnected {
        /// Transport error if the socket dropped unexpectedly.
        error: Option<String>,
    },

    /// A command was dropped because the relay was not ready.
    CommandSuppressed {
        /// The device the command was meant for.
        device_id: DeviceId,
    },

    /// A pushed message referenced a device that is not registered.
    UnknownDevice {
        /// The unknown device ID.
        device_id: DeviceId,
    },

    /// A payload update described a different outlet layout than the one
    /// fixed when the device was created.
    TopologyChanged {
        /// The device whose payload changed shape.
        device_id: DeviceId,
        /// Number of switches fixed at construction.
        expected: usize,
        /// Number of switches described by the update.
        reported: usize,
    },

    /// A switch changed state.
    SwitchChanged {
        /// The owning device.
        device_id: DeviceId,
        /// Switch index within the device.
        index: usize,
        /// The new state.
        state: bool,
    },
}

impl ClientEvent {
    /// Returns the device ID associated with this event, if any.
    #[must_use]
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            Self::DeviceAdded { device_id }
            | Self::CommandSuppressed { device_id }
            | Self::UnknownDevice { device_id }
            | Self::TopologyChanged { device_id, .. }
            | Self::SwitchChanged { device_id, .. } => Some(device_id),
            Self::Connected | Self::Disconnected { .. } => None,
        }
    }

    /// Returns `true` if this is a relay connection event.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected { .. })
    }

    /// Returns `true` if this event reports a message that had no effect.
    #[must_use]
    pub fn is_dropped_message(&self) -> bool {
        matches!(
            self,
            Self::CommandSuppressed { .. } | Self::UnknownDevice { .. }
        )
    }

    /// Creates a device added event.
    #[must_use]
    pub fn device_added(device_id: DeviceId) -> Self {
        Self::DeviceAdded { device_id }
    }

    /// Creates a disconnected event.
    #[must_use]
    pub fn disconnected(error: Option<String>) -> Self {
        Self::Disconnected { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_extraction() {
        let id = DeviceId::from("d1");
        assert_eq!(ClientEvent::device_added(id.clone()).device_id(), Some(&id));
        assert_eq!(ClientEvent::Connected.device_id(), None);
        let changed = ClientEvent::SwitchChanged {
            device_id: id.clone(),
            index: 2,
            state: true,
        };
        assert_eq!(changed.device_id(), Some(&id));
    }

    #[test]
    fn classification() {
        assert!(ClientEvent::Connected.is_connection());
        assert!(ClientEvent::disconnected(None).is_connection());
        assert!(
            ClientEvent::UnknownDevice {
                device_id: DeviceId::from("x")
            }
            .is_dropped_message()
        );
        assert!(!ClientEvent::device_added(DeviceId::from("x")).is_dropped_message());
    }
}
