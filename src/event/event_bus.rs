// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting client events.

use tokio::sync::broadcast;

use super::ClientEvent;

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting client events to multiple subscribers.
///
/// Backed by a tokio broadcast channel. A subscriber that falls more than
/// `capacity` events behind receives `RecvError::Lagged` and loses the
/// oldest events.
///
/// # Examples
///
/// ```
/// use coolkit_client::event::{ClientEvent, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(ClientEvent::Connected);
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event to all subscribers.
    ///
    /// Without subscribers the event is discarded.
    pub fn publish(&self, event: ClientEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
