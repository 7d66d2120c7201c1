// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Switch component of a device.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{Device, switch_value};
use crate::error::{DeviceError, Result};
use crate::relay::{CommandOutcome, CommandSink};

/// Async handler invoked with the switch and its new state.
pub type StateCallback = Arc<dyn Fn(Arc<Switch>, bool) -> BoxFuture<'static, ()> + Send + Sync>;

/// One on/off outlet of a [`Device`].
///
/// Callbacks are keyed by name and run in registration order, one after
/// the other; a slow callback delays the ones after it.
pub struct Switch {
    index: usize,
    device: Weak<Device>,
    state: AtomicBool,
    callbacks: RwLock<IndexMap<String, StateCallback>>,
}

impl Switch {
    pub(super) fn new(device: Weak<Device>, index: usize) -> Self {
        Self {
            index,
            device,
            state: AtomicBool::new(false),
            callbacks: RwLock::new(IndexMap::new()),
        }
    }

    /// Returns the position of this switch within its device.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the last known state. `false` until first observed.
    #[must_use]
    pub fn state(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }

    /// Returns the owning device, if it is still alive.
    #[must_use]
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    /// Registers a state callback under `name`, replacing any previous
    /// callback with that name in place.
    ///
    /// # Examples
    ///
    /// ```
    /// use coolkit_client::device::Device;
    /// use serde_json::json;
    ///
    /// # async fn example() -> coolkit_client::Result<()> {
    /// let device = Device::from_payload(json!({
    ///     "deviceid": "d1", "apikey": "k", "params": {"switch": "off"}
    /// }))?;
    ///
    /// device.switches()[0].add_callback("print", |switch, on| async move {
    ///     println!("outlet {} is now {}", switch.index(), if on { "on" } else { "off" });
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn add_callback<F, Fut>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Arc<Switch>, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: StateCallback =
            Arc::new(move |switch: Arc<Switch>, state: bool| -> BoxFuture<'static, ()> {
                Box::pin(callback(switch, state))
            });
        self.callbacks.write().insert(name.into(), callback);
    }

    /// Removes the callback registered under `name`.
    ///
    /// Returns `true` if a callback was removed.
    pub fn remove_callback(&self, name: &str) -> bool {
        self.callbacks.write().shift_remove(name).is_some()
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Records a new state and notifies callbacks if it changed.
    ///
    /// Callbacks are awaited sequentially before this returns. Returns
    /// `true` if the state changed.
    pub async fn update_state(self: &Arc<Self>, new_state: bool) -> bool {
        let previous = self.state.swap(new_state, Ordering::AcqRel);
        if previous == new_state {
            return false;
        }

        tracing::debug!(index = self.index, state = new_state, "Switch state changed");

        let callbacks: Vec<StateCallback> = self.callbacks.read().values().cloned().collect();
        for callback in callbacks {
            callback(Arc::clone(self), new_state).await;
        }
        true
    }

    /// Sends a command setting this switch, then records the state
    /// optimistically.
    ///
    /// A command is sent on every call, even if the switch already has the
    /// requested state. The local state is updated without waiting for the
    /// relay to confirm, so it may diverge from the device until the next
    /// push arrives.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Detached`] if the device was dropped, a device
    /// error if the command params cannot be built, or the sink's error.
    pub async fn set_state<S: CommandSink>(
        self: &Arc<Self>,
        sink: &S,
        on: bool,
    ) -> Result<CommandOutcome> {
        let device = self.device().ok_or(DeviceError::Detached)?;
        let params = device.command_params(self.index, on)?;

        let outcome = sink.send_command(device.device_id(), params.clone()).await?;

        device.merge_params(params);
        self.update_state(on).await;

        tracing::info!(
            device = %device,
            index = self.index,
            state = switch_value(on),
            outcome = ?outcome,
            "Sent switch state"
        );
        Ok(outcome)
    }
}

impl fmt::Debug for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Switch")
            .field("index", &self.index)
            .field("state", &self.state())
            .field("callbacks", &self.callbacks.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use super::*;
    use crate::event::DeviceId;

    /// Records every command instead of writing to a socket.
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(DeviceId, Value)>>,
    }

    impl CommandSink for RecordingSink {
        async fn send_command(&self, device_id: &DeviceId, params: Value) -> Result<CommandOutcome> {
            self.sent.lock().push((device_id.clone(), params));
            Ok(CommandOutcome::Sent {
                sequence: "1".to_string(),
            })
        }
    }

    fn single() -> Arc<Device> {
        Device::from_payload(json!({
            "deviceid": "d1", "apikey": "k", "params": {"switch": "off"}
        }))
        .unwrap()
    }

    fn triple() -> Arc<Device> {
        Device::from_payload(json!({
            "deviceid": "d3",
            "apikey": "k",
            "params": {"switches": [
                {"switch": "off", "outlet": 0},
                {"switch": "off", "outlet": 1},
                {"switch": "off", "outlet": 2}
            ]}
        }))
        .unwrap()
    }

    fn counting(switch: &Switch, name: &str) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        switch.add_callback(name, move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        calls
    }

    #[test]
    fn default_state_is_off() {
        assert!(!single().switches()[0].state());
    }

    #[tokio::test]
    async fn update_state_fires_callbacks_once_per_change() {
        let device = single();
        let switch = &device.switches()[0];
        let calls = counting(switch, "count");

        assert!(switch.update_state(true).await);
        assert!(!switch.update_state(true).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(switch.state());

        assert!(switch.update_state(false).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn callbacks_receive_switch_and_state_in_registration_order() {
        let device = triple();
        let switch = &device.switches()[1];
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            switch.add_callback(name, move |switch: Arc<Switch>, on| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push((name, switch.index(), on));
                }
            });
        }

        switch.update_state(true).await;
        assert_eq!(
            *seen.lock(),
            vec![("first", 1, true), ("second", 1, true)]
        );
    }

    #[tokio::test]
    async fn re_registering_replaces_handler() {
        let device = single();
        let switch = &device.switches()[0];
        let old = counting(switch, "cb");
        let new = counting(switch, "cb");
        assert_eq!(switch.callback_count(), 1);

        switch.update_state(true).await;
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removed_callback_is_not_called() {
        let device = single();
        let switch = &device.switches()[0];
        let calls = counting(switch, "cb");

        assert!(switch.remove_callback("cb"));
        assert!(!switch.remove_callback("cb"));
        switch.update_state(true).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn set_state_single_switch_sends_switch_field() {
        let device = single();
        let sink = RecordingSink::default();

        let outcome = device.switches()[0].set_state(&sink, true).await.unwrap();

        assert!(matches!(outcome, CommandOutcome::Sent { .. }));
        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "d1");
        assert_eq!(sent[0].1, json!({"switch": "on"}));
        assert!(device.switches()[0].state());
    }

    #[tokio::test]
    async fn set_state_multi_switch_sends_full_array() {
        let device = triple();
        let sink = RecordingSink::default();

        device.switches()[1].set_state(&sink, true).await.unwrap();

        assert_eq!(
            sink.sent.lock()[0].1,
            json!({"switches": [
                {"switch": "off", "outlet": 0},
                {"switch": "on", "outlet": 1},
                {"switch": "off", "outlet": 2}
            ]})
        );
        assert!(device.switches()[1].state());
        assert!(!device.switches()[0].state());
        assert_eq!(device.params()["switches"][1]["switch"], json!("on"));
    }

    #[tokio::test]
    async fn set_state_sends_even_when_state_matches() {
        let device = single();
        let sink = RecordingSink::default();
        let calls = counting(&device.switches()[0], "cb");

        device.switches()[0].set_state(&sink, false).await.unwrap();
        device.switches()[0].set_state(&sink, false).await.unwrap();

        assert_eq!(sink.sent.lock().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn set_state_on_detached_switch_fails() {
        let device = single();
        let switch = Arc::clone(&device.switches()[0]);
        drop(device);

        let err = switch
            .set_state(&RecordingSink::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Device(DeviceError::Detached)
        ));
    }
}
