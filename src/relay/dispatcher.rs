// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device delivery of switch updates.
//!
//! Each device gets one worker task fed by an unbounded channel, so updates
//! for the same device reach its callbacks in arrival order while a slow
//! callback on one device never holds up another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::device::Switch;
use crate::event::{ClientEvent, DeviceId, EventBus};

/// Switch states reported by one inbound message.
pub(crate) struct SwitchBatch {
    pub(crate) device_id: DeviceId,
    pub(crate) updates: Vec<(Arc<Switch>, bool)>,
}

#[derive(Debug)]
pub(crate) struct Dispatcher {
    events: EventBus,
    queues: Mutex<HashMap<DeviceId, mpsc::UnboundedSender<SwitchBatch>>>,
}

impl Dispatcher {
    pub(crate) fn new(events: EventBus) -> Self {
        Self {
            events,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Queues a batch behind any earlier batches for the same device.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn submit(&self, batch: SwitchBatch) {
        let mut queues = self.queues.lock();

        let batch = match queues.get(&batch.device_id) {
            Some(queue) => match queue.send(batch) {
                Ok(()) => return,
                // Worker died (a callback panicked); start a new one
                Err(mpsc::error::SendError(batch)) => {
                    tracing::warn!(device = %batch.device_id, "Restarting switch update worker");
                    batch
                }
            },
            None => batch,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx, self.events.clone()));
        let device_id = batch.device_id.clone();
        if tx.send(batch).is_ok() {
            queues.insert(device_id, tx);
        }
    }

    #[cfg(test)]
    pub(crate) fn worker_count(&self) -> usize {
        self.queues.lock().len()
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<SwitchBatch>, events: EventBus) {
    while let Some(batch) = rx.recv().await {
        for (switch, state) in batch.updates {
            if switch.update_state(state).await {
                events.publish(ClientEvent::SwitchChanged {
                    device_id: batch.device_id.clone(),
                    index: switch.index(),
                    state,
                });
            }
        }
    }
}
