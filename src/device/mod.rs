// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device and switch data model.
//!
//! A [`Device`] wraps the vendor document describing one cloud device and
//! owns the [`Switch`] components derived from it. The switch layout is
//! fixed when the device is created: later updates that describe a
//! different layout are reported as [`PayloadUpdate::TopologyChanged`] and
//! never resize the switch list.
//!
//! # Examples
//!
//! ```
//! use coolkit_client::device::{Device, PayloadUpdate};
//! use serde_json::json;
//!
//! let device = Device::from_payload(json!({
//!     "deviceid": "1000a1b2c3",
//!     "apikey": "owner-key",
//!     "name": "Desk lamp",
//!     "params": {"switch": "off"}
//! }))?;
//!
//! assert_eq!(device.switches().len(), 1);
//! assert_eq!(
//!     device.merge_params(json!({"online": true})),
//!     PayloadUpdate::Applied
//! );
//! # Ok::<(), coolkit_client::Error>(())
//! ```

mod merge;
mod switch;

pub use merge::merge;
pub use switch::{StateCallback, Switch};

pub(crate) use merge::outlet_of;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::error::{DeviceError, ParseError, Result};
use crate::event::DeviceId;

/// `controlType` sent when the device params do not carry one.
pub const DEFAULT_CONTROL_TYPE: i64 = 4;

/// Wire value of a switch state.
#[must_use]
pub fn switch_value(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

/// Outcome of merging a partial document into a device payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadUpdate {
    /// The document was merged and the outlet layout is unchanged.
    Applied,
    /// The document was merged but describes a different outlet layout.
    /// The switch list keeps its original size.
    TopologyChanged {
        /// Number of switches fixed at construction.
        expected: usize,
        /// Number of switches the update describes.
        reported: usize,
    },
}

/// Outlet layout described by a `params` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchLayout {
    /// No switch state at all.
    None,
    /// One switch reported through a top-level `switch` field.
    Single,
    /// A `switches` array with this many entries.
    Outlets(usize),
}

impl SwitchLayout {
    /// Reads the layout of a `params` object.
    ///
    /// `switch` wins over `switches` when both are present.
    #[must_use]
    pub fn of(params: Option<&Value>) -> Self {
        let Some(params) = params else {
            return Self::None;
        };
        if params.get("switch").is_some() {
            return Self::Single;
        }
        params
            .get("switches")
            .and_then(Value::as_array)
            .map_or(Self::None, |entries| Self::Outlets(entries.len()))
    }

    /// Number of switches this layout holds.
    #[must_use]
    pub fn switch_count(self) -> usize {
        match self {
            Self::None => 0,
            Self::Single => 1,
            Self::Outlets(count) => count,
        }
    }

    /// Whether a device built with `self` can take state reported as `other`.
    ///
    /// A one-entry `switches` array addresses the same switch as `switch`.
    #[must_use]
    pub fn is_compatible(self, other: Self) -> bool {
        self.switch_count() == other.switch_count()
    }
}

/// A cloud device and its switchable outlets.
pub struct Device {
    device_id: DeviceId,
    api_key: String,
    layout: SwitchLayout,
    payload: RwLock<Value>,
    switches: Vec<Arc<Switch>>,
}

impl Device {
    /// Creates a device from a discovery or relay document.
    ///
    /// The document must carry string `deviceid` and `apikey` fields.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingField`] if either field is absent.
    pub fn from_payload(payload: Value) -> Result<Arc<Self>> {
        let device_id = payload
            .get("deviceid")
            .and_then(Value::as_str)
            .map(DeviceId::from)
            .ok_or_else(|| ParseError::MissingField("deviceid".to_string()))?;
        let api_key = payload
            .get("apikey")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ParseError::MissingField("apikey".to_string()))?;
        let layout = SwitchLayout::of(payload.get("params"));
        let count = layout.switch_count();

        Ok(Arc::new_cyclic(|device| Self {
            device_id,
            api_key,
            layout,
            payload: RwLock::new(payload),
            switches: (0..count)
                .map(|index| Arc::new(Switch::new(device.clone(), index)))
                .collect(),
        }))
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Returns the api key of the account owning the device.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the outlet layout fixed at construction.
    #[must_use]
    pub fn layout(&self) -> SwitchLayout {
        self.layout
    }

    /// Returns the switches in outlet order.
    #[must_use]
    pub fn switches(&self) -> &[Arc<Switch>] {
        &self.switches
    }

    /// Returns the switch at `index`.
    #[must_use]
    pub fn switch(&self, index: usize) -> Option<&Arc<Switch>> {
        self.switches.get(index)
    }

    /// Returns a snapshot of the whole payload.
    #[must_use]
    pub fn payload(&self) -> Value {
        self.payload.read().clone()
    }

    /// Returns a top-level payload field.
    #[must_use]
    pub fn info(&self, key: &str) -> Option<Value> {
        self.payload.read().get(key).cloned()
    }

    /// Returns a snapshot of `params`, or `Null` if absent.
    #[must_use]
    pub fn params(&self) -> Value {
        self.info("params").unwrap_or(Value::Null)
    }

    fn info_str(&self, key: &str) -> Option<String> {
        self.payload
            .read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Returns the user-given device name.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.info_str("name")
    }

    /// Returns the vendor device type code.
    #[must_use]
    pub fn device_type(&self) -> Option<String> {
        self.info_str("type")
    }

    /// Returns the product model.
    #[must_use]
    pub fn product_model(&self) -> Option<String> {
        self.info_str("productModel")
    }

    /// Returns the brand name.
    #[must_use]
    pub fn brand(&self) -> Option<String> {
        self.info_str("brandName")
    }

    /// Returns the hardware model from `extra`.
    ///
    /// Older documents nest it one level deeper, under `extra.extra.model`.
    #[must_use]
    pub fn model(&self) -> Option<String> {
        let payload = self.payload.read();
        payload
            .pointer("/extra/extra/model")
            .or_else(|| payload.pointer("/extra/model"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Returns whether the cloud reports the device as online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.payload
            .read()
            .get("online")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the `controlType` to send with commands.
    #[must_use]
    pub fn control_type(&self) -> Value {
        self.payload
            .read()
            .pointer("/params/controlType")
            .cloned()
            .unwrap_or_else(|| json!(DEFAULT_CONTROL_TYPE))
    }

    /// Merges a partial document into the payload.
    ///
    /// Only the switch fields the document itself carries are checked
    /// against the construction layout. A `switches` array is measured after
    /// merging, so a partial per-outlet push keeps the stored outlets.
    pub fn update(&self, document: Value) -> PayloadUpdate {
        let reported = {
            let mut payload = self.payload.write();
            let carried = SwitchLayout::of(document.get("params"));
            merge(&mut payload, document);
            match carried {
                SwitchLayout::None => None,
                SwitchLayout::Single => Some(SwitchLayout::Single),
                SwitchLayout::Outlets(_) => Some(SwitchLayout::Outlets(
                    payload
                        .pointer("/params/switches")
                        .and_then(Value::as_array)
                        .map_or(0, Vec::len),
                )),
            }
        };

        let Some(reported) = reported.filter(|layout| !self.layout.is_compatible(*layout)) else {
            return PayloadUpdate::Applied;
        };

        let expected = self.switches.len();
        let reported = reported.switch_count();
        tracing::warn!(
            device = %self.device_id,
            expected,
            reported,
            "Update describes a different outlet layout; switch list left unchanged"
        );
        PayloadUpdate::TopologyChanged { expected, reported }
    }

    /// Merges a partial `params` document into the payload.
    pub fn merge_params(&self, params: Value) -> PayloadUpdate {
        self.update(json!({ "params": params }))
    }

    /// Builds the command params that set switch `index` to `on`.
    ///
    /// Single-switch devices take `{"switch": ..}`. Multi-switch devices take
    /// the full current `switches` array with only this entry's `switch`
    /// field replaced.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::SwitchOutOfRange`] for an unknown index and
    /// [`DeviceError::MissingSwitches`] if the payload lost its array.
    pub fn command_params(&self, index: usize, on: bool) -> std::result::Result<Value, DeviceError> {
        let count = self.switches.len();
        if index >= count {
            return Err(DeviceError::SwitchOutOfRange { index, count });
        }
        let state = switch_value(on);
        if count == 1 {
            return Ok(json!({ "switch": state }));
        }

        let mut switches = self
            .payload
            .read()
            .pointer("/params/switches")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| DeviceError::MissingSwitches(self.device_id.to_string()))?;
        let available = switches.len();
        let entry = switches
            .get_mut(index)
            .and_then(Value::as_object_mut)
            .ok_or(DeviceError::SwitchOutOfRange {
                index,
                count: available,
            })?;
        entry.insert("switch".to_string(), Value::from(state));

        Ok(json!({ "switches": switches }))
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("device_id", &self.device_id)
            .field("api_key", &self.api_key)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.device_id,
            self.brand().unwrap_or_default(),
            self.product_model().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single() -> Arc<Device> {
        Device::from_payload(json!({
            "deviceid": "d1",
            "apikey": "owner",
            "name": "Lamp",
            "type": "10",
            "online": true,
            "brandName": "SONOFF",
            "productModel": "BASIC",
            "extra": {"extra": {"model": "PSA-BHA-GL"}},
            "params": {"switch": "off"}
        }))
        .unwrap()
    }

    fn quad() -> Arc<Device> {
        Device::from_payload(json!({
            "deviceid": "d4",
            "apikey": "owner",
            "params": {
                "controlType": 8,
                "switches": [
                    {"switch": "off", "outlet": 0},
                    {"switch": "off", "outlet": 1},
                    {"switch": "off", "outlet": 2},
                    {"switch": "off", "outlet": 3}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn single_switch_topology() {
        let device = single();
        assert_eq!(device.switches().len(), 1);
        assert_eq!(device.switches()[0].index(), 0);
    }

    #[test]
    fn multi_switch_topology_follows_array_order() {
        let device = quad();
        assert_eq!(device.switches().len(), 4);
        for (position, switch) in device.switches().iter().enumerate() {
            assert_eq!(switch.index(), position);
        }
    }

    #[test]
    fn no_switch_params_means_no_switches() {
        let device = Device::from_payload(json!({
            "deviceid": "s1",
            "apikey": "k",
            "params": {"temperature": 21}
        }))
        .unwrap();
        assert!(device.switches().is_empty());
    }

    #[test]
    fn missing_identity_fields_are_rejected() {
        let err = Device::from_payload(json!({"apikey": "k"})).unwrap_err();
        assert!(err.to_string().contains("deviceid"));
        let err = Device::from_payload(json!({"deviceid": "d"})).unwrap_err();
        assert!(err.to_string().contains("apikey"));
    }

    #[test]
    fn descriptive_accessors() {
        let device = single();
        assert_eq!(device.device_id().as_str(), "d1");
        assert_eq!(device.api_key(), "owner");
        assert_eq!(device.name().as_deref(), Some("Lamp"));
        assert_eq!(device.device_type().as_deref(), Some("10"));
        assert_eq!(device.model().as_deref(), Some("PSA-BHA-GL"));
        assert!(device.is_online());
        assert_eq!(device.to_string(), "[d1] SONOFF BASIC");
    }

    #[test]
    fn control_type_defaults_to_four() {
        assert_eq!(single().control_type(), json!(4));
        assert_eq!(quad().control_type(), json!(8));
    }

    #[test]
    fn partial_updates_accumulate() {
        let device = single();
        assert_eq!(
            device.update(json!({"params": {"online": true}})),
            PayloadUpdate::Applied
        );
        assert_eq!(
            device.update(json!({"params": {"switch": "on"}})),
            PayloadUpdate::Applied
        );
        let params = device.params();
        assert_eq!(params["online"], json!(true));
        assert_eq!(params["switch"], json!("on"));
    }

    #[test]
    fn partial_switches_push_keeps_topology() {
        let device = quad();
        let outcome = device.merge_params(json!({"switches": [{"outlet": 2, "switch": "on"}]}));
        assert_eq!(outcome, PayloadUpdate::Applied);
        assert_eq!(device.params()["switches"][2]["switch"], json!("on"));
        assert_eq!(device.params()["switches"].as_array().map(Vec::len), Some(4));
    }

    #[test]
    fn outlet_count_change_is_flagged_not_resized() {
        let device = quad();
        let outcome = device.merge_params(json!({"switches": [{"outlet": 4, "switch": "on"}]}));
        assert_eq!(
            outcome,
            PayloadUpdate::TopologyChanged {
                expected: 4,
                reported: 5
            }
        );
        assert_eq!(device.switches().len(), 4);
    }

    #[test]
    fn construction_layout_is_recorded() {
        assert_eq!(single().layout(), SwitchLayout::Single);
        assert_eq!(quad().layout(), SwitchLayout::Outlets(4));
    }

    #[test]
    fn single_switch_reporting_two_outlets_is_flagged() {
        let device = single();
        let outcome = device.merge_params(json!({"switches": [
            {"outlet": 0, "switch": "on"},
            {"outlet": 1, "switch": "off"}
        ]}));
        assert_eq!(
            outcome,
            PayloadUpdate::TopologyChanged {
                expected: 1,
                reported: 2
            }
        );
        assert_eq!(device.switches().len(), 1);
    }

    #[test]
    fn single_switch_accepts_outlet_zero_array() {
        let device = single();
        let outcome = device.merge_params(json!({"switches": [{"outlet": 0, "switch": "on"}]}));
        assert_eq!(outcome, PayloadUpdate::Applied);
        assert_eq!(device.params()["switches"][0]["switch"], json!("on"));
    }

    #[test]
    fn stray_switch_field_is_flagged_once() {
        let device = Device::from_payload(json!({
            "deviceid": "d2",
            "apikey": "owner",
            "params": {"switches": [
                {"switch": "off", "outlet": 0},
                {"switch": "off", "outlet": 1}
            ]}
        }))
        .unwrap();

        assert_eq!(
            device.merge_params(json!({"switch": "on"})),
            PayloadUpdate::TopologyChanged {
                expected: 2,
                reported: 1
            }
        );
        // The stored `switch` key does not taint later merges
        assert_eq!(
            device.merge_params(json!({"rssi": -60})),
            PayloadUpdate::Applied
        );
        assert_eq!(
            device.merge_params(json!({"switches": [{"outlet": 1, "switch": "on"}]})),
            PayloadUpdate::Applied
        );
        assert_eq!(device.switches().len(), 2);
    }

    #[test]
    fn single_switch_command_params() {
        assert_eq!(single().command_params(0, true).unwrap(), json!({"switch": "on"}));
        assert_eq!(
            single().command_params(0, false).unwrap(),
            json!({"switch": "off"})
        );
    }

    #[test]
    fn multi_switch_command_params_preserve_other_entries() {
        let device = Device::from_payload(json!({
            "deviceid": "d3",
            "apikey": "owner",
            "params": {"switches": [
                {"switch": "off", "outlet": 0},
                {"switch": "off", "outlet": 1},
                {"switch": "off", "outlet": 2}
            ]}
        }))
        .unwrap();

        let params = device.command_params(1, true).unwrap();
        assert_eq!(
            params,
            json!({"switches": [
                {"switch": "off", "outlet": 0},
                {"switch": "on", "outlet": 1},
                {"switch": "off", "outlet": 2}
            ]})
        );
        // building the command does not touch the payload
        assert_eq!(device.params()["switches"][1]["switch"], json!("off"));
    }

    #[test]
    fn command_params_index_out_of_range() {
        let err = single().command_params(1, true).unwrap_err();
        assert_eq!(err, DeviceError::SwitchOutOfRange { index: 1, count: 1 });
    }

    #[test]
    fn command_params_without_switches_array() {
        let device = quad();
        device.update(json!({"params": {"switches": null}}));
        let err = device.command_params(0, true).unwrap_err();
        assert_eq!(err, DeviceError::MissingSwitches("d4".to_string()));
    }

    #[test]
    fn switches_hold_weak_back_reference() {
        let device = single();
        let switch = Arc::clone(&device.switches()[0]);
        assert!(switch.device().is_some());
        drop(device);
        assert!(switch.device().is_none());
    }
}
