// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound relay messages.

use serde::Serialize;
use serde_json::Value;

use crate::config::DeviceProfile;
use crate::device::Device;
use crate::session::sign;

/// Protocol version announced in the handshake.
const RELAY_VERSION: u8 = 6;

/// The `userOnline` message sent right after the socket opens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    action: &'static str,
    user_agent: &'static str,
    version: u8,
    nonce: String,
    // misspelled on the wire
    #[serde(rename = "apkVesrion")]
    apk_version: String,
    os: &'static str,
    at: String,
    apikey: String,
    ts: String,
    model: String,
    rom_version: String,
    sequence: String,
}

impl Handshake {
    /// Builds a handshake with a fresh nonce and timestamp.
    #[must_use]
    pub fn new(bearer_token: &str, user_api_key: &str, profile: &DeviceProfile, sequence: String) -> Self {
        Self {
            action: "userOnline",
            user_agent: "app",
            version: RELAY_VERSION,
            nonce: sign::nonce(),
            apk_version: profile.apk_version.clone(),
            os: "ios",
            at: bearer_token.to_string(),
            apikey: user_api_key.to_string(),
            ts: sign::unix_timestamp().to_string(),
            model: profile.model.clone(),
            rom_version: profile.rom_version.clone(),
            sequence,
        }
    }
}

/// An `update` command for one device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommand {
    action: &'static str,
    user_agent: &'static str,
    params: Value,
    apikey: String,
    deviceid: String,
    sequence: String,
    control_type: Value,
    ts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    self_apikey: Option<String>,
}

impl UpdateCommand {
    /// Builds a command for `device`.
    ///
    /// Devices shared from another account carry that account's api key;
    /// for those the session's own key is added as `selfApikey`.
    #[must_use]
    pub fn new(device: &Device, params: Value, user_api_key: &str, sequence: String) -> Self {
        let self_apikey = (device.api_key() != user_api_key).then(|| user_api_key.to_string());
        Self {
            action: "update",
            user_agent: "app",
            params,
            apikey: device.api_key().to_string(),
            deviceid: device.device_id().to_string(),
            sequence,
            control_type: device.control_type(),
            ts: 0,
            self_apikey,
        }
    }

    /// Returns the sequence token.
    #[must_use]
    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    /// Returns the delegated key, if the device belongs to another account.
    #[must_use]
    pub fn self_api_key(&self) -> Option<&str> {
        self.self_apikey.as_deref()
    }
}
