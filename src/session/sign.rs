// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request signing and the small random/time tokens sent with requests.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use sha2::Sha256;

use crate::config::{AppCredentials, DeviceProfile};

type HmacSha256 = Hmac<Sha256>;

/// Number of digits in a request nonce.
pub const NONCE_LEN: usize = 15;

/// Protocol version sent with login.
const LOGIN_VERSION: &str = "6";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    // Anchored at the start only, matching the server's lenient check.
    Regex::new(r"^[^@]+@[^@]+\.[^@]+").expect("email pattern is valid")
});

/// Returns a fresh string of [`NONCE_LEN`] random decimal digits.
#[must_use]
pub fn nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..NONCE_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Current unix time in seconds.
#[must_use]
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Signs `body` with HMAC-SHA256 and returns the base64 digest.
///
/// # Examples
///
/// ```
/// use coolkit_client::session::sign;
///
/// let signature = sign::sign(b"secret", b"{}");
/// assert_eq!(signature.len(), 44);
/// ```
#[must_use]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Generates strictly increasing sequence tokens from the wall clock.
///
/// Each token is the unix time in milliseconds; two calls within the same
/// millisecond get consecutive values.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicI64,
}

impl SequenceGenerator {
    /// Creates a new generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence token.
    pub fn next(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate.to_string(),
                Err(current) => last = current,
            }
        }
    }
}

/// How the account is identified in the login document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Identity {
    /// Email account.
    Email(String),
    /// Phone account.
    PhoneNumber(String),
}

impl Identity {
    /// Picks `email` when the username looks like an address, else
    /// `phoneNumber`.
    #[must_use]
    pub fn from_username(username: &str) -> Self {
        if EMAIL.is_match(username) {
            Self::Email(username.to_string())
        } else {
            Self::PhoneNumber(username.to_string())
        }
    }
}

/// Body of the login request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    password: String,
    version: &'static str,
    ts: i64,
    nonce: String,
    appid: String,
    imei: String,
    os: &'static str,
    model: String,
    rom_version: String,
    app_version: String,
    #[serde(flatten)]
    identity: Identity,
}

impl LoginRequest {
    /// Builds a login document with a fresh nonce, timestamp and device
    /// instance id.
    #[must_use]
    pub fn new(
        username: &str,
        password: &str,
        credentials: &AppCredentials,
        profile: &DeviceProfile,
    ) -> Self {
        Self {
            password: password.to_string(),
            version: LOGIN_VERSION,
            ts: unix_timestamp(),
            nonce: nonce(),
            appid: credentials.app_id().to_string(),
            imei: uuid::Uuid::new_v4().to_string(),
            os: "iOS",
            model: profile.model.clone(),
            rom_version: profile.rom_version.clone(),
            app_version: profile.app_version.clone(),
            identity: Identity::from_username(username),
        }
    }

    /// Returns the account identity field.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}
