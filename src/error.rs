// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the CoolKit client.
//!
//! Login, dispatch and relay handshake failures each have their own variant
//! so callers can tell a bad password from a rejected relay session. None of
//! them are retried by the library.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The login call was rejected (bad credentials or non-zero `error`).
    #[error("authentication failed (code {code}): {message}")]
    Authentication {
        /// Server error code, or the HTTP status when the body had none.
        code: i64,
        /// Server-provided description.
        message: String,
    },

    /// The region dispatch call failed to assign a relay host.
    #[error("dispatch failed (code {code}): {message}")]
    Dispatch {
        /// Server error code, or the HTTP status when the body had none.
        code: i64,
        /// Server-provided description.
        message: String,
    },

    /// The relay rejected the `userOnline` handshake.
    #[error("relay handshake rejected with code {code}")]
    Connection {
        /// Error code carried by the handshake reply.
        code: i64,
    },

    /// The device list call failed.
    #[error("device discovery failed (code {code}): {message}")]
    Discovery {
        /// Server error code, or the HTTP status when the body had none.
        code: i64,
        /// Server-provided description.
        message: String,
    },

    /// Error occurred during transport (HTTP or WebSocket).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a server document.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error occurred during a device operation.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// An operation needed a session that has not logged in yet.
    #[error("session is not authenticated")]
    NotAuthenticated,

    /// No relay socket is open.
    #[error("relay is not connected")]
    NotConnected,

    /// Another task already owns the relay read loop.
    #[error("relay read loop is already running")]
    AlreadyListening,

    /// Device was not found in the repository.
    #[error("device not found: {0}")]
    DeviceNotFound(String),
}

/// Errors related to transport (HTTP/WebSocket).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket connection or frame I/O failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// A header value could not be built.
    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    /// The relay closed the socket before answering the handshake.
    #[error("relay closed the connection during handshake")]
    HandshakeClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Protocol(err.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Protocol(ProtocolError::Http(err))
    }
}

/// Errors related to parsing server documents.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the document.
    #[error("missing field in response: {0}")]
    MissingField(String),

    /// Unexpected document shape.
    #[error("unexpected response format: {0}")]
    UnexpectedFormat(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(ParseError::Json(err))
    }
}

/// Errors related to device operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device payload lacks the `params.switches` array a multi-outlet
    /// command is built from.
    #[error("device {0} has no switches array in its params")]
    MissingSwitches(String),

    /// A switch index is outside the device's switch list.
    #[error("switch index {index} out of range for device with {count} switches")]
    SwitchOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of switches on the device.
        count: usize,
    },

    /// The switch outlived its owning device.
    #[error("switch is detached from its device")]
    Detached,
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
