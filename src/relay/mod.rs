// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Long-lived WebSocket connection to the vendor relay.
//!
//! After [`RelayConnection::connect`] sends the `userOnline` handshake and
//! the relay accepts it, the connection is *ready*: commands are written to
//! the socket, and [`RelayConnection::listen`] reads pushed state updates
//! until the socket closes.
//!
//! Every accepted socket gets its own connection number. A read loop only
//! ever tears down the connection it was started on, and it stops as soon as
//! that connection is closed or replaced.
//!
//! Pushed `update` messages are merged into the device payload right away.
//! The resulting switch changes are handed to a per-device worker that runs
//! the switch callbacks, so the read loop never waits on user code.

mod dispatcher;
pub mod payload;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::device::{Device, PayloadUpdate, Switch, outlet_of};
use crate::error::{Error, ProtocolError, Result};
use crate::event::{ClientEvent, DeviceId, EventBus};
use crate::repository::DeviceRepository;
use crate::session::AuthSession;
use crate::session::sign::SequenceGenerator;

use dispatcher::{Dispatcher, SwitchBatch};
use payload::{Handshake, UpdateCommand};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Write half of an accepted socket and the connection it belongs to.
struct Link {
    generation: u64,
    sink: WsWriter,
}

/// Something that can deliver a switch command to a device.
///
/// Implemented by [`RelayConnection`]; tests substitute recording sinks.
#[allow(async_fn_in_trait)]
pub trait CommandSink {
    /// Sends `params` as an update for `device_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot be delivered.
    async fn send_command(&self, device_id: &DeviceId, params: Value) -> Result<CommandOutcome>;
}

/// What happened to an outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command was written to the relay socket.
    Sent {
        /// Sequence token the command carried.
        sequence: String,
    },
    /// The relay was not ready; nothing was written.
    Suppressed,
}

impl CommandOutcome {
    /// Returns `true` if the command reached the socket.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// What [`RelayConnection::apply_inbound`] did with a pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The params were merged into a known device.
    Applied {
        /// The device that was updated.
        device_id: DeviceId,
        /// Number of switch updates queued for callbacks.
        switch_updates: usize,
    },
    /// The message named a device that is not registered.
    UnknownDevice(DeviceId),
    /// The message carried no device id or no params object.
    Ignored,
}

/// A relay session shared by the read loop and command senders.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use coolkit_client::config::{AppCredentials, ClientConfig};
/// use coolkit_client::event::EventBus;
/// use coolkit_client::relay::RelayConnection;
/// use coolkit_client::repository::DeviceRepository;
/// use coolkit_client::session::AuthSession;
///
/// # async fn example() -> coolkit_client::Result<()> {
/// let session = Arc::new(AuthSession::new(ClientConfig::new(AppCredentials::new("id", "secret")))?);
/// session.login("user@example.com", "password", "eu").await?;
///
/// let relay = Arc::new(RelayConnection::new(session, DeviceRepository::new(), EventBus::new()));
/// relay.connect().await?;
///
/// let listener = Arc::clone(&relay);
/// tokio::spawn(async move { listener.listen().await });
/// # Ok(())
/// # }
/// ```
pub struct RelayConnection {
    session: Arc<AuthSession>,
    repository: DeviceRepository,
    events: EventBus,
    sequence: SequenceGenerator,
    dispatcher: Dispatcher,
    writer: Mutex<Option<Link>>,
    reader: Mutex<Option<(u64, WsReader)>>,
    generations: AtomicU64,
    // Connection number of the live socket, 0 when there is none
    active: watch::Sender<u64>,
    ready: AtomicBool,
    connected: AtomicBool,
    listening: AtomicU64,
}

impl RelayConnection {
    /// Creates a disconnected relay bound to a session and repository.
    #[must_use]
    pub fn new(session: Arc<AuthSession>, repository: DeviceRepository, events: EventBus) -> Self {
        Self {
            session,
            repository,
            dispatcher: Dispatcher::new(events.clone()),
            events,
            sequence: SequenceGenerator::new(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            generations: AtomicU64::new(0),
            active: watch::Sender::new(0),
            ready: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            listening: AtomicU64::new(0),
        }
    }

    /// Returns `true` once the handshake was accepted and the socket is open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Returns `true` while a socket is open, including during the handshake.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Returns the device repository this relay updates.
    #[must_use]
    pub fn repository(&self) -> &DeviceRepository {
        &self.repository
    }

    /// Opens the socket and performs the `userOnline` handshake.
    ///
    /// Calling this while already connected does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before login and dispatch,
    /// [`Error::Connection`] if the relay answers with a non-zero `error`,
    /// or a transport error.
    pub async fn connect(&self) -> Result<()> {
        // Held across the handshake so concurrent callers open one socket
        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            tracing::debug!("Relay already connected");
            return Ok(());
        }

        let url = self.session.relay_url()?;
        let token = self.session.bearer_token().ok_or(Error::NotAuthenticated)?;
        let api_key = self.session.user_api_key().ok_or(Error::NotAuthenticated)?;
        let handshake = Handshake::new(
            &token,
            &api_key,
            self.session.config().profile(),
            self.sequence.next(),
        );

        tracing::info!(url = %url, "Connecting to relay");
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        self.connected.store(true, Ordering::Release);
        let (sink, source) = match perform_handshake(stream, &handshake).await {
            Ok(halves) => halves,
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let generation = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        *writer = Some(Link { generation, sink });
        *self.reader.lock().await = Some((generation, source));
        self.active.send_replace(generation);
        self.ready.store(true, Ordering::Release);
        tracing::info!(generation, "Relay handshake accepted");
        self.events.publish(ClientEvent::Connected);
        Ok(())
    }

    /// Closes the socket and clears the ready flag.
    ///
    /// A running [`listen`](Self::listen) loop on this socket returns
    /// `Ok(())` without waiting for the relay to echo the close.
    /// Disconnecting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the close frame cannot be sent.
    pub async fn disconnect(&self) -> Result<()> {
        let link = {
            let mut writer = self.writer.lock().await;
            self.ready.store(false, Ordering::Release);
            self.connected.store(false, Ordering::Release);
            self.active.send_replace(0);
            writer.take()
        };
        self.reader.lock().await.take();

        let Some(mut link) = link else {
            return Ok(());
        };
        tracing::info!(generation = link.generation, "Disconnecting from relay");
        self.events.publish(ClientEvent::disconnected(None));
        link.sink.close().await?;
        Ok(())
    }

    /// Reads pushed messages until the socket closes.
    ///
    /// Only one task may read a given socket. When the loop ends because the
    /// relay closed the socket or failed, the connection is no longer ready
    /// and must be re-established with [`connect`](Self::connect). A loop
    /// whose socket was already disconnected or replaced returns without
    /// touching the newer connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a socket,
    /// [`Error::AlreadyListening`] if another task is reading the current
    /// socket, or the transport error that ended the loop.
    pub async fn listen(&self) -> Result<()> {
        let (generation, mut source) = {
            let mut reader = self.reader.lock().await;
            let Some((generation, source)) = reader.take() else {
                let active = *self.active.borrow();
                if active != 0 && self.listening.load(Ordering::Acquire) == active {
                    return Err(Error::AlreadyListening);
                }
                return Err(Error::NotConnected);
            };
            self.listening.store(generation, Ordering::Release);
            (generation, source)
        };

        tracing::debug!(generation, "Relay read loop started");
        let result = self.read_loop(generation, &mut source).await;
        let _ = self
            .listening
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire);

        match &result {
            Ok(()) => tracing::info!(generation, "Relay read loop ended"),
            Err(e) => tracing::warn!(generation, error = %e, "Relay read loop failed"),
        }
        self.mark_down(generation, result.as_ref().err().map(ToString::to_string))
            .await;
        result
    }

    async fn read_loop(&self, generation: u64, source: &mut WsReader) -> Result<()> {
        let mut active = self.active.subscribe();
        loop {
            let frame = tokio::select! {
                frame = source.next() => frame,
                _ = active.wait_for(|current| *current != generation) => {
                    tracing::debug!(generation, "Relay connection closed locally");
                    return Ok(());
                }
            };
            let Some(frame) = frame else {
                return Ok(());
            };
            match frame? {
                Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(message) => {
                        self.apply_inbound(&message);
                    }
                    Err(e) => tracing::debug!(error = %e, "Ignoring non-JSON relay frame"),
                },
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "Relay sent close frame");
                    return Ok(());
                }
                other => tracing::trace!(frame = ?other, "Ignoring relay frame"),
            }
        }
    }

    /// Drops connection `generation` after its read loop ended.
    ///
    /// Does nothing once that connection was disconnected or replaced.
    async fn mark_down(&self, generation: u64, error: Option<String>) {
        {
            let mut writer = self.writer.lock().await;
            if writer
                .as_ref()
                .is_none_or(|link| link.generation != generation)
            {
                return;
            }
            writer.take();
            self.ready.store(false, Ordering::Release);
            self.connected.store(false, Ordering::Release);
            self.active.send_if_modified(|current| {
                let owned = *current == generation;
                if owned {
                    *current = 0;
                }
                owned
            });
        }
        self.events.publish(ClientEvent::disconnected(error));
    }

    /// Applies one pushed message to the repository.
    ///
    /// Params are merged into the device payload whatever the action. For
    /// `update` actions, the reported `switch` or `switches` states are
    /// queued for the device's switches; outlets the device does not have
    /// are skipped. Must be called from within a Tokio runtime.
    pub fn apply_inbound(&self, message: &Value) -> InboundOutcome {
        let Some(device_id) = message.get("deviceid").and_then(Value::as_str) else {
            return InboundOutcome::Ignored;
        };
        let Some(params) = message.get("params").filter(|p| p.is_object()) else {
            return InboundOutcome::Ignored;
        };

        let Some(device) = self.repository.get_device(device_id) else {
            tracing::debug!(device = %device_id, "Dropping relay message for unknown device");
            let device_id = DeviceId::from(device_id);
            self.events.publish(ClientEvent::UnknownDevice {
                device_id: device_id.clone(),
            });
            return InboundOutcome::UnknownDevice(device_id);
        };

        tracing::debug!(device = %device, params = %params, "Applying relay update");
        if let PayloadUpdate::TopologyChanged { expected, reported } =
            device.merge_params(params.clone())
        {
            self.events.publish(ClientEvent::TopologyChanged {
                device_id: device.device_id().clone(),
                expected,
                reported,
            });
        }

        let updates = if message.get("action").and_then(Value::as_str) == Some("update") {
            switch_updates(&device, params)
        } else {
            Vec::new()
        };
        let switch_updates = updates.len();
        if !updates.is_empty() {
            self.dispatcher.submit(SwitchBatch {
                device_id: device.device_id().clone(),
                updates,
            });
        }

        InboundOutcome::Applied {
            device_id: device.device_id().clone(),
            switch_updates,
        }
    }

    /// Writes an `update` command for a registered device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unregistered id,
    /// [`Error::NotAuthenticated`] without a user api key, or a transport
    /// error.
    pub async fn send_command(&self, device_id: &DeviceId, params: Value) -> Result<CommandOutcome> {
        if !self.is_ready() {
            tracing::debug!(device = %device_id, "Relay not ready; command suppressed");
            self.events.publish(ClientEvent::CommandSuppressed {
                device_id: device_id.clone(),
            });
            return Ok(CommandOutcome::Suppressed);
        }

        let device = self
            .repository
            .get_device(device_id.as_str())
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
        let user_api_key = self.session.user_api_key().ok_or(Error::NotAuthenticated)?;

        let command = UpdateCommand::new(&device, params, &user_api_key, self.sequence.next());
        let text = serde_json::to_string(&command)?;

        let mut writer = self.writer.lock().await;
        let link = writer.as_mut().ok_or(Error::NotConnected)?;
        tracing::debug!(device = %device_id, sequence = command.sequence(), "Sending update command");
        link.sink.send(Message::text(text)).await?;

        Ok(CommandOutcome::Sent {
            sequence: command.sequence().to_string(),
        })
    }
}

impl fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("ready", &self.is_ready())
            .field("connected", &self.is_connected())
            .field("generation", &*self.active.borrow())
            .field("listening", &self.listening.load(Ordering::Acquire))
            .field("devices", &self.repository.len())
            .finish_non_exhaustive()
    }
}

impl CommandSink for RelayConnection {
    async fn send_command(&self, device_id: &DeviceId, params: Value) -> Result<CommandOutcome> {
        RelayConnection::send_command(self, device_id, params).await
    }
}

/// Sends the `userOnline` handshake and waits for the relay to accept it.
async fn perform_handshake(stream: WsStream, handshake: &Handshake) -> Result<(WsWriter, WsReader)> {
    let (mut sink, mut source) = stream.split();

    sink.send(Message::text(serde_json::to_string(handshake)?))
        .await?;
    let reply = read_handshake_reply(&mut source).await?;

    let code = reply.get("error").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        tracing::error!(code, "Relay rejected handshake");
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "Failed to close rejected relay socket");
        }
        return Err(Error::Connection { code });
    }
    Ok((sink, source))
}

/// Waits for the first text frame and parses it as the handshake reply.
async fn read_handshake_reply(source: &mut WsReader) -> Result<Value> {
    while let Some(frame) = source.next().await {
        match frame? {
            Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(ProtocolError::HandshakeClosed.into())
}

/// Pairs each reported outlet state with the switch it belongs to.
fn switch_updates(device: &Device, params: &Value) -> Vec<(Arc<Switch>, bool)> {
    if let Some(state) = params.get("switch").and_then(Value::as_str) {
        return match device.switch(0) {
            Some(switch) => vec![(Arc::clone(switch), state == "on")],
            None => {
                tracing::warn!(device = %device, "Update names a switch the device does not have");
                Vec::new()
            }
        };
    }

    let Some(entries) = params.get("switches").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let outlet = outlet_of(entry)?;
            let state = entry.get("switch").and_then(Value::as_str)?;
            let switch = usize::try_from(outlet).ok().and_then(|i| device.switch(i));
            if switch.is_none() {
                tracing::warn!(device = %device, outlet, "Skipping update for unknown outlet");
            }
            switch.map(|switch| (Arc::clone(switch), state == "on"))
        })
        .collect()
}
