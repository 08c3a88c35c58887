//! Persistent-connection relay driver
//!
//! [`SocketRelay`] is the public handle: `send` enqueues a serialized
//! record and never blocks or fails, even while disconnected. A spawned
//! driver task owns the actual WebSocket connection and the
//! [`RelayState`] machine, executing the effects the machine returns:
//! opening connections, running the readiness handshake, transmitting
//! frames, and arming the reconnect timer.
//!
//! The driver is the only place that touches sockets or timers; all
//! delivery decisions live in [`super::state`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::RelayConfig;
use crate::event::EventRecord;
use crate::relay::handshake::{IdentitySource, SettingsStore, SETTINGS_KEYS};
use crate::relay::state::{Effect, Input, Prerequisite, RelayState};
use crate::relay::transport::Transport;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to one persistent-connection relay instance.
///
/// One instance per configured endpoint; instances are fully independent.
/// The underlying connection is recreated on every reconnect but the queue
/// and the handle persist for the process lifetime.
pub struct SocketRelay {
    tx: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
}

impl SocketRelay {
    /// Spawn the driver task and connect eagerly.
    pub fn spawn(
        url: String,
        config: &RelayConfig,
        identity: Arc<dyn IdentitySource>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = Driver {
            url,
            state: RelayState::new(
                config.drain,
                Duration::from_millis(config.reconnect_delay_ms),
            ),
            identity,
            settings,
            events: rx,
            shutdown: shutdown_rx,
            socket: None,
            handshake: FuturesUnordered::new(),
            reconnect_at: None,
        };
        tokio::spawn(driver.run());

        Self {
            tx,
            shutdown: shutdown_tx,
        }
    }

    /// Enqueue a record for delivery. Never blocks; never fails.
    pub fn send(&self, frame: &str) {
        // The driver only goes away on shutdown, at which point dropping
        // the frame is the intended behavior.
        let _ = self.tx.send(frame.to_owned());
    }

    /// Tear the relay down.
    ///
    /// Suppresses a pending reconnect timer and cancels in-flight
    /// prerequisite lookups; anything still queued is dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Transport for SocketRelay {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn send(&self, frame: &str) -> crate::error::Result<()> {
        SocketRelay::send(self, frame);
        Ok(())
    }
}

/// What one pass of the driver's select resolved to
enum Picked {
    Shutdown,
    Produced(Option<String>),
    SocketEvent(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    PrerequisiteReady(Prerequisite, EventRecord),
    ReconnectDue,
}

struct Driver {
    url: String,
    state: RelayState,
    identity: Arc<dyn IdentitySource>,
    settings: Arc<dyn SettingsStore>,
    events: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
    socket: Option<Socket>,
    handshake: FuturesUnordered<BoxFuture<'static, (Prerequisite, EventRecord)>>,
    reconnect_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        tracing::info!(url = %self.url, "Socket relay starting");

        // Eager first connection; the machine starts in Connecting.
        let mut inputs = std::collections::VecDeque::new();
        inputs.push_back(self.connect().await);

        loop {
            while let Some(input) = inputs.pop_front() {
                let effects = self.state.handle(input);
                for follow_up in self.execute(effects).await {
                    inputs.push_back(follow_up);
                }
            }

            match self.next_picked().await {
                Picked::Shutdown | Picked::Produced(None) => break,
                Picked::Produced(Some(frame)) => inputs.push_back(Input::Enqueue(frame)),
                Picked::SocketEvent(event) => {
                    if let Some(input) = self.socket_input(event) {
                        inputs.push_back(input);
                    }
                }
                Picked::PrerequisiteReady(prerequisite, record) => {
                    // Prerequisite records bypass the queue: the connection
                    // is known open while the handshake is in flight.
                    if self.transmit(record.to_frame()).await {
                        inputs.push_back(Input::PrerequisiteSent(prerequisite));
                    }
                }
                Picked::ReconnectDue => {
                    self.reconnect_at = None;
                    inputs.push_back(Input::ReconnectDue);
                }
            }
        }

        tracing::info!(url = %self.url, "Socket relay stopped");
    }

    async fn next_picked(&mut self) -> Picked {
        let socket_live = self.socket.is_some();
        let handshake_pending = !self.handshake.is_empty();
        let reconnect_at = self.reconnect_at;

        tokio::select! {
            _ = self.shutdown.changed() => Picked::Shutdown,
            frame = self.events.recv() => Picked::Produced(frame),
            event = next_message(&mut self.socket), if socket_live => Picked::SocketEvent(event),
            Some((prerequisite, record)) = self.handshake.next(), if handshake_pending => {
                Picked::PrerequisiteReady(prerequisite, record)
            }
            _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                Picked::ReconnectDue
            }
        }
    }

    /// Translate a socket read into a machine input.
    ///
    /// Exactly one input is produced per lost connection: the socket is
    /// dropped here, so later reads cannot double-report.
    fn socket_input(
        &mut self,
        event: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Option<Input> {
        match event {
            Some(Ok(Message::Close(frame))) => {
                self.socket = None;
                let code = frame.map(|f| u16::from(f.code));
                Some(Input::Closed(code))
            }
            // Inbound data frames are not part of the protocol; the
            // collector never acknowledges.
            Some(Ok(_)) => None,
            Some(Err(error)) => {
                tracing::debug!(error = %error, "Socket read failed");
                self.socket = None;
                Some(Input::ConnectFailed)
            }
            None => {
                self.socket = None;
                Some(Input::Closed(None))
            }
        }
    }

    async fn execute(&mut self, effects: Vec<Effect>) -> Vec<Input> {
        let mut inputs = Vec::new();
        for effect in effects {
            match effect {
                Effect::Transmit(frame) => {
                    // At-most-once: a frame handed to the sink counts as
                    // delivered; a failed write is recovered through the
                    // read path, not re-queued.
                    self.transmit(frame).await;
                }
                Effect::BeginHandshake => self.begin_handshake(),
                Effect::ScheduleReconnect(delay) => {
                    tracing::debug!(?delay, "Re-opening connection after delay");
                    self.handshake.clear();
                    self.socket = None;
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Effect::Connect => inputs.push(self.connect().await),
            }
        }
        inputs
    }

    async fn connect(&mut self) -> Input {
        match connect_async(self.url.as_str()).await {
            Ok((socket, _response)) => {
                tracing::info!(url = %self.url, "Connected");
                self.socket = Some(socket);
                Input::Opened
            }
            Err(error) => {
                tracing::debug!(url = %self.url, error = %error, "Connect failed");
                Input::ConnectFailed
            }
        }
    }

    async fn transmit(&mut self, frame: String) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            return false;
        };
        match socket.send(Message::Text(frame)).await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(error = %error, "Socket write failed");
                false
            }
        }
    }

    /// Dispatch both prerequisite lookups concurrently. Completions may
    /// arrive in either order; each one re-enters through the select loop.
    fn begin_handshake(&mut self) {
        self.handshake.clear();

        let identity = self.identity.clone();
        self.handshake.push(Box::pin(async move {
            let info = identity.fetch().await;
            let mut payload = Map::new();
            payload.insert("identity".to_string(), info);
            (
                Prerequisite::Identity,
                EventRecord::build("identity", payload),
            )
        }));

        let settings = self.settings.clone();
        self.handshake.push(Box::pin(async move {
            let values = settings.read(SETTINGS_KEYS).await;
            let mut payload = Map::new();
            payload.insert("settings".to_string(), Value::Object(values));
            (
                Prerequisite::Settings,
                EventRecord::build("settings", payload),
            )
        }));
    }
}

async fn next_message(
    socket: &mut Option<Socket>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket.as_mut() {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}
