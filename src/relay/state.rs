//! Connection state machine for the persistent relay
//!
//! Pure logic, no sockets and no timers: the driver in [`super::socket`]
//! feeds [`Input`]s in and executes the returned [`Effect`]s, and tests
//! drive the machine directly with neither.
//!
//! The machine owns the three pieces of relay state for one endpoint:
//! the [`ConnectionState`], the [`Readiness`] flags for the current
//! connection, and the outbound queue of serialized frames. Nothing else
//! mutates them.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::event::EventRecord;

/// Connection lifecycle for one relay instance.
///
/// `Absent` means no connection object exists (mid-reconnect). Exactly one
/// variant holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Close in progress on the underlying connection. Part of the full
    /// lifecycle but never surfaced by [`RelayState`]: the close handler
    /// records its warning and drops straight to `Absent` within a single
    /// transition, so observers only ever see the settled state.
    Closing,
    /// Underlying connection fully closed. Never surfaced, like `Closing`.
    Closed,
    /// No connection object exists (mid-reconnect)
    Absent,
}

/// Named prerequisites of the readiness handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    /// User identity record was written to the fresh connection
    Identity,
    /// Stored settings record was written to the fresh connection
    Settings,
}

/// Prerequisites satisfied since the last (re)connection.
///
/// Replaces the original's ad hoc string-tag set with named flags; the
/// gate predicate is a pure function over this struct. Reset on every
/// connection attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub identity: bool,
    pub settings: bool,
    /// True once both prerequisites were seen and the `metadata_finished`
    /// marker went out. Gates queue draining.
    pub ready: bool,
}

impl Readiness {
    /// Both prerequisites have been satisfied for this connection
    pub fn prerequisites_met(&self) -> bool {
        self.identity && self.settings
    }

    fn mark(&mut self, prerequisite: Prerequisite) {
        match prerequisite {
            Prerequisite::Identity => self.identity = true,
            Prerequisite::Settings => self.settings = true,
        }
    }
}

/// Queue drain behavior once the connection is open and ready.
///
/// The original relay's drain loop kept exactly the newest frame queued on
/// every pass, so the trailing record only went out with the next enqueue.
/// `HoldLast` preserves that wire-visible timing; `Full` drains everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    #[default]
    HoldLast,
    Full,
}

impl DrainPolicy {
    fn keep(&self) -> usize {
        match self {
            DrainPolicy::HoldLast => 1,
            DrainPolicy::Full => 0,
        }
    }
}

/// Events fed into the machine by the driver (or by tests)
#[derive(Debug, Clone)]
pub enum Input {
    /// A producer handed over a serialized record
    Enqueue(String),
    /// The connection attempt succeeded
    Opened,
    /// The connection attempt failed, or an established connection errored
    ConnectFailed,
    /// The connection closed, with the close code if the peer sent one
    Closed(Option<u16>),
    /// One prerequisite record was successfully written to the socket
    PrerequisiteSent(Prerequisite),
    /// The reconnect timer fired
    ReconnectDue,
}

/// Side effects the driver must carry out after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write a frame to the live socket
    Transmit(String),
    /// Dispatch both prerequisite lookups for the fresh connection
    BeginHandshake,
    /// Arm the (non-repeating) reconnect timer
    ScheduleReconnect(Duration),
    /// Open a brand-new connection
    Connect,
}

/// State machine for one persistent-connection relay instance.
///
/// Construction assumes the driver opens a connection eagerly, so the
/// initial state is `Connecting`. The machine never gives up: every lost
/// connection schedules another attempt after the fixed delay.
#[derive(Debug)]
pub struct RelayState {
    conn: ConnectionState,
    readiness: Readiness,
    queue: VecDeque<String>,
    drain: DrainPolicy,
    reconnect_delay: Duration,
}

impl RelayState {
    pub fn new(drain: DrainPolicy, reconnect_delay: Duration) -> Self {
        Self {
            conn: ConnectionState::Connecting,
            readiness: Readiness::default(),
            queue: VecDeque::new(),
            drain,
            reconnect_delay,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.conn
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Apply one input, returning the effects the driver must execute.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Enqueue(frame) => {
                self.queue.push_back(frame);
                self.drain_pass()
            }
            Input::Opened => {
                // Readiness never carries over from a previous connection.
                self.conn = ConnectionState::Open;
                self.readiness = Readiness::default();
                vec![Effect::BeginHandshake]
            }
            Input::ConnectFailed => self.lose_connection("Could not connect", None),
            Input::Closed(code) => self.lose_connection("Lost connection", code),
            Input::PrerequisiteSent(prerequisite) => {
                if self.conn != ConnectionState::Open {
                    // Stale completion from a connection that already dropped.
                    return Vec::new();
                }
                self.readiness.mark(prerequisite);
                if self.readiness.prerequisites_met() && !self.readiness.ready {
                    self.readiness.ready = true;
                    let mut effects = vec![Effect::Transmit(
                        EventRecord::marker("metadata_finished").to_frame(),
                    )];
                    // Records queued while disconnected go out as soon as the
                    // gate opens rather than waiting for the next enqueue.
                    effects.extend(self.drain_pass());
                    effects
                } else {
                    Vec::new()
                }
            }
            Input::ReconnectDue => {
                if self.conn != ConnectionState::Absent {
                    return Vec::new();
                }
                self.conn = ConnectionState::Connecting;
                vec![Effect::Connect]
            }
        }
    }

    /// Shared close/error path: queue one synthetic warning, drop to
    /// `Absent`, clear readiness, arm the reconnect timer.
    fn lose_connection(&mut self, issue: &str, code: Option<u16>) -> Vec<Effect> {
        let mut payload = Map::new();
        payload.insert("issue".to_string(), Value::from(issue));
        if let Some(code) = code {
            payload.insert("code".to_string(), Value::from(code));
        }
        let warning = EventRecord::build("warning", payload);
        tracing::warn!(issue, ?code, queued = self.queue.len() + 1, "{}", issue);
        self.queue.push_back(warning.to_frame());

        self.conn = ConnectionState::Absent;
        self.readiness = Readiness::default();
        vec![Effect::ScheduleReconnect(self.reconnect_delay)]
    }

    /// Drain policy, in priority order: hold while `Absent`, transmit from
    /// the head while open and ready, otherwise hold. Close and error
    /// handling lives in [`Self::lose_connection`], not here.
    fn drain_pass(&mut self) -> Vec<Effect> {
        match self.conn {
            ConnectionState::Absent => Vec::new(),
            ConnectionState::Open if self.readiness.ready => {
                let keep = self.drain.keep();
                let mut effects = Vec::new();
                while self.queue.len() > keep {
                    match self.queue.pop_front() {
                        Some(frame) => effects.push(Effect::Transmit(frame)),
                        None => break,
                    }
                }
                effects
            }
            _ => Vec::new(),
        }
    }
}
