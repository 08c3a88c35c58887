//! Event-delivery pipeline
//!
//! Producers hand finished [`crate::event::EventRecord`]s to the
//! [`Dispatcher`], which serializes each record once and fans it out to
//! every configured [`Transport`]. The console mirror and HTTP sender are
//! fire-and-forget; the [`SocketRelay`] is the reliable path, with an
//! unbounded outbound queue, a readiness handshake after every
//! (re)connection, and an unconditional reconnect loop.
//!
//! Delivery decisions live in the pure [`state::RelayState`] machine;
//! sockets and timers are confined to the driver in [`socket`].

mod dispatcher;
pub mod handshake;
mod socket;
mod state;
mod transport;

pub use dispatcher::Dispatcher;
pub use socket::SocketRelay;
pub use state::{ConnectionState, DrainPolicy, Effect, Input, Prerequisite, Readiness, RelayState};
pub use transport::{ConsoleMirror, HttpSender, Transport};
