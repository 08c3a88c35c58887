//! # inkstream
//!
//! Client-side writing-telemetry relay: producers observe user actions and
//! document-save events inside a host application, attach metadata, and
//! deliver the resulting records to a remote collector.
//!
//! This library provides:
//! - Event record construction with fixed metadata stamping
//! - A dispatcher fanning records out to console, HTTP, and socket transports
//! - A persistent-connection relay with a durable outbound queue, a
//!   two-phase readiness handshake, and an unconditional reconnect loop
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! producer → EventRecord::build → Dispatcher → ConsoleMirror
//!                                            → HttpSender      (fire-and-forget)
//!                                            → SocketRelay     (queued, reliable)
//! ```
//!
//! The socket relay's delivery decisions live in a pure state machine
//! (`relay::RelayState`); the driver task owns the actual connection and
//! timers. Records queue while disconnected and drain only after the
//! readiness handshake completes on a fresh connection.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inkstream::{Config, Dispatcher};
//! use inkstream::relay::handshake::{AnonymousIdentity, StaticSettings};
//!
//! # async fn run() -> inkstream::Result<()> {
//! let config = Config::load()?;
//! let dispatcher = Dispatcher::from_config(
//!     &config,
//!     Arc::new(AnonymousIdentity),
//!     Arc::new(StaticSettings::new(Default::default())),
//! )?;
//! dispatcher.log("relay_loaded", Default::default());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use event::EventRecord;
pub use relay::{Dispatcher, SocketRelay, Transport};

// Public modules
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod observe;
pub mod relay;
