//! Host-event producers
//!
//! Thin layer between the host application and the pipeline: decides which
//! intercepted requests are interesting, extracts what it can, and hands
//! fully-formed payloads to the [`crate::relay::Dispatcher`]. Nothing here
//! owns delivery state; a producer call never blocks and never fails.

mod save;

pub use save::{HostRequest, Observer, ORIGIN_CLIENT_PAGE};
