//! Fan-out of event records to every configured transport
//!
//! The dispatcher holds the fixed, ordered transport list assembled once
//! at startup from [`TransportsConfig`] — an explicit struct passed in by
//! the caller, not ambient module state. A record is serialized exactly
//! once; a transport that errors never prevents later transports from
//! receiving the record, and failures never propagate to producers.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::{Config, TransportsConfig};
use crate::error::Result;
use crate::event::EventRecord;
use crate::relay::handshake::{IdentitySource, SettingsStore};
use crate::relay::socket::SocketRelay;
use crate::relay::transport::{ConsoleMirror, HttpSender, Transport};

/// Fan-out point between producers and transports
pub struct Dispatcher {
    transports: Vec<Box<dyn Transport>>,
}

impl Dispatcher {
    /// Build a dispatcher from an explicit transport list (tests, embedders)
    pub fn new(transports: Vec<Box<dyn Transport>>) -> Self {
        Self { transports }
    }

    /// Assemble the configured transports, in order: console mirror,
    /// one-shot HTTP sender, persistent socket relay. Any subset may be
    /// active; the socket relay connects eagerly here.
    pub fn from_config(
        config: &Config,
        identity: Arc<dyn IdentitySource>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        let TransportsConfig {
            console,
            http_url,
            socket_url,
        } = &config.transports;

        let mut transports: Vec<Box<dyn Transport>> = Vec::new();
        if *console {
            transports.push(Box::new(ConsoleMirror));
        }
        if let Some(url) = http_url {
            transports.push(Box::new(HttpSender::new(url.clone())?));
        }
        if let Some(url) = socket_url {
            transports.push(Box::new(SocketRelay::spawn(
                url.clone(),
                &config.relay,
                identity,
                settings,
            )));
        }

        tracing::info!(
            transports = ?transports.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "Dispatcher assembled"
        );
        Ok(Self { transports })
    }

    /// Build a record from a producer payload and dispatch it.
    /// Fire-and-forget: never blocks, never returns an error.
    pub fn log(&self, kind: &str, payload: Map<String, Value>) {
        self.dispatch(&EventRecord::build(kind, payload));
    }

    /// Serialize a record once and hand it to every transport in order.
    pub fn dispatch(&self, record: &EventRecord) {
        let frame = record.to_frame();
        for transport in &self.transports {
            if let Err(error) = transport.send(&frame) {
                tracing::warn!(
                    transport = transport.name(),
                    error = %error,
                    "Transport send failed"
                );
            }
        }
    }

    /// Names of the active transports, in dispatch order
    pub fn transport_names(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.name()).collect()
    }
}
