//! Readiness-handshake collaborators
//!
//! After every (re)connection the relay sends the collector two records
//! before any queued telemetry drains: who the user is, and which settings
//! the host has stored. Both come from outside the pipeline, behind the
//! traits here. The contract for implementors: always complete, returning
//! an empty-equivalent value when nothing is available — never hang the
//! handshake on a denied permission or missing storage.

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Settings keys requested from host storage on every handshake
pub const SETTINGS_KEYS: &[&str] = &["session-tag", "user-tag", "process-server", "unique-id"];

/// Asynchronous lookup of the current user's profile
pub trait IdentitySource: Send + Sync {
    /// Fetch the current user's profile info.
    ///
    /// Must always complete; permission denial yields an empty object.
    fn fetch(&self) -> BoxFuture<'static, Value>;
}

/// Asynchronous key lookup against host-provided storage
pub trait SettingsStore: Send + Sync {
    /// Read the named keys. Missing or unavailable storage yields an empty
    /// mapping, not an error.
    fn read(&self, keys: &'static [&'static str]) -> BoxFuture<'static, Map<String, Value>>;
}

/// Identity source for hosts with no user-profile API
pub struct AnonymousIdentity;

impl IdentitySource for AnonymousIdentity {
    fn fetch(&self) -> BoxFuture<'static, Value> {
        Box::pin(async { Value::Object(Map::new()) })
    }
}

/// In-memory settings store, seeded once at startup.
///
/// Mints a `unique-id` when the seed has none, so the collector can tell
/// installations apart before any enrollment has happened.
pub struct StaticSettings {
    values: Map<String, Value>,
}

impl StaticSettings {
    pub fn new(mut values: Map<String, Value>) -> Self {
        values
            .entry("unique-id".to_string())
            .or_insert_with(|| Value::from(Uuid::new_v4().to_string()));
        Self { values }
    }
}

impl SettingsStore for StaticSettings {
    fn read(&self, keys: &'static [&'static str]) -> BoxFuture<'static, Map<String, Value>> {
        let mut out = Map::new();
        for key in keys {
            if let Some(value) = self.values.get(*key) {
                out.insert((*key).to_string(), value.clone());
            }
        }
        Box::pin(async move { out })
    }
}
