//! Document-save sniffer
//!
//! Watches intercepted host requests for the document editor's save
//! endpoint. A well-formed save carries a `bundles` form field of JSON
//! revision data; anything that fails to parse falls back to a coarser
//! raw-capture event rather than being dropped, so a change in the host's
//! save API still leaves enough on the wire to reconstruct what happened.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::config::ObserveConfig;
use crate::relay::Dispatcher;

/// Origin marker stamped on events forwarded from page scripts
pub const ORIGIN_CLIENT_PAGE: &str = "client-page";

/// Liberal match: `save` usually appears early in the path, but on the
/// first few requests of a page load it can sit towards the end.
static SAVE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i).*://docs\.google\.com/document/.*/save").expect("save URL pattern")
});

static DOC_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/document/(?:[a-z]/)?d/([^/?#]+)").expect("doc id pattern"));

/// Opaque descriptor of one intercepted host request
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub url: String,
    /// Form fields from the request body, if any
    pub form_data: HashMap<String, String>,
    /// Request timestamp, epoch millis
    pub timestamp_ms: i64,
}

/// Returns true for the document editor's save-endpoint shape
pub fn is_document_save(url: &str) -> bool {
    SAVE_URL.is_match(url)
}

/// Extract the document id path segment, if present
pub fn document_id_from_url(url: &str) -> Option<&str> {
    DOC_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Producer that turns intercepted host requests into pipeline events
pub struct Observer {
    dispatcher: Arc<Dispatcher>,
    raw_debug: bool,
}

impl Observer {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &ObserveConfig) -> Self {
        Self {
            dispatcher,
            raw_debug: config.raw_debug,
        }
    }

    /// Announce that the relay came up in this host session
    pub fn announce_loaded(&self) {
        self.dispatcher.log("relay_loaded", Map::new());
    }

    /// Inspect one intercepted request and log whatever it yields.
    ///
    /// Never fails: a save whose payload does not parse produces the
    /// coarser `document_save_raw` shape instead of an error.
    pub fn observe_request(&self, request: &HostRequest) {
        if self.raw_debug {
            let mut payload = Map::new();
            payload.insert("url".to_string(), Value::from(request.url.clone()));
            payload.insert(
                "form_data".to_string(),
                form_data_value(&request.form_data),
            );
            self.dispatcher.log("raw_http_request", payload);
        }

        if !is_document_save(&request.url) {
            return;
        }

        let doc_id = document_id_from_url(&request.url)
            .map(Value::from)
            .unwrap_or(Value::Null);
        let rev = request
            .form_data
            .get("rev")
            .map(|r| Value::from(r.clone()))
            .unwrap_or(Value::Null);

        let bundles = request
            .form_data
            .get("bundles")
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok());

        match bundles {
            Some(bundles) => {
                let mut payload = Map::new();
                payload.insert("doc_id".to_string(), doc_id);
                payload.insert("bundles".to_string(), bundles);
                payload.insert("rev".to_string(), rev);
                payload.insert("timestamp".to_string(), Value::from(request.timestamp_ms));
                self.dispatcher.log("document_save", payload);
            }
            None => {
                // Oddball requests (text selections and the like) hit the
                // save endpoint without a parsable bundle. Capture the raw
                // form data instead of dropping the event.
                tracing::debug!(url = %request.url, "Save payload did not parse, capturing raw");
                let mut payload = Map::new();
                payload.insert("doc_id".to_string(), doc_id);
                payload.insert(
                    "form_data".to_string(),
                    form_data_value(&request.form_data),
                );
                payload.insert("rev".to_string(), rev);
                payload.insert("timestamp".to_string(), Value::from(request.timestamp_ms));
                self.dispatcher.log("document_save_raw", payload);
            }
        }
    }

    /// Forward an event built by a page script, stamping where it came from
    pub fn forward_page_event(&self, kind: &str, mut payload: Map<String, Value>) {
        payload.insert("origin".to_string(), Value::from(ORIGIN_CLIENT_PAGE));
        self.dispatcher.log(kind, payload);
    }
}

fn form_data_value(form_data: &HashMap<String, String>) -> Value {
    Value::Object(
        form_data
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::relay::Transport;
    use serde_json::json;
    use std::sync::Mutex;

    struct CaptureTransport {
        frames: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for CaptureTransport {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn send(&self, frame: &str) -> Result<()> {
            self.frames.lock().unwrap().push(frame.to_owned());
            Ok(())
        }
    }

    fn observer(raw_debug: bool) -> (Observer, Arc<Mutex<Vec<String>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(Dispatcher::new(vec![Box::new(CaptureTransport {
            frames: frames.clone(),
        })]));
        let config = ObserveConfig { raw_debug };
        (Observer::new(dispatcher, &config), frames)
    }

    fn captured(frames: &Arc<Mutex<Vec<String>>>) -> Vec<Value> {
        frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    const SAVE_URL_SAMPLE: &str =
        "https://docs.google.com/document/d/1lt_lSfEM9jd7Ga6uzENS/save?id=abc&sid=def&vc=2";

    #[test]
    fn test_save_url_predicate() {
        assert!(is_document_save(SAVE_URL_SAMPLE));
        assert!(is_document_save(
            "HTTPS://DOCS.GOOGLE.COM/document/d/XYZ/save?x=1"
        ));
        assert!(!is_document_save("https://docs.google.com/document/d/XYZ/edit"));
        assert!(!is_document_save("https://mail.google.com/save"));
    }

    #[test]
    fn test_document_id_extraction() {
        assert_eq!(
            document_id_from_url(SAVE_URL_SAMPLE),
            Some("1lt_lSfEM9jd7Ga6uzENS")
        );
        assert_eq!(document_id_from_url("https://example.com/nothing"), None);
    }

    #[test]
    fn test_well_formed_save() {
        let (observer, frames) = observer(false);
        let mut form_data = HashMap::new();
        form_data.insert("bundles".to_string(), r#"[{"commands":[]}]"#.to_string());
        form_data.insert("rev".to_string(), "41".to_string());

        observer.observe_request(&HostRequest {
            url: SAVE_URL_SAMPLE.to_string(),
            form_data,
            timestamp_ms: 1_700_000_000_000,
        });

        let events = captured(&frames);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "document_save");
        assert_eq!(events[0]["doc_id"], "1lt_lSfEM9jd7Ga6uzENS");
        assert_eq!(events[0]["bundles"], json!([{"commands": []}]));
        assert_eq!(events[0]["rev"], "41");
        assert_eq!(events[0]["timestamp"], 1_700_000_000_000_i64);
    }

    #[test]
    fn test_unparsable_save_falls_back_to_raw_shape() {
        let (observer, frames) = observer(false);
        let mut form_data = HashMap::new();
        form_data.insert("bundles".to_string(), "not json at all".to_string());
        form_data.insert("rev".to_string(), "42".to_string());

        observer.observe_request(&HostRequest {
            url: SAVE_URL_SAMPLE.to_string(),
            form_data,
            timestamp_ms: 1_700_000_000_000,
        });

        let events = captured(&frames);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "document_save_raw");
        assert_eq!(events[0]["form_data"]["bundles"], "not json at all");
        assert_eq!(events[0]["rev"], "42");
    }

    #[test]
    fn test_missing_body_falls_back_to_raw_shape() {
        let (observer, frames) = observer(false);

        observer.observe_request(&HostRequest {
            url: SAVE_URL_SAMPLE.to_string(),
            form_data: HashMap::new(),
            timestamp_ms: 0,
        });

        let events = captured(&frames);
        assert_eq!(events[0]["event"], "document_save_raw");
        assert_eq!(events[0]["rev"], Value::Null);
    }

    #[test]
    fn test_uninteresting_request_is_silent() {
        let (observer, frames) = observer(false);

        observer.observe_request(&HostRequest {
            url: "https://docs.google.com/document/d/XYZ/edit".to_string(),
            form_data: HashMap::new(),
            timestamp_ms: 0,
        });

        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_raw_debug_logs_every_request() {
        let (observer, frames) = observer(true);

        observer.observe_request(&HostRequest {
            url: "https://docs.google.com/document/d/XYZ/edit".to_string(),
            form_data: HashMap::new(),
            timestamp_ms: 0,
        });

        let events = captured(&frames);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "raw_http_request");
    }

    #[test]
    fn test_page_event_forwarding_stamps_origin() {
        let (observer, frames) = observer(false);

        observer.forward_page_event(
            "keystroke",
            crate::event::payload(json!({"key": "a"})),
        );

        let events = captured(&frames);
        assert_eq!(events[0]["event"], "keystroke");
        assert_eq!(events[0]["origin"], ORIGIN_CLIENT_PAGE);
    }
}
