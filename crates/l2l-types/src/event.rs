//! Module events: records of module-system occurrences (load, evaluation).
//!
//! Events are opaque to the protocol except for a handful of fields it
//! inspects or rewrites when relaying them to other peers. Everything else
//! rides along in `extra` untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type of an evaluation result; its `result` is live data.
pub const DOIT_RESULT: &str = "doitresult";

/// A module-system occurrence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEvent {
    /// Event type, e.g. `"modulechange"` or `"doitresult"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Address of the module this event is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<EventOptions>,
    /// Evaluation result, for `doitresult` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Set on copies that crossed the wire.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_remote_event: bool,
    /// Session id of the peer that relayed this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session: Option<String>,
    /// Per-sender relay counter, lets receivers notice reordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Any other fields of the event.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Options attached to an event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOptions {
    /// Module the event targets, when different from `module`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_module: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModuleEvent {
    /// Create an event of the given type about `module`.
    pub fn new(kind: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            module: Some(module.into()),
            ..Default::default()
        }
    }

    /// The address this event is about: `options.targetModule` if present,
    /// else `module`.
    pub fn subject(&self) -> Option<&str> {
        self.options
            .as_ref()
            .and_then(|o| o.target_module.as_deref())
            .or(self.module.as_deref())
    }

    /// Whether this is an evaluation result event.
    pub fn is_doit_result(&self) -> bool {
        self.kind == DOIT_RESULT
    }

    /// Build the copy of this event that is sent to remote subscribers.
    ///
    /// `rewrite` maps embedded local addresses to remote ones. A `doitresult`
    /// value is replaced by its textual rendering limited to `inspect_depth`.
    /// `self` is left untouched.
    pub fn to_remote(
        &self,
        source_session: &str,
        sequence: u64,
        inspect_depth: usize,
        rewrite: impl Fn(&str) -> String,
    ) -> Self {
        let mut sendable = self.clone();
        sendable.is_remote_event = true;
        sendable.source_session = Some(source_session.to_string());
        sendable.sequence = Some(sequence);

        if sendable.is_doit_result() {
            sendable.result = sendable
                .result
                .as_ref()
                .map(|r| Value::String(inspect(r, inspect_depth)));
        }
        if let Some(target) = sendable
            .options
            .as_mut()
            .and_then(|o| o.target_module.as_mut())
        {
            *target = rewrite(target);
        }
        if let Some(module) = sendable.module.as_mut() {
            *module = rewrite(module);
        }
        sendable
    }
}

/// Render a value as text, abbreviating containers nested deeper than `depth`.
pub fn inspect(value: &Value, depth: usize) -> String {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                "[]".to_string()
            } else if depth == 0 {
                "[...]".to_string()
            } else {
                let parts: Vec<String> = items.iter().map(|v| inspect(v, depth - 1)).collect();
                format!("[{}]", parts.join(", "))
            }
        }
        Value::Object(fields) => {
            if fields.is_empty() {
                "{}".to_string()
            } else if depth == 0 {
                "{...}".to_string()
            } else {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", inspect(v, depth - 1)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
        scalar => scalar.to_string(),
    }
}
