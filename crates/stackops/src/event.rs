//! Event types for deployment runs
//!
//! The engine emits a stream of typed progress events while an operation is
//! in flight. This crate wraps each of them in a `StackEvent` envelope
//! before handing them to the caller, alongside the envelope-only variants
//! (command announcement, concurrent-update notice, final result).

use crate::snapshot::ResourceRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Named, arbitrarily structured values exposed for cross-resource binding
pub type Links = BTreeMap<String, Value>;

/// Diagnostic severity reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
}

/// A diagnostic message attached to a resource (or to the run as a whole)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    #[serde(default)]
    pub urn: String,
    pub message: String,
    pub severity: Severity,
}

/// End-of-operation summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryEvent {
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub resource_changes: BTreeMap<String, u64>,
}

/// A step the engine is performing (or has performed) on one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOperationEvent {
    pub urn: String,
    #[serde(rename = "type", default)]
    pub ty: String,
    #[serde(default)]
    pub op: String,
}

/// A progress notification emitted by the engine
///
/// Payloads beyond what the aggregator inspects are opaque; unknown kinds
/// travel through `Other` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineEvent {
    Diagnostic(DiagnosticEvent),
    Summary(SummaryEvent),
    ResourcePre(ResourceOperationEvent),
    ResourceOutputs(ResourceOperationEvent),
    /// Forward-compatibility: any event kind this crate does not model
    #[serde(untagged)]
    Other(Value),
}

/// Instrumentation descriptor wiring runtime code to its infrastructure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Warp {
    #[serde(rename = "functionID", default)]
    pub function_id: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub bundle: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// What a runtime consumer is bound to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Receiver {
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// An error captured from the engine's diagnostics, in arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    pub urn: String,
}

/// The accumulated result of a run, handed to the caller exactly once
///
/// During the run only the event aggregator writes to this (`errors`,
/// `finished`); after the engine call returns only the output extractor
/// does. The two phases are temporally disjoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub links: Links,
    pub warps: BTreeMap<String, Warp>,
    pub receivers: BTreeMap<String, Receiver>,
    pub hints: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, Value>,
    pub errors: Vec<RunError>,
    pub finished: bool,
    pub resources: Vec<ResourceRecord>,
}

/// Envelope delivered to the caller's event sink
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StackEvent {
    /// Announced once at run start
    Command { command: String },
    /// A forwarded engine event, in arrival order
    Engine(EngineEvent),
    /// Raw process output surfaced by an engine adapter
    StdOut { text: String },
    /// Someone else holds the stage lock
    ConcurrentUpdate,
    /// The fully populated run result, exactly once per locked run
    Complete(RunResult),
}

/// Receiver for run events and tracked-file notifications
///
/// Implementations must tolerate being called from the aggregator thread.
/// A stalled sink stalls event delivery proportionally.
pub trait EventSink: Send + Sync {
    /// Called for every stack event, in order
    fn on_event(&self, event: &StackEvent);

    /// Called once with the files the program build read
    fn on_files(&self, _files: &[PathBuf]) {}
}

/// No-op event sink
pub struct NoSink;

impl EventSink for NoSink {
    fn on_event(&self, _event: &StackEvent) {}
}

/// Sink that records every event, for tests and replay tooling
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<StackEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the recorded events, leaving the sink empty
    pub fn drain(&self) -> Vec<StackEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &StackEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_wire_shape() {
        let event = EngineEvent::Diagnostic(DiagnosticEvent {
            urn: "urn:stack:prod::web::aws:s3:Bucket::assets".into(),
            message: "access denied".into(),
            severity: Severity::Error,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["diagnostic"]["severity"], "error");
        assert_eq!(json["diagnostic"]["message"], "access denied");

        let back: EngineEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, EngineEvent::Diagnostic(_)));
    }

    #[test]
    fn test_summary_event_defaults() {
        let event: EngineEvent = serde_json::from_str(r#"{"summary":{}}"#).unwrap();
        match event {
            EngineEvent::Summary(s) => {
                assert_eq!(s.duration_seconds, 0);
                assert!(s.resource_changes.is_empty());
            }
            other => panic!("expected summary, got {other:?}"),
        }
    }

    #[test]
    fn test_warp_decodes_from_loose_value() {
        let value = serde_json::json!({
            "functionID": "api",
            "runtime": "nodejs20.x",
            "handler": "index.handler",
            "bundle": ".stagehand/artifacts/api",
            "links": ["MyBucket"],
            "environment": { "STAGE": "prod" }
        });

        let warp: Warp = serde_json::from_value(value).unwrap();
        assert_eq!(warp.function_id, "api");
        assert_eq!(warp.links, vec!["MyBucket"]);
        assert_eq!(warp.environment["STAGE"], "prod");
    }

    #[test]
    fn test_stack_event_wire_shape() {
        let json = serde_json::to_value(StackEvent::Command {
            command: "apply".into(),
        })
        .unwrap();
        assert_eq!(json["command"]["command"], "apply");

        let json = serde_json::to_value(StackEvent::StdOut {
            text: "Updating (prod):\n".into(),
        })
        .unwrap();
        assert_eq!(json["stdOut"]["text"], "Updating (prod):\n");

        let json = serde_json::to_value(StackEvent::ConcurrentUpdate).unwrap();
        assert_eq!(json, serde_json::json!("concurrentUpdate"));
    }

    #[test]
    fn test_recording_sink_preserves_order() {
        let sink = RecordingSink::new();
        sink.on_event(&StackEvent::Command {
            command: "apply".into(),
        });
        sink.on_event(&StackEvent::ConcurrentUpdate);

        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StackEvent::Command { .. }));
        assert!(sink.drain().is_empty());
    }
}
