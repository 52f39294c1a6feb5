//! Background event aggregation
//!
//! One consumer thread per run drains the engine's event channel while the
//! blocking engine call is in flight. Per event it classifies diagnostics
//! into the run result, forwards the event to the caller's sink, flags the
//! run finished on the summary event, and appends the raw event as one
//! JSON line to `event.log` for audit and offline replay. Events flow in
//! the exact order the engine produced them; a stalled sink stalls
//! delivery proportionally.

use crate::error::Result;
use crate::event::{EngineEvent, EventSink, RunError, RunResult, Severity, StackEvent};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Messages with this exact prefix duplicate per-resource diagnostics the
/// engine already emitted, so they are kept out of the captured error
/// list. Coupled to the engine's message wording.
pub const SUPPRESSED_DIAGNOSTIC_PREFIX: &str = "update failed";

/// How often the consumer wakes to check for cancellation
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Handle to the running consumer thread
pub struct Aggregator {
    handle: JoinHandle<()>,
}

impl Aggregator {
    /// Start the consumer
    ///
    /// Creates `log_path` fresh and consumes `events` until the channel
    /// disconnects or `cancel` is set. Cancellation stops the consumer
    /// without draining buffered events.
    pub fn spawn(
        events: Receiver<EngineEvent>,
        sink: Arc<dyn EventSink>,
        result: Arc<Mutex<RunResult>>,
        log_path: &Path,
        cancel: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut log_file = File::create(log_path)?;

        let handle = std::thread::spawn(move || {
            loop {
                // Checked before every receive so a cancelled consumer
                // stops immediately instead of draining the backlog first
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                let event = match events.recv_timeout(CANCEL_POLL_INTERVAL) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                };

                record_event(&event, &mut result.lock().unwrap());
                sink.on_event(&StackEvent::Engine(event.clone()));

                match serde_json::to_string(&event) {
                    Ok(line) => {
                        if let Err(e) = writeln!(log_file, "{line}") {
                            log::warn!("failed to append to event log: {e}");
                        }
                    }
                    Err(e) => log::warn!("failed to serialize engine event: {e}"),
                }
            }
        });

        Ok(Self { handle })
    }

    /// Wait for the consumer to drain and stop
    ///
    /// The run must join before the finalizer reads shared results.
    pub fn join(self) {
        if self.handle.join().is_err() {
            log::warn!("event aggregator thread panicked");
        }
    }
}

/// Classification rules applied to every event
fn record_event(event: &EngineEvent, result: &mut RunResult) {
    match event {
        EngineEvent::Diagnostic(diagnostic) if diagnostic.severity == Severity::Error => {
            if diagnostic.message.starts_with(SUPPRESSED_DIAGNOSTIC_PREFIX) {
                return;
            }
            result.errors.push(RunError {
                message: diagnostic.message.clone(),
                urn: diagnostic.urn.clone(),
            });
        }
        EngineEvent::Summary(_) => result.finished = true,
        _ => {}
    }
}
