//! # Stackops
//!
//! The deployment-run orchestrator: state synchronization, locking, event
//! aggregation, and output extraction around a declarative-infrastructure
//! engine.
//!
//! ## Core Concepts
//!
//! - **Stack**: One (app, stage) pair plus the collaborators that serve it
//! - **Backend**: Remote store for state, locks, secrets, and link metadata
//! - **Engine**: The external tool that converges resources to the program's
//!   desired state, streaming progress events while it runs
//! - **RunResult**: Everything one run produced: outputs, links, warps,
//!   receivers, hints, errors, and the final resource list
//!
//! ## A run, end to end
//!
//! ```ignore
//! use stackops::{Op, RunRequest, Stack};
//!
//! let stack: Stack = /* wire up backend, engine, builder */;
//! match stack.run(&RunRequest::new(Op::Apply)) {
//!     Ok(()) => {}
//!     Err(stackops::Error::ConcurrentUpdate) => {
//!         eprintln!("another update is in progress");
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! ```
//!
//! The run serializes on the stage lock, pulls remote state, builds the
//! program, drives the engine while a background consumer aggregates its
//! events, then extracts typed outputs, emits a single complete event, and
//! pushes state back, in that order, on every exit path.
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Backend`]: State and lock storage ([`LocalBackend`] is file-based)
//! - [`Engine`] / [`StackHandle`]: The infrastructure engine adapter
//! - [`ProgramBuilder`]: Compiles the infrastructure program per run
//! - [`EventSink`]: Receives every stack event as it happens
//!
//! This keeps the orchestration logic free of hard dependencies on a
//! specific engine binary, storage service, or UI.

pub mod aggregator;
pub mod backend;
pub mod build;
pub mod engine;
pub mod error;
pub mod event;
pub mod import;
pub mod outputs;
pub mod snapshot;
pub mod stack;
pub mod urn;

// Re-export main types at crate root
pub use backend::{Backend, LocalBackend, StackKey};
pub use build::{BuildOutput, PrebuiltProgram, ProgramBuilder, ProgramContext, ProgramPaths};
pub use engine::{ConfigMap, ConfigValue, Engine, StackHandle, WorkspaceSettings};
pub use error::{Error, Result};
pub use event::{
    DiagnosticEvent, EngineEvent, EventSink, Links, NoSink, Receiver, RecordingSink, RunError,
    RunResult, Severity, StackEvent, SummaryEvent, Warp,
};
pub use import::ImportOptions;
pub use snapshot::{ResourceRecord, StateSnapshot};
pub use stack::{Op, RunRequest, Stack, StackPaths};
pub use urn::{TypeToken, Urn};
