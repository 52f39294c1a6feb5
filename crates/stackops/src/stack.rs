//! The run orchestrator
//!
//! One `Stack` ties the backend, engine, and program builder together for a
//! (app, stage) pair. `run` serializes access via the stage lock, syncs
//! remote state around the engine call, aggregates progress events on a
//! background consumer, and hands the caller a fully populated result
//! exactly once per locked run. Cleanup is an explicit finalizer sequence:
//! extract outputs, emit the complete event, push state, release the lock.
//! The lock release rides a drop guard so it also fires while unwinding.

use crate::aggregator::Aggregator;
use crate::backend::{Backend, StackKey};
use crate::build::{ProgramBuilder, ProgramContext, ProgramPaths};
use crate::engine::{
    build_env, flatten_provider_config, run_config_skip, Engine, StackHandle, WorkspaceSettings,
    ENGINE_MARKER_PREFIX,
};
use crate::error::{Error, Result};
use crate::event::{EventSink, NoSink, RunResult, StackEvent};
use crate::outputs;
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc, Mutex};

/// Per-run engine event log in the working directory
pub const EVENT_LOG: &str = "event.log";

/// A run operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Apply,
    Destroy,
    Refresh,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asks of a run; immutable for the run's duration
pub struct RunRequest {
    pub op: Op,
    pub dev: bool,
    /// Receives every stack event plus the tracked-file notification
    pub sink: Arc<dyn EventSink>,
    /// External cancellation signal; stops event delivery, not the engine
    pub cancel: Arc<AtomicBool>,
}

impl RunRequest {
    pub fn new(op: Op) -> Self {
        Self {
            op,
            dev: false,
            sink: Arc::new(NoSink),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Filesystem locations for a stack's project
#[derive(Debug, Clone)]
pub struct StackPaths {
    /// User-level config directory
    pub home: PathBuf,
    /// Project root (where the program lives)
    pub root: PathBuf,
    /// The run's working directory
    pub work: PathBuf,
    /// Platform support files for the program runtime
    pub platform: PathBuf,
}

/// Orchestrates deployment runs for one (app, stage) pair
pub struct Stack {
    pub key: StackKey,
    pub paths: StackPaths,
    /// Language runtime of the infrastructure program
    pub runtime: String,
    /// Raw provider settings, flattened into engine config per run
    pub providers: Map<String, Value>,
    pub backend: Arc<dyn Backend>,
    pub engine: Arc<dyn Engine>,
    pub builder: Arc<dyn ProgramBuilder>,
}

impl Stack {
    /// Execute one deployment run
    ///
    /// Returns [`Error::ConcurrentUpdate`] without touching state when the
    /// stage lock is held elsewhere, [`Error::StageNotFound`] when a
    /// non-apply operation finds no prior state, and
    /// [`Error::StackRunFailed`] when the engine operation itself failed;
    /// per-resource detail stays available in the complete event's errors.
    pub fn run(&self, request: &RunRequest) -> Result<()> {
        log::info!("running stack command: {}", request.op);
        request.sink.on_event(&StackEvent::Command {
            command: request.op.to_string(),
        });

        let lock = match self.acquire_lock() {
            Ok(guard) => guard,
            Err(Error::ConcurrentUpdate) => {
                request.sink.on_event(&StackEvent::ConcurrentUpdate);
                return Err(Error::ConcurrentUpdate);
            }
            Err(e) => return Err(e),
        };

        let result = Arc::new(Mutex::new(RunResult::default()));
        let mut handle: Option<Box<dyn StackHandle>> = None;
        let mut pushable = false;

        let outcome = self.run_locked(request, &result, &mut pushable, &mut handle);

        // Finalizer sequence, on every exit path and in this order:
        // extract outputs, emit the complete event, push state. The lock
        // guard releases last, when it drops.
        if let Some(handle) = handle.as_deref_mut() {
            if let Err(e) = self.extract_outputs(handle, &result) {
                log::warn!("output extraction failed: {e}");
            }
        }
        request
            .sink
            .on_event(&StackEvent::Complete(result.lock().unwrap().clone()));

        let push_outcome = if pushable { self.push_state() } else { Ok(()) };
        drop(lock);

        log::info!("stack command complete");
        match (outcome, push_outcome) {
            (Err(e), push) => {
                // Never let cleanup failures hide the root cause
                if let Err(push_err) = push {
                    log::warn!("state push failed: {push_err}");
                }
                Err(e)
            }
            (Ok(()), Err(push_err)) => Err(push_err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn run_locked(
        &self,
        request: &RunRequest,
        result: &Arc<Mutex<RunResult>>,
        pushable: &mut bool,
        handle_out: &mut Option<Box<dyn StackHandle>>,
    ) -> Result<()> {
        match self.pull_state() {
            Ok(()) => {}
            // A missing blob means "new stack" for apply, fatal otherwise
            Err(Error::StateNotFound) if request.op == Op::Apply => {
                log::debug!("no prior state, starting a fresh stack");
            }
            Err(Error::StateNotFound) => return Err(Error::StageNotFound),
            Err(e) => return Err(e),
        }
        *pushable = true;

        let passphrase = self.backend.passphrase(&self.key)?;
        let secrets = self.backend.secrets(&self.key)?;
        let env = build_env(&secrets, &passphrase);

        let context = ProgramContext {
            command: request.op.to_string(),
            dev: request.dev,
            paths: ProgramPaths {
                home: self.paths.home.clone(),
                root: self.paths.root.clone(),
                work: self.paths.work.clone(),
                platform: self.paths.platform.clone(),
            },
            env: env.clone(),
        };
        let built = self.builder.build(&context)?;
        request.sink.on_files(&built.inputs);
        log::info!("tracked {} program files", built.inputs.len());

        let workspace = WorkspaceSettings {
            workdir: self.paths.work.clone(),
            engine_home: self.paths.home.clone(),
            project: self.key.app.clone(),
            runtime: self.runtime.clone(),
            backend_url: format!("file://{}", self.paths.work.display()),
            entrypoint: Some(built.entrypoint),
            env,
        };
        let mut handle = self.engine.select_stack(&workspace, &self.key.stage, true)?;
        log::info!("selected stack");

        handle.set_config(&flatten_provider_config(&self.providers, &run_config_skip))?;
        log::info!("configured providers");

        let (sender, receiver) = mpsc::channel();
        let aggregator = Aggregator::spawn(
            receiver,
            request.sink.clone(),
            result.clone(),
            &self.paths.work.join(EVENT_LOG),
            request.cancel.clone(),
        )?;

        let run = match request.op {
            Op::Apply => handle.apply(sender),
            Op::Destroy => handle.destroy(sender),
            Op::Refresh => handle.refresh(sender),
        };
        // The engine dropped its sender on return; wait for the consumer
        // to drain so the finalizer sees every captured error.
        aggregator.join();
        *handle_out = Some(handle);

        log::info!("engine command finished");
        if run.is_err() {
            return Err(Error::StackRunFailed);
        }
        Ok(())
    }

    fn extract_outputs(
        &self,
        handle: &mut dyn StackHandle,
        result: &Mutex<RunResult>,
    ) -> Result<()> {
        let snapshot = handle.export()?;
        let mut result = result.lock().unwrap();
        outputs::extract(&mut result, &snapshot);

        if !result.links.is_empty() {
            self.backend.put_links(&self.key, &result.links)?;
            fs::write(
                self.paths.work.join(outputs::TYPES_FILE),
                outputs::render_type_declarations(&result.links),
            )?;
        }
        Ok(())
    }

    /// Force-release the stage lock
    ///
    /// Recovery path for the crash-while-locked window; there is no lease
    /// expiry on the lock.
    pub fn cancel(&self) -> Result<()> {
        self.backend.unlock(&self.key)
    }

    pub(crate) fn acquire_lock(&self) -> Result<LockGuard> {
        self.backend.lock(&self.key)?;
        Ok(LockGuard {
            backend: self.backend.clone(),
            key: self.key.clone(),
            workdir: self.paths.work.clone(),
        })
    }

    pub(crate) fn state_path(&self) -> PathBuf {
        self.paths
            .work
            .join(".state")
            .join("stacks")
            .join(&self.key.app)
            .join(format!("{}.json", self.key.stage))
    }

    /// Discard the local state cache and fetch the remote snapshot
    pub(crate) fn pull_state(&self) -> Result<()> {
        let state_dir = self.paths.work.join(".state");
        match fs::remove_dir_all(&state_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let path = self.state_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.backend.pull_state(&self.key, &path)
    }

    /// Upload the local working copy back to the remote store
    pub(crate) fn push_state(&self) -> Result<()> {
        self.backend.push_state(&self.key, &self.state_path())
    }
}

/// Releases the stage lock when dropped, on every exit path
///
/// Before the remote unlock it deletes the engine's transient marker files
/// from the working directory. Failures are logged, never propagated, so
/// cleanup cannot hide a root-cause error.
pub(crate) struct LockGuard {
    backend: Arc<dyn Backend>,
    key: StackKey,
    workdir: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        remove_marker_files(&self.workdir);
        if let Err(e) = self.backend.unlock(&self.key) {
            log::warn!("failed to release stage lock: {e}");
        }
    }
}

fn remove_marker_files(workdir: &Path) {
    let Ok(entries) = fs::read_dir(workdir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(ENGINE_MARKER_PREFIX)
        {
            if let Err(e) = fs::remove_file(entry.path()) {
                log::warn!("failed to remove {}: {e}", entry.path().display());
            }
        }
    }
}
