//! Program builder seam
//!
//! Bundling the infrastructure program is an external collaborator's job.
//! The orchestrator hands it the run context (command, dev flag, paths,
//! environment) and gets back the compiled entry point plus the set of
//! source files the build read, which dev-mode watchers subscribe to.

use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Filesystem locations handed to the program's runtime context
#[derive(Debug, Clone, Serialize)]
pub struct ProgramPaths {
    pub home: PathBuf,
    pub root: PathBuf,
    pub work: PathBuf,
    pub platform: PathBuf,
}

/// The run context compiled into the infrastructure program
#[derive(Debug, Clone, Serialize)]
pub struct ProgramContext {
    pub command: String,
    pub dev: bool,
    pub paths: ProgramPaths,
    pub env: BTreeMap<String, String>,
}

/// Result of bundling the program
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// The executable entry point the engine runs
    pub entrypoint: PathBuf,
    /// Every source file the build read
    pub inputs: Vec<PathBuf>,
}

/// Compiles the infrastructure program for a run
pub trait ProgramBuilder: Send + Sync {
    fn build(&self, ctx: &ProgramContext) -> Result<BuildOutput>;
}

/// Builder that points at an already-compiled artifact
///
/// Useful when the program is bundled out of band (CI) or in tests.
#[derive(Debug, Clone)]
pub struct PrebuiltProgram {
    pub entrypoint: PathBuf,
}

impl PrebuiltProgram {
    pub fn new(entrypoint: impl Into<PathBuf>) -> Self {
        Self {
            entrypoint: entrypoint.into(),
        }
    }
}

impl ProgramBuilder for PrebuiltProgram {
    fn build(&self, _ctx: &ProgramContext) -> Result<BuildOutput> {
        Ok(BuildOutput {
            entrypoint: self.entrypoint.clone(),
            inputs: vec![self.entrypoint.clone()],
        })
    }
}
