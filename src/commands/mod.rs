pub mod cancel;
pub mod deploy;
pub mod import;

use crate::config::{self, ProjectConfig};
use crate::engine::ProcessEngine;
use anyhow::{Context, Result};
use stackops::{LocalBackend, PrebuiltProgram, Stack, StackKey, StackPaths};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Wire up a stack for the given stage from the project config
pub fn load_stack(stage: &str) -> Result<Stack> {
    let (project, root) = ProjectConfig::load()?;
    let work = root.join(".stagehand");
    fs::create_dir_all(&work)
        .with_context(|| format!("Could not create {}", work.display()))?;

    let backend_root = match &project.backend {
        Some(dir) => PathBuf::from(dir),
        None => config::backend_dir()?,
    };

    Ok(Stack {
        key: StackKey::new(&project.name, stage),
        paths: StackPaths {
            home: config::config_dir()?,
            root: root.clone(),
            platform: work.join("platform"),
            work,
        },
        runtime: project.runtime,
        providers: project.providers,
        backend: Arc::new(LocalBackend::new(backend_root)),
        engine: Arc::new(ProcessEngine::new(project.engine)),
        builder: Arc::new(PrebuiltProgram::new(root.join(&project.entrypoint))),
    })
}
