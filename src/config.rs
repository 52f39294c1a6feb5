use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Project config file name, looked up from the working directory upward
pub const CONFIG_FILE: &str = "stagehand.json";

/// Get the user-level config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("stagehand"))
}

/// Get the default backend storage directory
pub fn backend_dir() -> Result<PathBuf> {
    let data = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data.join("stagehand"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// App name, shared by every stage of this project
    pub name: String,

    /// Language runtime of the infrastructure program
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Compiled program entry point, relative to the project root
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,

    /// Provider settings, flattened into engine config per run
    #[serde(default)]
    pub providers: Map<String, Value>,

    /// Engine binary to drive; resolved through PATH
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Backend storage directory; defaults to the user data directory
    #[serde(default)]
    pub backend: Option<String>,
}

fn default_runtime() -> String {
    "nodejs".to_string()
}

fn default_entrypoint() -> String {
    "dist/index.js".to_string()
}

fn default_engine() -> String {
    "pulumi".to_string()
}

impl ProjectConfig {
    /// Load the project config, searching upward from the working directory
    ///
    /// Returns the config together with the project root it was found in.
    pub fn load() -> Result<(Self, PathBuf)> {
        let start = env::current_dir().context("Could not determine working directory")?;
        let mut dir = start.as_path();
        loop {
            let path = dir.join(CONFIG_FILE);
            if path.is_file() {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Could not read {}", path.display()))?;
                let config: Self = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid {CONFIG_FILE} format"))?;
                return Ok((config, dir.to_path_buf()));
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => anyhow::bail!(
                    "No {CONFIG_FILE} found in {} or any parent directory",
                    start.display()
                ),
            }
        }
    }
}
