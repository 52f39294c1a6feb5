//! Engine adapter seam
//!
//! The declarative-infrastructure engine is an external collaborator. This
//! module defines the trait surface the orchestrator drives it through,
//! plus the environment and configuration conventions shared by every
//! adapter: secrets are injected as `SST_SECRET_<NAME>`, the state
//! passphrase under a fixed variable, and provider settings are flattened
//! to `<provider>:<key>` / `<provider>:<key>[<index>]` entries.

use crate::error::Result;
use crate::event::EngineEvent;
use crate::snapshot::StateSnapshot;
use crate::urn::Urn;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

/// Environment variable the engine reads the state passphrase from
pub const PASSPHRASE_ENV: &str = "STACK_CONFIG_PASSPHRASE";

/// Prefix under which decrypted secrets are exposed to the engine process
pub const SECRET_ENV_PREFIX: &str = "SST_SECRET_";

/// Name prefix of the engine's transient marker files in the working
/// directory; lock release deletes these so a released stage leaves no
/// stale artifacts behind
pub const ENGINE_MARKER_PREFIX: &str = "Stack";

/// Settings for the file-backed workspace an engine stack runs in
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    /// The run's working directory
    pub workdir: PathBuf,
    /// The engine's own home/config directory
    pub engine_home: PathBuf,
    /// Project (app) name the stack belongs to
    pub project: String,
    /// Language runtime of the infrastructure program
    pub runtime: String,
    /// State backend URL, file-backed at the working directory
    pub backend_url: String,
    /// Compiled program entry point; absent for state-only operations
    pub entrypoint: Option<PathBuf>,
    /// Full environment for the engine process
    pub env: BTreeMap<String, String>,
}

/// A single configuration value for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue {
    pub value: String,
    pub secret: bool,
}

impl ConfigValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }
}

/// Flattened engine configuration, keyed `<provider>:<key>`
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Factory for engine stack instances
pub trait Engine: Send + Sync {
    /// Select the named stack in the workspace, creating it when `create`
    /// is set and it does not exist yet
    fn select_stack(
        &self,
        workspace: &WorkspaceSettings,
        stage: &str,
        create: bool,
    ) -> Result<Box<dyn StackHandle>>;
}

/// One engine stack instance
///
/// The three run operations block until the engine operation fully
/// completes or fails, streaming progress onto `events` as they go. The
/// sender is consumed so the channel disconnects when the operation
/// returns, which is how the aggregator knows the stream is done.
pub trait StackHandle {
    fn set_config(&mut self, config: &ConfigMap) -> Result<()>;

    fn apply(&mut self, events: Sender<EngineEvent>) -> Result<()>;
    fn destroy(&mut self, events: Sender<EngineEvent>) -> Result<()>;
    fn refresh(&mut self, events: Sender<EngineEvent>) -> Result<()>;

    /// Export the stack's current state snapshot
    fn export(&mut self) -> Result<StateSnapshot>;

    /// Replace the stack's state with the given snapshot
    fn import(&mut self, snapshot: &StateSnapshot) -> Result<()>;

    /// Refresh only the given resources against their live attributes
    fn refresh_targets(&mut self, targets: &[Urn]) -> Result<()>;
}

/// Flatten provider settings into engine configuration entries
///
/// Scalars become `<provider>:<key>`; sequences become
/// `<provider>:<key>[<index>]` per element. Entries for which `skip`
/// returns true are omitted, as are values with no scalar rendering
/// (nested objects).
pub fn flatten_provider_config(
    providers: &Map<String, Value>,
    skip: &dyn Fn(&str, &str) -> bool,
) -> ConfigMap {
    let mut config = ConfigMap::new();
    for (provider, settings) in providers {
        let Value::Object(settings) = settings else {
            continue;
        };
        for (key, value) in settings {
            if skip(provider, key) {
                continue;
            }
            match value {
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        if let Some(rendered) = render_scalar(item) {
                            config.insert(
                                format!("{provider}:{key}[{index}]"),
                                ConfigValue::plain(rendered),
                            );
                        }
                    }
                }
                other => {
                    if let Some(rendered) = render_scalar(other) {
                        config.insert(format!("{provider}:{key}"), ConfigValue::plain(rendered));
                    }
                }
            }
        }
    }
    config
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Skip rule for run operations: keys supplied to the engine another way
pub fn run_config_skip(provider: &str, key: &str) -> bool {
    provider == "cloudflare" && key == "accountId"
}

/// Skip rule for import: provider versions are never configured there
pub fn import_config_skip(_provider: &str, key: &str) -> bool {
    key == "version"
}

/// Merge the engine process environment from its three sources
///
/// `base` (the host environment) comes first, then each secret under the
/// `SST_SECRET_` convention, then the state passphrase. Later entries win.
pub fn merge_env(
    base: BTreeMap<String, String>,
    secrets: &BTreeMap<String, String>,
    passphrase: &str,
) -> BTreeMap<String, String> {
    let mut env = base;
    for (name, value) in secrets {
        env.insert(format!("{SECRET_ENV_PREFIX}{name}"), value.clone());
    }
    env.insert(PASSPHRASE_ENV.to_string(), passphrase.to_string());
    env
}

/// [`merge_env`] seeded with the host process environment
pub fn build_env(secrets: &BTreeMap<String, String>, passphrase: &str) -> BTreeMap<String, String> {
    merge_env(std::env::vars().collect(), secrets, passphrase)
}
