//! Lock and state backend
//!
//! The backend owns everything shared across processes for a stage: the
//! exclusive lock, the remote state blob, published links, and per-stage
//! secrets. `LocalBackend` is the directory-backed reference
//! implementation; remote stores implement the same trait.

use crate::error::{Error, Result};
use crate::event::Links;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifies the lock, remote state blob, and engine stack instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackKey {
    pub app: String,
    pub stage: String,
}

impl StackKey {
    pub fn new(app: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            stage: stage.into(),
        }
    }
}

/// Shared lock/state store for stages
///
/// Locking is strictly exclusive: `lock` fails fast with
/// [`Error::ConcurrentUpdate`] when another holder exists, it never waits
/// or queues. The state blob is single-writer-at-a-time, enforced entirely
/// by the lock.
pub trait Backend: Send + Sync {
    /// Acquire the exclusive lock for a stage
    fn lock(&self, key: &StackKey) -> Result<()>;

    /// Release the lock for a stage
    fn unlock(&self, key: &StackKey) -> Result<()>;

    /// Fetch the remote state blob into `dest`
    ///
    /// Fails with [`Error::StateNotFound`] when the stage has no state.
    fn pull_state(&self, key: &StackKey, dest: &Path) -> Result<()>;

    /// Upload the state blob at `src` for a stage
    fn push_state(&self, key: &StackKey, src: &Path) -> Result<()>;

    /// Persist the stage's published links
    fn put_links(&self, key: &StackKey, links: &Links) -> Result<()>;

    /// The passphrase encrypting the stage's state snapshot
    fn passphrase(&self, key: &StackKey) -> Result<String>;

    /// Decrypted per-stage secrets, by name
    fn secrets(&self, key: &StackKey) -> Result<BTreeMap<String, String>>;
}

/// Directory-backed backend, one subdirectory per (app, stage)
///
/// Layout: `<root>/<app>/<stage>/{lock,state.json,links.json,passphrase,secrets.json}`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn stage_dir(&self, key: &StackKey) -> PathBuf {
        self.root.join(&key.app).join(&key.stage)
    }

    fn lock_path(&self, key: &StackKey) -> PathBuf {
        self.stage_dir(key).join("lock")
    }
}

impl Backend for LocalBackend {
    fn lock(&self, key: &StackKey) -> Result<()> {
        fs::create_dir_all(self.stage_dir(key))?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(key))
        {
            Ok(_) => {
                log::debug!("locked stage {}/{}", key.app, key.stage);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::ConcurrentUpdate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn unlock(&self, key: &StackKey) -> Result<()> {
        match fs::remove_file(self.lock_path(key)) {
            Ok(()) => {
                log::debug!("unlocked stage {}/{}", key.app, key.stage);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn pull_state(&self, key: &StackKey, dest: &Path) -> Result<()> {
        let src = self.stage_dir(key).join("state.json");
        if !src.exists() {
            return Err(Error::StateNotFound);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, dest)?;
        Ok(())
    }

    fn push_state(&self, key: &StackKey, src: &Path) -> Result<()> {
        let dir = self.stage_dir(key);
        fs::create_dir_all(&dir)?;
        fs::copy(src, dir.join("state.json"))?;
        Ok(())
    }

    fn put_links(&self, key: &StackKey, links: &Links) -> Result<()> {
        let dir = self.stage_dir(key);
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(links)?;
        fs::write(dir.join("links.json"), content)?;
        Ok(())
    }

    fn passphrase(&self, key: &StackKey) -> Result<String> {
        let path = self.stage_dir(key).join("passphrase");
        if path.exists() {
            return Ok(fs::read_to_string(&path)?.trim().to_string());
        }

        // First use for this stage: derive a fresh passphrase and persist it
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seed = format!("{}/{}/{nanos}", key.app, key.stage);
        let passphrase = blake3::hash(seed.as_bytes()).to_hex().to_string();

        fs::create_dir_all(self.stage_dir(key))?;
        fs::write(&path, &passphrase)?;
        Ok(passphrase)
    }

    fn secrets(&self, key: &StackKey) -> Result<BTreeMap<String, String>> {
        let path = self.stage_dir(key).join("secrets.json");
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, LocalBackend, StackKey) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        let key = StackKey::new("web", "prod");
        (dir, backend, key)
    }

    #[test]
    fn test_second_lock_fails_until_release() {
        let (_dir, backend, key) = backend();

        backend.lock(&key).unwrap();
        assert!(matches!(backend.lock(&key), Err(Error::ConcurrentUpdate)));

        backend.unlock(&key).unwrap();
        backend.lock(&key).unwrap();
    }

    #[test]
    fn test_locks_are_scoped_per_stage() {
        let (_dir, backend, key) = backend();
        backend.lock(&key).unwrap();
        backend.lock(&StackKey::new("web", "dev")).unwrap();
    }

    #[test]
    fn test_unlock_without_lock_is_noop() {
        let (_dir, backend, key) = backend();
        backend.unlock(&key).unwrap();
    }

    #[test]
    fn test_pull_missing_state_is_not_found() {
        let (_dir, backend, key) = backend();
        let dest = _dir.path().join("work").join("state.json");
        assert!(matches!(
            backend.pull_state(&key, &dest),
            Err(Error::StateNotFound)
        ));
    }

    #[test]
    fn test_push_then_pull_round_trips() {
        let (dir, backend, key) = backend();
        let src = dir.path().join("local.json");
        fs::write(&src, r#"{"version":3,"resources":[]}"#).unwrap();

        backend.push_state(&key, &src).unwrap();

        let dest = dir.path().join("pulled.json");
        backend.pull_state(&key, &dest).unwrap();
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            r#"{"version":3,"resources":[]}"#
        );
    }

    #[test]
    fn test_passphrase_is_stable_per_stage() {
        let (_dir, backend, key) = backend();
        let first = backend.passphrase(&key).unwrap();
        let second = backend.passphrase(&key).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_secrets_default_to_empty() {
        let (dir, backend, key) = backend();
        assert!(backend.secrets(&key).unwrap().is_empty());

        let stage_dir = dir.path().join("web").join("prod");
        fs::create_dir_all(&stage_dir).unwrap();
        fs::write(stage_dir.join("secrets.json"), r#"{"DB_URL":"postgres://"}"#).unwrap();

        let secrets = backend.secrets(&key).unwrap();
        assert_eq!(secrets["DB_URL"], "postgres://");
    }

    #[test]
    fn test_put_links_writes_json() {
        let (dir, backend, key) = backend();
        let mut links = Links::new();
        links.insert("MyBucket".into(), serde_json::json!({"name": "assets"}));

        backend.put_links(&key, &links).unwrap();

        let content =
            fs::read_to_string(dir.path().join("web").join("prod").join("links.json")).unwrap();
        assert!(content.contains("MyBucket"));
    }
}
