//! Resource adoption
//!
//! Importing brings an already-provisioned resource under management
//! without recreating it: the stack's snapshot is exported, a record for
//! the resource is upserted into it, the mutated snapshot is imported
//! back, and a targeted refresh fills in the live attributes. The whole
//! sequence runs under the stage lock, against an existing stack only.

use crate::backend::Backend;
use crate::engine::{
    build_env, flatten_provider_config, import_config_skip, Engine, StackHandle,
    WorkspaceSettings,
};
use crate::error::{Error, Result};
use crate::stack::Stack;
use crate::urn::{TypeToken, Urn};
use std::collections::BTreeMap;

/// What to adopt and where to hang it in the resource tree
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Type token of the resource, `<pkg>:<module>:<Name>`
    pub ty: String,
    /// Logical name the resource will be addressed by
    pub name: String,
    /// Provider-assigned identifier of the live resource
    pub id: String,
    /// Parent resource as `<type>::<name>`; top-level when absent
    pub parent: Option<String>,
}

impl Stack {
    /// Adopt an existing resource into this stack's state
    ///
    /// Returns the URN the resource now lives under. The stage must
    /// already have state; adoption never creates a stack.
    pub fn import_resource(&self, options: &ImportOptions) -> Result<Urn> {
        if options.id.is_empty() {
            return Err(Error::InvalidImport(
                "resource id must not be empty".to_string(),
            ));
        }
        let ty = TypeToken::parse(&options.ty)?;

        let (urn, parent_urn) = match &options.parent {
            Some(parent) => {
                let (parent_ty, parent_name) = parse_parent(parent)?;
                let urn = Urn::build_nested(
                    &self.key.stage,
                    &self.key.app,
                    &parent_ty,
                    &ty,
                    &options.name,
                )?;
                let parent_urn =
                    Urn::build(&self.key.stage, &self.key.app, &parent_ty, parent_name)?;
                (urn, Some(parent_urn))
            }
            None => (
                Urn::build(&self.key.stage, &self.key.app, &ty, &options.name)?,
                None,
            ),
        };
        log::info!("importing {} as {urn}", options.id);

        let _lock = self.acquire_lock()?;
        match self.pull_state() {
            Ok(()) => {}
            Err(Error::StateNotFound) => return Err(Error::StageNotFound),
            Err(e) => return Err(e),
        }

        let passphrase = self.backend.passphrase(&self.key)?;
        let workspace = WorkspaceSettings {
            workdir: self.paths.work.clone(),
            engine_home: self.paths.home.clone(),
            project: self.key.app.clone(),
            runtime: self.runtime.clone(),
            backend_url: format!("file://{}", self.paths.work.display()),
            // State surgery only, the program itself never runs
            entrypoint: None,
            env: build_env(&BTreeMap::new(), &passphrase),
        };
        let mut handle = self.engine.select_stack(&workspace, &self.key.stage, false)?;
        handle.set_config(&flatten_provider_config(&self.providers, &import_config_skip))?;

        let mut snapshot = handle.export()?;
        snapshot.upsert_resource(urn.clone(), parent_urn, &options.id, ty);
        handle.import(&snapshot)?;
        log::info!("state snapshot updated");

        handle.refresh_targets(std::slice::from_ref(&urn))?;
        log::info!("live attributes refreshed");

        self.push_state()?;
        Ok(urn)
    }
}

fn parse_parent(parent: &str) -> Result<(TypeToken, &str)> {
    let invalid = || {
        Error::InvalidImport(format!(
            "parent must be `<type>::<name>`, got `{parent}`"
        ))
    };
    let (ty, name) = parent.split_once("::").ok_or_else(invalid)?;
    if name.is_empty() {
        return Err(invalid());
    }
    Ok((TypeToken::parse(ty)?, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StackKey;
    use crate::build::PrebuiltProgram;
    use crate::engine::{ConfigMap, Engine, StackHandle};
    use crate::event::{EngineEvent, Links};
    use crate::snapshot::StateSnapshot;
    use crate::stack::StackPaths;
    use serde_json::Map;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::Sender;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockBackend {
        has_state: bool,
        pushes: AtomicUsize,
    }

    impl Backend for MockBackend {
        fn lock(&self, _key: &StackKey) -> Result<()> {
            Ok(())
        }

        fn unlock(&self, _key: &StackKey) -> Result<()> {
            Ok(())
        }

        fn pull_state(&self, _key: &StackKey, dest: &Path) -> Result<()> {
            if !self.has_state {
                return Err(Error::StateNotFound);
            }
            fs::write(dest, r#"{"version":3,"resources":[]}"#)?;
            Ok(())
        }

        fn push_state(&self, _key: &StackKey, _src: &Path) -> Result<()> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn put_links(&self, _key: &StackKey, _links: &Links) -> Result<()> {
            Ok(())
        }

        fn passphrase(&self, _key: &StackKey) -> Result<String> {
            Ok("test-passphrase".into())
        }

        fn secrets(&self, _key: &StackKey) -> Result<std::collections::BTreeMap<String, String>> {
            Ok(std::collections::BTreeMap::new())
        }
    }

    /// Engine whose stack state lives in shared memory, so tests can seed
    /// a snapshot and inspect the imported one
    #[derive(Default)]
    struct MemoryEngine {
        snapshot: Arc<Mutex<StateSnapshot>>,
        refreshed: Arc<Mutex<Vec<Urn>>>,
        create_flags: Mutex<Vec<bool>>,
        config_keys: Arc<Mutex<Vec<String>>>,
    }

    impl Engine for MemoryEngine {
        fn select_stack(
            &self,
            workspace: &WorkspaceSettings,
            _stage: &str,
            create: bool,
        ) -> Result<Box<dyn StackHandle>> {
            assert!(workspace.entrypoint.is_none());
            self.create_flags.lock().unwrap().push(create);
            Ok(Box::new(MemoryStack {
                snapshot: self.snapshot.clone(),
                refreshed: self.refreshed.clone(),
                config_keys: self.config_keys.clone(),
            }))
        }
    }

    struct MemoryStack {
        snapshot: Arc<Mutex<StateSnapshot>>,
        refreshed: Arc<Mutex<Vec<Urn>>>,
        config_keys: Arc<Mutex<Vec<String>>>,
    }

    impl StackHandle for MemoryStack {
        fn set_config(&mut self, config: &ConfigMap) -> Result<()> {
            self.config_keys
                .lock()
                .unwrap()
                .extend(config.keys().cloned());
            Ok(())
        }

        fn apply(&mut self, _events: Sender<EngineEvent>) -> Result<()> {
            unreachable!("adoption never applies")
        }

        fn destroy(&mut self, _events: Sender<EngineEvent>) -> Result<()> {
            unreachable!("adoption never destroys")
        }

        fn refresh(&mut self, _events: Sender<EngineEvent>) -> Result<()> {
            unreachable!("adoption never does a full refresh")
        }

        fn export(&mut self) -> Result<StateSnapshot> {
            Ok(self.snapshot.lock().unwrap().clone())
        }

        fn import(&mut self, snapshot: &StateSnapshot) -> Result<()> {
            *self.snapshot.lock().unwrap() = snapshot.clone();
            Ok(())
        }

        fn refresh_targets(&mut self, targets: &[Urn]) -> Result<()> {
            self.refreshed.lock().unwrap().extend(targets.to_vec());
            Ok(())
        }
    }

    fn stack(dir: &TempDir, backend: Arc<MockBackend>, engine: Arc<MemoryEngine>) -> Stack {
        let work = dir.path().join(".stagehand");
        fs::create_dir_all(&work).unwrap();
        Stack {
            key: StackKey::new("web", "prod"),
            paths: StackPaths {
                home: dir.path().join("home"),
                root: dir.path().to_path_buf(),
                platform: work.join("platform"),
                work,
            },
            runtime: "nodejs".into(),
            providers: Map::new(),
            backend,
            engine,
            builder: Arc::new(PrebuiltProgram::new(dir.path().join("dist/index.js"))),
        }
    }

    fn options(ty: &str, name: &str, id: &str) -> ImportOptions {
        ImportOptions {
            ty: ty.into(),
            name: name.into(),
            id: id.into(),
            parent: None,
        }
    }

    #[test]
    fn test_import_appends_custom_record_and_pushes() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend {
            has_state: true,
            ..Default::default()
        });
        let engine = Arc::new(MemoryEngine::default());
        let stack = stack(&dir, backend.clone(), engine.clone());

        let urn = stack
            .import_resource(&options("aws:s3:Bucket", "assets", "assets-1234"))
            .unwrap();
        assert_eq!(urn.as_str(), "urn:stack:prod::web::aws:s3:Bucket::assets");

        let snapshot = engine.snapshot.lock().unwrap();
        assert_eq!(snapshot.resources.len(), 1);
        let record = &snapshot.resources[0];
        assert_eq!(record.urn, urn);
        assert_eq!(record.id, "assets-1234");
        assert!(record.custom);
        assert!(record.parent.is_none());

        // Targeted refresh against exactly the adopted resource
        assert_eq!(*engine.refreshed.lock().unwrap(), vec![urn]);
        // The stack is selected, never created
        assert_eq!(*engine.create_flags.lock().unwrap(), vec![false]);
        assert_eq!(backend.pushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reimport_same_urn_updates_in_place() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend {
            has_state: true,
            ..Default::default()
        });
        let engine = Arc::new(MemoryEngine::default());
        let stack = stack(&dir, backend, engine.clone());

        stack
            .import_resource(&options("aws:s3:Bucket", "assets", "assets-1234"))
            .unwrap();
        stack
            .import_resource(&options("aws:s3:Bucket", "assets", "assets-5678"))
            .unwrap();

        let snapshot = engine.snapshot.lock().unwrap();
        assert_eq!(snapshot.resources.len(), 1);
        assert_eq!(snapshot.resources[0].id, "assets-5678");
    }

    #[test]
    fn test_import_with_parent_embeds_type_chain() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend {
            has_state: true,
            ..Default::default()
        });
        let engine = Arc::new(MemoryEngine::default());
        let stack = stack(&dir, backend, engine.clone());

        let urn = stack
            .import_resource(&ImportOptions {
                parent: Some("app:web:Site::frontend".into()),
                ..options("aws:s3:Bucket", "assets", "assets-1234")
            })
            .unwrap();
        assert_eq!(
            urn.as_str(),
            "urn:stack:prod::web::app:web:Site$aws:s3:Bucket::assets"
        );

        let snapshot = engine.snapshot.lock().unwrap();
        assert_eq!(
            snapshot.resources[0].parent.as_ref().unwrap().as_str(),
            "urn:stack:prod::web::app:web:Site::frontend"
        );
    }

    #[test]
    fn test_import_requires_existing_state() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::default());
        let engine = Arc::new(MemoryEngine::default());
        let stack = stack(&dir, backend.clone(), engine.clone());

        let err = stack
            .import_resource(&options("aws:s3:Bucket", "assets", "assets-1234"))
            .unwrap_err();
        assert!(matches!(err, Error::StageNotFound));
        assert!(engine.create_flags.lock().unwrap().is_empty());
        assert_eq!(backend.pushes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_import_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let stack = stack(
            &dir,
            Arc::new(MockBackend {
                has_state: true,
                ..Default::default()
            }),
            Arc::new(MemoryEngine::default()),
        );

        assert!(matches!(
            stack
                .import_resource(&options("aws:s3:Bucket", "assets", ""))
                .unwrap_err(),
            Error::InvalidImport(_)
        ));
        assert!(matches!(
            stack
                .import_resource(&options("notatoken", "assets", "id"))
                .unwrap_err(),
            Error::InvalidTypeToken(_)
        ));
        assert!(matches!(
            stack
                .import_resource(&ImportOptions {
                    parent: Some("missing-separator".into()),
                    ..options("aws:s3:Bucket", "assets", "id")
                })
                .unwrap_err(),
            Error::InvalidImport(_)
        ));
    }

    #[test]
    fn test_import_config_skips_provider_versions() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MemoryEngine::default());
        let mut stack = stack(
            &dir,
            Arc::new(MockBackend {
                has_state: true,
                ..Default::default()
            }),
            engine.clone(),
        );
        stack.providers = serde_json::json!({
            "aws": { "region": "us-east-1", "version": "6.0.0" }
        })
        .as_object()
        .unwrap()
        .clone();

        stack
            .import_resource(&options("aws:s3:Bucket", "assets", "assets-1234"))
            .unwrap();

        let keys = engine.config_keys.lock().unwrap();
        assert!(keys.contains(&"aws:region".to_string()));
        assert!(!keys.contains(&"aws:version".to_string()));
    }
}
