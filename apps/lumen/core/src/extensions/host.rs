//! Extension Host - discovers extensions and manages their lifecycle
//!
//! The ExtensionHost is the central coordinator for installed extensions. It:
//! - Discovers extension packages in the user and bundled roots
//! - Activates extensions on activation events, in parallel
//! - Tracks enabled/disabled state on disk
//! - Installs and uninstalls unpacked extension directories
//! - Kills extension-owned processes on teardown

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::context::{ExtensionContext, ProcessTracker};
use super::loader::{Extension, ModuleLoader};
use super::manifest::{ExtensionManifest, MANIFEST_FILENAME};
use crate::api::ExtensionApi;
use crate::error::{LumenError, Result};
use crate::events::{EventBus, HostEvent};
use crate::settings::HostPaths;

/// How deep below an install root a `package.json` is looked for
const DISCOVERY_DEPTH: usize = 3;

/// Serializable view of one extension
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescriptor {
    /// `publisher.name`
    pub id: String,
    pub package_path: PathBuf,
    pub manifest: ExtensionManifest,
    pub is_active: bool,
    pub is_disabled: bool,
    /// Shipped in the bundled root; cannot be uninstalled
    pub is_builtin: bool,
    /// Value returned by `activate`
    pub exports: Value,
    pub loaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

/// A loaded extension with its runtime state
struct ExtensionRecord {
    id: String,
    package_path: PathBuf,
    manifest: ExtensionManifest,
    is_builtin: bool,
    is_active: bool,
    exports: Value,
    loaded_at: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
    instance: Option<Arc<Mutex<Box<dyn Extension>>>>,
    context: Option<ExtensionContext>,
    /// Serializes activation and deactivation of this extension
    lifecycle: Arc<Mutex<()>>,
}

impl ExtensionRecord {
    fn descriptor(&self, disabled: &BTreeSet<String>) -> ExtensionDescriptor {
        ExtensionDescriptor {
            id: self.id.clone(),
            package_path: self.package_path.clone(),
            manifest: self.manifest.clone(),
            is_active: self.is_active,
            is_disabled: disabled.contains(&self.id),
            is_builtin: self.is_builtin,
            exports: self.exports.clone(),
            loaded_at: self.loaded_at,
            activated_at: self.activated_at,
        }
    }
}

/// The extension host manages all extensions and their lifecycle
pub struct ExtensionHost {
    paths: HostPaths,
    api: ExtensionApi,
    loader: ModuleLoader,
    events: EventBus,
    /// All loaded extensions, keyed by id
    extensions: RwLock<HashMap<String, ExtensionRecord>>,
    /// Ids persisted in `disabled-extensions.json`
    disabled: RwLock<BTreeSet<String>>,
    processes: Arc<ProcessTracker>,
}

impl ExtensionHost {
    /// Create a host; the disabled set is read from disk immediately
    pub fn new(paths: HostPaths, api: ExtensionApi, loader: ModuleLoader) -> Self {
        let disabled = read_disabled(&paths.disabled_file);
        Self {
            events: api.events().clone(),
            paths,
            api,
            loader,
            extensions: RwLock::new(HashMap::new()),
            disabled: RwLock::new(disabled),
            processes: Arc::new(ProcessTracker::new()),
        }
    }

    pub fn api(&self) -> &ExtensionApi {
        &self.api
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    pub fn processes(&self) -> &Arc<ProcessTracker> {
        &self.processes
    }

    // =========================================================================
    // Discovery & loading
    // =========================================================================

    /// Scan the user and bundled roots and load every extension found.
    /// A user-installed copy shadows a bundled one with the same id.
    pub async fn discover(&self) -> Vec<String> {
        let mut loaded = Vec::new();
        let roots = [
            self.paths.user_extensions.clone(),
            self.paths.bundled_extensions.clone(),
        ];

        for root in roots {
            for dir in find_extension_dirs(&root) {
                match self.load_extension(&dir).await {
                    Ok(descriptor) => loaded.push(descriptor.id),
                    Err(e) => warn!("Skipping extension at {:?}: {}", dir, e),
                }
            }
        }

        info!("Discovered {} extensions", loaded.len());
        loaded
    }

    /// Parse a manifest and register the extension (inactive)
    pub async fn load_extension(&self, path: &Path) -> Result<ExtensionDescriptor> {
        let manifest = ExtensionManifest::from_dir(path)?;
        let id = manifest.id();
        let is_builtin = path.starts_with(&self.paths.bundled_extensions);

        {
            let extensions = self.extensions.read().await;
            if let Some(existing) = extensions.get(&id) {
                debug!("Extension {} already loaded from {:?}", id, existing.package_path);
                let disabled = self.disabled.read().await;
                return Ok(existing.descriptor(&disabled));
            }
        }

        self.api.seed_configuration_defaults(&manifest.configuration_defaults());

        let record = ExtensionRecord {
            id: id.clone(),
            package_path: path.to_path_buf(),
            manifest,
            is_builtin,
            is_active: false,
            exports: Value::Null,
            loaded_at: Utc::now(),
            activated_at: None,
            instance: None,
            context: None,
            lifecycle: Arc::new(Mutex::new(())),
        };

        info!(
            "Loaded extension {} v{}{}",
            id,
            record.manifest.version,
            if is_builtin { " (bundled)" } else { "" }
        );

        let descriptor = {
            let disabled = self.disabled.read().await;
            record.descriptor(&disabled)
        };
        self.extensions.write().await.insert(id, record);
        self.events.emit(HostEvent::ExtensionsChanged);
        Ok(descriptor)
    }

    // =========================================================================
    // Activation
    // =========================================================================

    /// Activate an extension. Returns whether it is active afterwards.
    ///
    /// Disabled extensions are refused unless `force` is set. A failing
    /// `activate` is logged and the extension is still marked active, with
    /// null exports.
    pub async fn activate_extension(&self, id: &str, event: &str, force: bool) -> bool {
        let (lifecycle, manifest, package_path) = {
            let extensions = self.extensions.read().await;
            let Some(record) = extensions.get(id) else {
                warn!("Cannot activate unknown extension {}", id);
                return false;
            };
            if record.is_active {
                return true;
            }
            if !force && self.disabled.read().await.contains(id) {
                debug!("Extension {} is disabled, not activating for {}", id, event);
                return false;
            }
            (
                record.lifecycle.clone(),
                record.manifest.clone(),
                record.package_path.clone(),
            )
        };

        let _guard = lifecycle.lock().await;
        match self.extensions.read().await.get(id) {
            Some(record) if record.is_active => return true,
            Some(_) => {}
            None => return false,
        }

        info!("Activating extension {} ({})", id, event);

        let context = match ExtensionContext::new(id, &package_path, &self.paths, self.processes.clone()) {
            Ok(context) => context,
            Err(e) => {
                error!("Cannot prepare storage for {}: {}", id, e);
                return false;
            }
        };

        let mut instance = None;
        let exports = match &manifest.main {
            None => Value::Null,
            Some(main) => match self.loader.instantiate(id, main) {
                Err(e) => {
                    error!("{}", e);
                    Value::Null
                }
                Ok(mut extension) => {
                    let api = self.api.scoped(id);
                    let result = AssertUnwindSafe(extension.activate(context.clone(), api))
                        .catch_unwind()
                        .await;
                    let exports = match result {
                        Ok(Ok(exports)) => exports,
                        Ok(Err(e)) => {
                            error!("{}", LumenError::activation(id, format!("{:#}", e)));
                            Value::Null
                        }
                        Err(_) => {
                            error!("{}", LumenError::activation(id, "activate panicked"));
                            Value::Null
                        }
                    };
                    instance = Some(Arc::new(Mutex::new(extension)));
                    exports
                }
            },
        };

        {
            let mut extensions = self.extensions.write().await;
            let Some(record) = extensions.get_mut(id) else {
                // Uninstalled while activating
                context.dispose();
                return false;
            };
            record.is_active = true;
            record.exports = exports;
            record.activated_at = Some(Utc::now());
            record.instance = instance;
            record.context = Some(context);
        }

        self.events.emit(HostEvent::ExtensionsChanged);
        info!("Extension {} activated", id);
        true
    }

    /// Activate every inactive extension that declares `event` (or `*`).
    /// Activations run concurrently; one failing does not affect the others.
    pub async fn activate_by_event(&self, event: &str) -> Vec<String> {
        let workspace_open = !self.api.workspace().workspace_folders().is_empty();
        let candidates: Vec<String> = {
            let extensions = self.extensions.read().await;
            let disabled = self.disabled.read().await;
            extensions
                .values()
                .filter(|r| !r.is_active && !disabled.contains(&r.id))
                .filter(|r| r.manifest.activates_on(event, workspace_open))
                .map(|r| r.id.clone())
                .collect()
        };

        if candidates.is_empty() {
            return Vec::new();
        }
        debug!("Activation event {} matches {:?}", event, candidates);

        let results = join_all(
            candidates
                .iter()
                .map(|id| self.activate_extension(id, event, false)),
        )
        .await;

        candidates
            .into_iter()
            .zip(results)
            .filter_map(|(id, activated)| activated.then_some(id))
            .collect()
    }

    /// Deactivate an extension: call its `deactivate`, dispose its
    /// subscriptions, kill its processes and drop its providers
    pub async fn deactivate_extension(&self, id: &str) -> Result<()> {
        let lifecycle = {
            let extensions = self.extensions.read().await;
            let record = extensions
                .get(id)
                .ok_or_else(|| LumenError::not_found("extension", id))?;
            record.lifecycle.clone()
        };
        let _guard = lifecycle.lock().await;

        let (instance, context) = {
            let mut extensions = self.extensions.write().await;
            let Some(record) = extensions.get_mut(id) else {
                return Ok(());
            };
            if !record.is_active {
                debug!("Extension {} is not active, skipping deactivation", id);
                return Ok(());
            }
            record.is_active = false;
            record.exports = Value::Null;
            record.activated_at = None;
            (record.instance.take(), record.context.take())
        };

        info!("Deactivating extension {}", id);

        if let Some(instance) = instance {
            let mut extension = instance.lock().await;
            match AssertUnwindSafe(extension.deactivate()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Extension {} deactivation had errors: {:#}", id, e),
                Err(_) => error!("Extension {} panicked in deactivate", id),
            }
        }
        if let Some(context) = context {
            context.dispose();
        }
        let killed = self.processes.kill_extension(id).await;
        if killed > 0 {
            debug!("Killed {} processes of {}", killed, id);
        }
        self.api.release_extension(id);

        self.events.emit(HostEvent::ExtensionsChanged);
        info!("Extension {} deactivated", id);
        Ok(())
    }

    // =========================================================================
    // Enable / disable
    // =========================================================================

    /// Update and persist disabled-set membership without touching activation
    pub async fn set_extension_disabled(&self, id: &str, disabled: bool) -> Result<()> {
        let snapshot = {
            let mut set = self.disabled.write().await;
            let changed = if disabled {
                set.insert(id.to_string())
            } else {
                set.remove(id)
            };
            if !changed {
                return Ok(());
            }
            set.clone()
        };
        write_disabled(&self.paths.disabled_file, &snapshot).await?;
        self.events.emit(HostEvent::ExtensionsChanged);
        Ok(())
    }

    pub async fn disable_extension(&self, id: &str) -> Result<()> {
        if !self.extensions.read().await.contains_key(id) {
            return Err(LumenError::not_found("extension", id));
        }
        self.deactivate_extension(id).await?;
        self.set_extension_disabled(id, true).await?;
        info!("Extension {} disabled", id);
        Ok(())
    }

    /// Re-enable an extension and re-activate it (bypassing the disabled check)
    pub async fn enable_extension(&self, id: &str) -> Result<bool> {
        self.set_extension_disabled(id, false).await?;
        if !self.extensions.read().await.contains_key(id) {
            return Ok(false);
        }
        info!("Extension {} enabled", id);
        Ok(self.activate_extension(id, "onEnable", true).await)
    }

    pub async fn is_disabled(&self, id: &str) -> bool {
        self.disabled.read().await.contains(id)
    }

    // =========================================================================
    // Install / uninstall
    // =========================================================================

    /// Copy an unpacked extension directory into the user root and load it
    pub async fn install_from_path(&self, source: &Path) -> Result<ExtensionDescriptor> {
        let manifest = ExtensionManifest::from_dir(source)?;
        let id = manifest.id();
        let target = self.paths.user_extensions.join(&id);

        if self.extensions.read().await.contains_key(&id) {
            info!("Replacing installed extension {}", id);
            self.deactivate_extension(&id).await?;
            self.extensions.write().await.remove(&id);
        }
        if is_same_dir(source, &target).await {
            info!("{} is already in place, reloading", id);
            return self.load_extension(&target).await;
        }
        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }

        copy_dir(source, &target).await?;
        info!("Installed {} into {:?}", id, target);
        self.load_extension(&target).await
    }

    /// Deactivate, forget and delete a user-installed extension
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        let (package_path, is_builtin) = {
            let extensions = self.extensions.read().await;
            let record = extensions
                .get(id)
                .ok_or_else(|| LumenError::not_found("extension", id))?;
            (record.package_path.clone(), record.is_builtin)
        };
        if is_builtin {
            return Err(LumenError::General(format!(
                "Extension {} is bundled and cannot be uninstalled",
                id
            )));
        }

        self.deactivate_extension(id).await?;
        self.extensions.write().await.remove(id);
        self.set_extension_disabled(id, false).await?;

        if package_path.starts_with(&self.paths.user_extensions) {
            tokio::fs::remove_dir_all(&package_path).await?;
        } else {
            warn!("Not deleting {:?}: outside the user extensions root", package_path);
        }

        self.events.emit(HostEvent::ExtensionsChanged);
        info!("Extension {} uninstalled", id);
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// All loaded extensions, ordered by id
    pub async fn list_extensions(&self) -> Vec<ExtensionDescriptor> {
        let extensions = self.extensions.read().await;
        let disabled = self.disabled.read().await;
        let mut list: Vec<ExtensionDescriptor> =
            extensions.values().map(|r| r.descriptor(&disabled)).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub async fn get_extension(&self, id: &str) -> Option<ExtensionDescriptor> {
        let extensions = self.extensions.read().await;
        let disabled = self.disabled.read().await;
        extensions.get(id).map(|r| r.descriptor(&disabled))
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.extensions
            .read()
            .await
            .get(id)
            .map(|r| r.is_active)
            .unwrap_or(false)
    }

    // =========================================================================
    // Commands & teardown
    // =========================================================================

    /// Fire `onCommand:<name>` activation, then run the command
    pub async fn execute_command(&self, name: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        self.activate_by_event(&format!("onCommand:{}", name)).await;
        self.api.commands().execute_command(name, args).await
    }

    /// Deactivate everything and kill every extension-owned process
    pub async fn teardown(&self) {
        let active: Vec<String> = self
            .extensions
            .read()
            .await
            .values()
            .filter(|r| r.is_active)
            .map(|r| r.id.clone())
            .collect();

        info!("Tearing down {} active extensions", active.len());
        for id in active {
            if let Err(e) = self.deactivate_extension(&id).await {
                warn!("Failed to deactivate {}: {}", id, e);
            }
        }

        let killed = self.processes.kill_all().await;
        if killed > 0 {
            info!("Killed {} leftover extension processes", killed);
        }
    }
}

/// Directories under `root` that hold a valid extension manifest
fn find_extension_dirs(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        debug!("Extension root {:?} does not exist", root);
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(DISCOVERY_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != "node_modules" && e.file_type().is_dir());

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.path().join(MANIFEST_FILENAME).is_file() {
            continue;
        }
        match ExtensionManifest::from_dir(entry.path()) {
            Ok(_) => {
                found.push(entry.path().to_path_buf());
                walker.skip_current_dir();
            }
            Err(e) => debug!("{:?} is not an extension: {}", entry.path(), e),
        }
    }
    found
}

fn read_disabled(path: &Path) -> BTreeSet<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str::<Vec<String>>(&content)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_else(|e| {
                warn!("Ignoring malformed {:?}: {}", path, e);
                BTreeSet::new()
            }),
        Err(_) => BTreeSet::new(),
    }
}

async fn write_disabled(path: &Path, ids: &BTreeSet<String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let list: Vec<&String> = ids.iter().collect();
    tokio::fs::write(path, serde_json::to_string_pretty(&list)?).await?;
    Ok(())
}

async fn is_same_dir(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn copy_dir(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| LumenError::General(format!("Cannot read {:?}: {}", source, e)))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| LumenError::General(e.to_string()))?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&destination).await?;
        } else {
            tokio::fs::copy(entry.path(), &destination).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::extensions::ExtensionContext;

    fn write_extension(root: &Path, publisher: &str, name: &str, manifest: Value) -> PathBuf {
        let dir = root.join(format!("{}.{}", publisher, name));
        fs::create_dir_all(&dir).unwrap();
        let mut manifest = manifest;
        manifest["publisher"] = json!(publisher);
        manifest["name"] = json!(name);
        fs::write(dir.join(MANIFEST_FILENAME), manifest.to_string()).unwrap();
        dir
    }

    fn host(dir: &Path, loader: ModuleLoader) -> ExtensionHost {
        let api = ExtensionApi::new(EventBus::new(), json!({}));
        ExtensionHost::new(HostPaths::new(dir), api, loader)
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Extension for Counting {
        async fn activate(&mut self, _ctx: ExtensionContext, _api: ExtensionApi) -> anyhow::Result<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(json!({ "answer": 42 }))
        }
    }

    struct Failing;

    #[async_trait]
    impl Extension for Failing {
        async fn activate(&mut self, _ctx: ExtensionContext, _api: ExtensionApi) -> anyhow::Result<Value> {
            anyhow::bail!("missing dependency")
        }
    }

    #[tokio::test]
    async fn test_discover_finds_user_and_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        write_extension(&paths.user_extensions, "acme", "one", json!({}));
        write_extension(&paths.bundled_extensions, "lumen", "builtin", json!({}));
        // Not an extension: no publisher
        let stray = paths.user_extensions.join("stray");
        fs::create_dir_all(&stray).unwrap();
        fs::write(stray.join(MANIFEST_FILENAME), r#"{"name":"stray"}"#).unwrap();

        let host = host(dir.path(), ModuleLoader::new());
        let mut ids = host.discover().await;
        ids.sort();
        assert_eq!(ids, vec!["acme.one", "lumen.builtin"]);

        let builtin = host.get_extension("lumen.builtin").await.unwrap();
        assert!(builtin.is_builtin);
        assert!(!builtin.is_active);
    }

    #[tokio::test]
    async fn test_load_invalid_manifest_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ext = dir.path().join("broken");
        fs::create_dir_all(&ext).unwrap();
        fs::write(ext.join(MANIFEST_FILENAME), "{ nope").unwrap();

        let host = host(dir.path(), ModuleLoader::new());
        let err = host.load_extension(&ext).await.unwrap_err();
        assert!(matches!(err, LumenError::Manifest(_)));
        assert!(host.list_extensions().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_extension_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        let ext = write_extension(&paths.user_extensions, "acme", "off", json!({}));

        let host = host(dir.path(), ModuleLoader::new());
        host.load_extension(&ext).await.unwrap();
        host.disable_extension("acme.off").await.unwrap();

        assert!(!host.activate_extension("acme.off", "*", false).await);
        assert!(!host.is_active("acme.off").await);

        assert!(host.activate_extension("acme.off", "*", true).await);
        assert!(host.is_active("acme.off").await);
    }

    #[tokio::test]
    async fn test_disabled_set_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        let ext = write_extension(&paths.user_extensions, "acme", "off", json!({}));

        {
            let host = host(dir.path(), ModuleLoader::new());
            host.load_extension(&ext).await.unwrap();
            host.disable_extension("acme.off").await.unwrap();
        }

        let saved: Vec<String> =
            serde_json::from_str(&fs::read_to_string(&paths.disabled_file).unwrap()).unwrap();
        assert_eq!(saved, vec!["acme.off"]);

        let host = host(dir.path(), ModuleLoader::new());
        assert!(host.is_disabled("acme.off").await);
        host.load_extension(&ext).await.unwrap();
        assert!(host.enable_extension("acme.off").await.unwrap());
        assert!(!host.is_disabled("acme.off").await);
    }

    #[tokio::test]
    async fn test_failing_activation_still_marks_active() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        let ext = write_extension(&paths.user_extensions, "acme", "bad", json!({ "main": "./out/main.js" }));

        let loader = ModuleLoader::new();
        loader.register("acme.bad", || Box::new(Failing));
        let host = host(dir.path(), loader);
        host.load_extension(&ext).await.unwrap();

        assert!(host.activate_extension("acme.bad", "*", false).await);
        let descriptor = host.get_extension("acme.bad").await.unwrap();
        assert!(descriptor.is_active);
        assert_eq!(descriptor.exports, Value::Null);
    }

    #[tokio::test]
    async fn test_concurrent_activation_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        let ext = write_extension(
            &paths.user_extensions,
            "acme",
            "once",
            json!({ "main": "main", "activationEvents": ["onLanguage:rust"] }),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let loader = ModuleLoader::new();
        let c = calls.clone();
        loader.register("acme.once", move || Box::new(Counting(c.clone())));
        let host = host(dir.path(), loader);
        host.load_extension(&ext).await.unwrap();

        let (a, b) = tokio::join!(
            host.activate_extension("acme.once", "onLanguage:rust", false),
            host.activate_extension("acme.once", "onLanguage:rust", false)
        );
        assert!(a && b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let descriptor = host.get_extension("acme.once").await.unwrap();
        assert_eq!(descriptor.exports, json!({ "answer": 42 }));
    }

    #[tokio::test]
    async fn test_activate_by_event_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        let events = json!({ "main": "main", "activationEvents": ["onLanguage:python"] });
        let good = write_extension(&paths.user_extensions, "acme", "good", events.clone());
        let bad = write_extension(&paths.user_extensions, "acme", "bad", events);
        let other = write_extension(
            &paths.user_extensions,
            "acme",
            "other",
            json!({ "activationEvents": ["onLanguage:go"] }),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let loader = ModuleLoader::new();
        let c = calls.clone();
        loader.register("acme.good", move || Box::new(Counting(c.clone())));
        loader.register("acme.bad", || Box::new(Failing));
        let host = host(dir.path(), loader);
        for ext in [&good, &bad, &other] {
            host.load_extension(ext).await.unwrap();
        }

        let mut activated = host.activate_by_event("onLanguage:python").await;
        activated.sort();
        assert_eq!(activated, vec!["acme.bad", "acme.good"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!host.is_active("acme.other").await);
    }

    #[tokio::test]
    async fn test_install_and_uninstall() {
        let dir = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let ext = write_extension(source.path(), "acme", "copy", json!({ "version": "2.0.0" }));
        fs::create_dir_all(ext.join("out")).unwrap();
        fs::write(ext.join("out/main.js"), "// entry").unwrap();

        let host = host(dir.path(), ModuleLoader::new());
        let descriptor = host.install_from_path(&ext).await.unwrap();
        assert_eq!(descriptor.id, "acme.copy");
        let installed = host.paths().user_extensions.join("acme.copy");
        assert!(installed.join("out/main.js").is_file());

        host.uninstall("acme.copy").await.unwrap();
        assert!(!installed.exists());
        assert!(host.get_extension("acme.copy").await.is_none());
    }

    #[tokio::test]
    async fn test_reinstall_from_installed_copy_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let ext = write_extension(source.path(), "acme", "inplace", json!({ "version": "1.0.0" }));
        fs::write(ext.join("README.md"), "docs").unwrap();

        let host = host(dir.path(), ModuleLoader::new());
        host.install_from_path(&ext).await.unwrap();
        let installed = host.paths().user_extensions.join("acme.inplace");

        let descriptor = host.install_from_path(&installed).await.unwrap();
        assert_eq!(descriptor.id, "acme.inplace");
        assert!(installed.join("package.json").is_file());
        assert!(installed.join("README.md").is_file());
        assert_eq!(host.list_extensions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_bundled_cannot_be_uninstalled() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        let ext = write_extension(&paths.bundled_extensions, "lumen", "core", json!({}));

        let host = host(dir.path(), ModuleLoader::new());
        host.load_extension(&ext).await.unwrap();
        assert!(host.uninstall("lumen.core").await.is_err());
        assert!(ext.exists());
    }

    #[tokio::test]
    async fn test_on_command_activation() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        let ext = write_extension(
            &paths.user_extensions,
            "acme",
            "cmd",
            json!({
                "main": "main",
                "contributes": { "commands": [{ "command": "acme.hello", "title": "Hello" }] }
            }),
        );

        struct Greeter;

        #[async_trait]
        impl Extension for Greeter {
            async fn activate(&mut self, ctx: ExtensionContext, api: ExtensionApi) -> anyhow::Result<Value> {
                let d = api
                    .commands()
                    .register_command("acme.hello", |_| async { Ok(json!("hello")) })?;
                ctx.subscribe(d);
                Ok(Value::Null)
            }
        }

        let loader = ModuleLoader::new();
        loader.register("acme.cmd", || Box::new(Greeter));
        let host = host(dir.path(), loader);
        host.load_extension(&ext).await.unwrap();

        let result = host.execute_command("acme.hello", vec![]).await.unwrap();
        assert_eq!(result, json!("hello"));
        assert!(host.is_active("acme.cmd").await);

        host.teardown().await;
        assert!(!host.is_active("acme.cmd").await);
        assert!(!host.api().commands().has_command("acme.hello"));
        assert_eq!(host.execute_command("unknown.command", vec![]).await.unwrap(), Value::Null);
    }
}
