//! Extension context - per-extension state handed to `activate`
//!
//! The context carries the extension's subscriptions, its storage and log
//! locations, persisted key-value state, and the background work and child
//! processes it owns. Everything registered here is torn down on deactivation.

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::api::Disposable;
use crate::error::Result;
use crate::settings::HostPaths;
use crate::utils::paths::path_to_uri;

const STATE_FILENAME: &str = "state.json";

// ============================================================================
// Persisted state
// ============================================================================

/// Key-value state persisted as a JSON object on disk
pub struct Memento {
    file: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl Memento {
    /// Load state from `file`; a missing or unreadable file starts empty
    pub fn load(file: PathBuf) -> Self {
        let values = match std::fs::read_to_string(&file) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring corrupt state file {:?}: {}", file, e);
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self {
            file,
            values: RwLock::new(values),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Set a key (`Value::Null` removes it) and write the state file
    pub async fn update(&self, key: &str, value: Value) -> Result<()> {
        let content = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            if value.is_null() {
                values.remove(key);
            } else {
                values.insert(key.to_string(), value);
            }
            serde_json::to_string_pretty(&*values)?
        };

        if let Some(parent) = self.file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.file, content).await?;
        Ok(())
    }
}

// ============================================================================
// Child processes
// ============================================================================

/// Child processes started by extensions, killed on deactivation and teardown
#[derive(Default)]
pub struct ProcessTracker {
    children: Mutex<Vec<(String, Child)>>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, extension_id: &str, child: Child) {
        debug!("Tracking process {:?} for {}", child.id(), extension_id);
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain_mut(|(_, child)| matches!(child.try_wait(), Ok(None)));
        children.push((extension_id.to_string(), child));
    }

    pub fn count(&self) -> usize {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn kill_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let taken: Vec<(String, Child)> = {
            let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
            let (matching, rest): (Vec<_>, Vec<_>) =
                children.drain(..).partition(|(owner, _)| predicate(owner));
            *children = rest;
            matching
        };

        let count = taken.len();
        for (owner, mut child) in taken {
            if let Err(e) = child.kill().await {
                debug!("Process of {} already gone: {}", owner, e);
            }
        }
        count
    }

    pub async fn kill_extension(&self, extension_id: &str) -> usize {
        self.kill_matching(|owner| owner == extension_id).await
    }

    pub async fn kill_all(&self) -> usize {
        self.kill_matching(|_| true).await
    }
}

// ============================================================================
// Context
// ============================================================================

struct ContextInner {
    extension_id: String,
    extension_path: PathBuf,
    global_storage_path: PathBuf,
    workspace_storage_path: PathBuf,
    log_path: PathBuf,
    global_state: Memento,
    workspace_state: Memento,
    subscriptions: Mutex<Vec<Disposable>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    processes: Arc<ProcessTracker>,
}

/// Context passed to an extension on activation.
///
/// Clone-able so extensions can keep it and use it from their own tasks.
#[derive(Clone)]
pub struct ExtensionContext {
    inner: Arc<ContextInner>,
}

impl ExtensionContext {
    /// Build a context, creating the extension's storage and log directories
    pub fn new(
        extension_id: &str,
        extension_path: &Path,
        paths: &HostPaths,
        processes: Arc<ProcessTracker>,
    ) -> Result<Self> {
        let storage = paths.extension_storage(extension_id);
        let global_storage_path = storage.join("global");
        let workspace_storage_path = storage.join("workspace");
        let log_path = paths.extension_log_dir(extension_id);
        for dir in [&global_storage_path, &workspace_storage_path, &log_path] {
            std::fs::create_dir_all(dir)?;
        }

        Ok(Self {
            inner: Arc::new(ContextInner {
                extension_id: extension_id.to_string(),
                extension_path: extension_path.to_path_buf(),
                global_state: Memento::load(storage.join(STATE_FILENAME)),
                workspace_state: Memento::load(workspace_storage_path.join(STATE_FILENAME)),
                global_storage_path,
                workspace_storage_path,
                log_path,
                subscriptions: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                processes,
            }),
        })
    }

    pub fn extension_id(&self) -> &str {
        &self.inner.extension_id
    }

    pub fn extension_path(&self) -> &Path {
        &self.inner.extension_path
    }

    pub fn global_storage_uri(&self) -> String {
        path_to_uri(&self.inner.global_storage_path)
    }

    pub fn storage_uri(&self) -> String {
        path_to_uri(&self.inner.workspace_storage_path)
    }

    pub fn log_uri(&self) -> String {
        path_to_uri(&self.inner.log_path)
    }

    pub fn global_storage_path(&self) -> &Path {
        &self.inner.global_storage_path
    }

    pub fn storage_path(&self) -> &Path {
        &self.inner.workspace_storage_path
    }

    pub fn log_path(&self) -> &Path {
        &self.inner.log_path
    }

    /// Persisted state shared across workspaces
    pub fn global_state(&self) -> &Memento {
        &self.inner.global_state
    }

    pub fn workspace_state(&self) -> &Memento {
        &self.inner.workspace_state
    }

    /// Add a disposable to be disposed on deactivation
    pub fn subscribe(&self, disposable: Disposable) {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(disposable);
    }

    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Register a child process so the host can kill it on shutdown
    pub fn track_process(&self, child: Child) {
        self.inner.processes.track(&self.inner.extension_id, child);
    }

    /// Run background work owned by the extension. Errors and panics are
    /// logged; the task is aborted on deactivation.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let extension_id = self.inner.extension_id.clone();
        let handle = tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Background task of {} failed: {:#}", extension_id, e),
                Err(_) => error!("Background task of {} panicked", extension_id),
            }
        });

        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Dispose every subscription (last registered first) and abort background work
    pub(crate) fn dispose(&self) {
        let subscriptions: Vec<Disposable> = self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for disposable in subscriptions.into_iter().rev() {
            disposable.dispose();
        }

        for task in self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}
