//! Extension-facing compatibility API
//!
//! [`ExtensionApi`] is the object every extension receives on activation. All
//! clones share one document store, provider registry, command registry and
//! settings tree; each clone is scoped to the extension it was handed to so
//! registrations record their owner.
//!
//! The editor side drives the same object through `did_open`/`did_change`/
//! `did_close` and the `provide_*` queries.

pub mod commands;
pub mod disposable;
pub mod languages;
pub mod window;
pub mod workspace;

pub use commands::CommandRegistry;
pub use disposable::{Disposable, Emitter};
pub use languages::{DiagnosticCollection, Languages};
pub use window::{OutputChannel, StatusBarItemHandle, Window};
pub use workspace::{Configuration, ConfigurationChangeEvent, TextDocumentChangeEvent, Workspace};

use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

use crate::documents::{ClosedDocument, DocumentStore, OpenOutcome, TextDocumentContentChange, TrackedDocument};
use crate::events::{EventBus, HostEvent};
use crate::providers::{CompletionContext, ProviderHandle, ProviderRegistry, Registration};
use crate::providers::Capability;
use crate::types::{
    LspCompletionItem, LspFormattingOptions, LspHover, LspLocation, LspPosition, LspTextEdit,
    LspWorkspaceEdit,
};
use window::StatusBarTable;

/// Owner recorded for registrations made by the host itself
pub const HOST_EXTENSION_ID: &str = "lumen.host";

pub(crate) struct ApiInner {
    documents: DocumentStore,
    registry: ProviderRegistry,
    commands: CommandRegistry,
    events: EventBus,
    configuration: RwLock<Value>,
    workspace_folders: RwLock<Vec<PathBuf>>,
    status_bar: Arc<StatusBarTable>,
    on_open: Emitter<Arc<TrackedDocument>>,
    on_change: Emitter<TextDocumentChangeEvent>,
    on_close: Emitter<ClosedDocument>,
    on_config: Emitter<ConfigurationChangeEvent>,
}

/// Shared compatibility API handle
#[derive(Clone)]
pub struct ExtensionApi {
    inner: Arc<ApiInner>,
    extension_id: Arc<str>,
}

impl ExtensionApi {
    /// Create the API singleton for one host
    pub fn new(events: EventBus, configuration: Value) -> Self {
        let configuration = if configuration.is_object() {
            configuration
        } else {
            Value::Object(serde_json::Map::new())
        };
        Self {
            inner: Arc::new(ApiInner {
                documents: DocumentStore::new(),
                registry: ProviderRegistry::new(),
                commands: CommandRegistry::new(),
                events,
                configuration: RwLock::new(configuration),
                workspace_folders: RwLock::new(Vec::new()),
                status_bar: Arc::new(StatusBarTable::default()),
                on_open: Emitter::new("onDidOpenTextDocument"),
                on_change: Emitter::new("onDidChangeTextDocument"),
                on_close: Emitter::new("onDidCloseTextDocument"),
                on_config: Emitter::new("onDidChangeConfiguration"),
            }),
            extension_id: Arc::from(HOST_EXTENSION_ID),
        }
    }

    /// The same API, with registrations attributed to `extension_id`
    pub fn scoped(&self, extension_id: &str) -> Self {
        Self {
            inner: self.inner.clone(),
            extension_id: Arc::from(extension_id),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn languages(&self) -> Languages<'_> {
        Languages { api: self }
    }

    pub fn workspace(&self) -> Workspace<'_> {
        Workspace { api: self }
    }

    pub fn window(&self) -> Window {
        Window {
            extension_id: self.extension_id.to_string(),
            events: self.inner.events.clone(),
            status_bar: self.inner.status_bar.clone(),
        }
    }

    pub fn commands(&self) -> Commands<'_> {
        Commands { api: self }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.inner.documents
    }

    pub fn set_workspace_folders(&self, folders: Vec<PathBuf>) {
        *self
            .inner
            .workspace_folders
            .write()
            .unwrap_or_else(PoisonError::into_inner) = folders;
    }

    /// Fill in defaults contributed by an extension manifest without overriding user values
    pub fn seed_configuration_defaults(&self, defaults: &[(String, Value)]) {
        let mut tree = self
            .inner
            .configuration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for (key, value) in defaults {
            if crate::settings::get_nested_value(&tree, key).is_none() {
                if let Err(e) = crate::settings::set_nested_value(&mut tree, key, value.clone()) {
                    debug!("Skipping configuration default {}: {}", key, e);
                }
            }
        }
    }

    /// Drop providers and status bar items an extension left behind
    pub fn release_extension(&self, extension_id: &str) {
        let removed = self.inner.registry.unregister_extension(extension_id);
        if removed > 0 {
            debug!("Released {} providers of {}", removed, extension_id);
        }
        if self.inner.status_bar.remove_extension(extension_id) {
            self.inner.events.emit(HostEvent::StatusBarUpdate {
                items: self.inner.status_bar.visible(),
            });
        }
    }

    // ------------------------------------------------------------------------
    // Document lifecycle
    // ------------------------------------------------------------------------

    /// Track a document. Only the first open of a URI fires the open event.
    pub fn did_open(&self, uri: &str, language_id: &str, text: &str, version: i32) -> Arc<TrackedDocument> {
        let outcome = self.inner.documents.did_open(uri, language_id, text, version);
        if let OpenOutcome::Opened(doc) = &outcome {
            debug!("Document opened: {} ({})", uri, language_id);
            self.inner.on_open.fire(doc);
        }
        outcome.document().clone()
    }

    pub fn did_change(
        &self,
        uri: &str,
        changes: Vec<TextDocumentContentChange>,
        new_text: &str,
    ) -> Option<Arc<TrackedDocument>> {
        let document = self.inner.documents.did_change(uri, new_text)?;
        let content_changes = if changes.is_empty() {
            vec![TextDocumentContentChange {
                range: None,
                text: new_text.to_string(),
            }]
        } else {
            changes
        };
        self.inner.on_change.fire(&TextDocumentChangeEvent {
            document: document.clone(),
            content_changes,
        });
        Some(document)
    }

    pub fn did_close(&self, uri: &str) -> Option<ClosedDocument> {
        let closed = self.inner.documents.did_close(uri)?;
        debug!("Document closed: {}", uri);
        self.inner.on_close.fire(&closed);
        Some(closed)
    }

    // ------------------------------------------------------------------------
    // Provider queries
    // ------------------------------------------------------------------------

    fn lookup(&self, capability: Capability, uri: &str) -> Option<(Arc<TrackedDocument>, Vec<Arc<Registration>>)> {
        let Some(document) = self.inner.documents.get(uri) else {
            debug!("{} requested for untracked document {}", capability, uri);
            return None;
        };
        let registrations = self
            .inner
            .registry
            .providers_for_document(capability, uri, &document.language_id());
        Some((document, registrations))
    }

    /// Query every matching completion provider and concatenate their items
    pub async fn provide_completions(
        &self,
        uri: &str,
        position: LspPosition,
        trigger_character: Option<&str>,
    ) -> Vec<LspCompletionItem> {
        let Some((document, registrations)) = self.lookup(Capability::Completion, uri) else {
            return Vec::new();
        };
        let context = CompletionContext {
            trigger_character: trigger_character.map(str::to_string),
        };

        let mut items = Vec::new();
        for registration in registrations {
            let ProviderHandle::Completion(provider) = &registration.provider else {
                continue;
            };
            if let Some(trigger) = trigger_character {
                if !registration.trigger_characters.iter().any(|c| c == trigger) {
                    continue;
                }
            }
            let result = guarded(
                &registration,
                provider.provide_completion_items(&document, position, &context),
            )
            .await;
            if let Some(mut found) = result {
                items.append(&mut found);
            }
        }
        items
    }

    /// Hovers from every matching provider, in registration order
    pub async fn provide_hover(&self, uri: &str, position: LspPosition) -> Vec<LspHover> {
        let Some((document, registrations)) = self.lookup(Capability::Hover, uri) else {
            return Vec::new();
        };
        let mut hovers = Vec::new();
        for registration in registrations {
            let ProviderHandle::Hover(provider) = &registration.provider else {
                continue;
            };
            if let Some(Some(hover)) = guarded(&registration, provider.provide_hover(&document, position)).await {
                hovers.push(hover);
            }
        }
        hovers
    }

    pub async fn provide_definition(&self, uri: &str, position: LspPosition) -> Vec<LspLocation> {
        let Some((document, registrations)) = self.lookup(Capability::Definition, uri) else {
            return Vec::new();
        };
        let mut locations = Vec::new();
        for registration in registrations {
            let ProviderHandle::Definition(provider) = &registration.provider else {
                continue;
            };
            if let Some(mut found) = guarded(&registration, provider.provide_definition(&document, position)).await {
                locations.append(&mut found);
            }
        }
        locations
    }

    pub async fn provide_references(
        &self,
        uri: &str,
        position: LspPosition,
        include_declaration: bool,
    ) -> Vec<LspLocation> {
        let Some((document, registrations)) = self.lookup(Capability::References, uri) else {
            return Vec::new();
        };
        let mut locations = Vec::new();
        for registration in registrations {
            let ProviderHandle::References(provider) = &registration.provider else {
                continue;
            };
            let result = guarded(
                &registration,
                provider.provide_references(&document, position, include_declaration),
            )
            .await;
            if let Some(mut found) = result {
                locations.append(&mut found);
            }
        }
        locations
    }

    /// Edits from the first formatter that produces any; later formatters are not consulted
    pub async fn provide_formatting(&self, uri: &str, options: LspFormattingOptions) -> Vec<LspTextEdit> {
        let Some((document, registrations)) = self.lookup(Capability::Formatting, uri) else {
            return Vec::new();
        };
        for registration in registrations {
            let ProviderHandle::Formatting(provider) = &registration.provider else {
                continue;
            };
            let result = guarded(
                &registration,
                provider.provide_document_formatting_edits(&document, options),
            )
            .await;
            if let Some(edits) = result.filter(|e| !e.is_empty()) {
                return edits;
            }
        }
        Vec::new()
    }

    /// Workspace edit from the first rename provider that returns one
    pub async fn provide_rename(&self, uri: &str, position: LspPosition, new_name: &str) -> Option<LspWorkspaceEdit> {
        let (document, registrations) = self.lookup(Capability::Rename, uri)?;
        for registration in registrations {
            let ProviderHandle::Rename(provider) = &registration.provider else {
                continue;
            };
            let result = guarded(
                &registration,
                provider.provide_rename_edits(&document, position, new_name),
            )
            .await;
            if let Some(Some(edit)) = result {
                return Some(edit);
            }
        }
        None
    }
}

/// Run one provider call; failures and panics are logged and become None
async fn guarded<T, F>(registration: &Registration, call: F) -> Option<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(
                "{} provider {} of {} failed: {:#}",
                registration.capability(),
                registration.id,
                registration.extension_id,
                e
            );
            None
        }
        Err(_) => {
            error!(
                "{} provider {} of {} panicked",
                registration.capability(),
                registration.id,
                registration.extension_id
            );
            None
        }
    }
}

/// The `commands` namespace
pub struct Commands<'a> {
    api: &'a ExtensionApi,
}

impl Commands<'_> {
    pub fn register_command<F, Fut>(&self, name: &str, callback: F) -> crate::error::Result<Disposable>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.api
            .inner
            .commands
            .register(name, self.api.extension_id(), callback)
    }

    pub async fn execute_command(&self, name: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        self.api.inner.commands.execute(name, args).await
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.api.inner.commands.names()
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.api.inner.commands.contains(name)
    }
}
