//! Workbench - the core's boundary towards the editor and UI
//!
//! Owns the compatibility API, the extension host and the language server
//! client, and fans editor operations out to all three. Query results are
//! returned per source; merging them is up to the caller.

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::api::ExtensionApi;
use crate::documents::{ClosedDocument, TextDocumentContentChange, TrackedDocument};
use crate::error::Result;
use crate::events::{EventBus, HostEvent};
use crate::extensions::{ExtensionDescriptor, ExtensionHost, ModuleLoader};
use crate::lsp::LspClient;
use crate::settings::HostSettings;
use crate::types::{
    LspCompletionItem, LspFormattingOptions, LspHover, LspLocation, LspPosition, LspTextEdit,
};

/// Results of one query, by source
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults<T> {
    /// From providers registered by extensions, in registration order
    pub extensions: T,
    /// From the language server of the document's language
    pub language_server: T,
}

pub struct Workbench {
    events: EventBus,
    api: ExtensionApi,
    host: ExtensionHost,
    lsp: Arc<LspClient>,
}

impl Workbench {
    pub fn new(settings: HostSettings, loader: ModuleLoader, workspace: Option<PathBuf>) -> Self {
        let events = EventBus::new();
        let api = ExtensionApi::new(events.clone(), settings.tree.clone());

        let mut lsp = LspClient::new(settings.lsp.clone(), events.clone());
        if let Some(root) = workspace {
            api.set_workspace_folders(vec![root.clone()]);
            lsp = lsp.with_root(root);
        }

        let host = ExtensionHost::new(settings.paths.clone(), api.clone(), loader);
        Self {
            events,
            api,
            host,
            lsp: Arc::new(lsp),
        }
    }

    /// Load every installed extension and fire startup activation
    pub async fn start(&self) -> Vec<String> {
        let loaded = self.host.discover().await;
        let activated = self.host.activate_by_event("onStartupFinished").await;
        info!(
            "Workbench started: {} extensions loaded, {} activated",
            loaded.len(),
            activated.len()
        );
        activated
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub fn api(&self) -> &ExtensionApi {
        &self.api
    }

    pub fn host(&self) -> &ExtensionHost {
        &self.host
    }

    pub fn lsp(&self) -> &LspClient {
        &self.lsp
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub async fn did_open(
        &self,
        uri: &str,
        language_id: &str,
        text: &str,
        version: i32,
    ) -> Arc<TrackedDocument> {
        let document = self.api.did_open(uri, language_id, text, version);
        self.host
            .activate_by_event(&format!("onLanguage:{}", language_id))
            .await;

        self.lsp.did_open(uri, language_id, text).await;
        self.ensure_language_server(language_id).await;
        document
    }

    /// Start the configured server in the background, or restart one that
    /// exited; documents already tracked are replayed once it is up.
    async fn ensure_language_server(&self, language_id: &str) {
        if !self.lsp.needs_start(language_id).await {
            return;
        }

        let lsp = self.lsp.clone();
        let language_id = language_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = lsp.start_language_server(&language_id).await {
                debug!("No {} language server: {}", language_id, e);
            }
        });
    }

    pub async fn did_change(
        &self,
        uri: &str,
        changes: Vec<TextDocumentContentChange>,
        new_text: &str,
    ) -> Option<Arc<TrackedDocument>> {
        let document = self.api.did_change(uri, changes, new_text);
        if document.is_none() {
            debug!("didChange for untracked document {}, ignoring", uri);
            return None;
        }
        self.lsp.did_change(uri, new_text).await;
        document
    }

    pub async fn did_save(&self, uri: &str) {
        self.lsp.did_save(uri).await;
    }

    pub async fn did_close(&self, uri: &str) -> Option<ClosedDocument> {
        let closed = self.api.did_close(uri);
        self.lsp.did_close(uri).await;
        closed
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn completion(
        &self,
        uri: &str,
        position: LspPosition,
        trigger_character: Option<&str>,
    ) -> QueryResults<Vec<LspCompletionItem>> {
        let (extensions, language_server) = tokio::join!(
            self.api.provide_completions(uri, position, trigger_character),
            self.lsp.get_completions(uri, position)
        );
        QueryResults {
            extensions,
            language_server: language_server.items,
        }
    }

    pub async fn hover(&self, uri: &str, position: LspPosition) -> QueryResults<Vec<LspHover>> {
        let (extensions, language_server) = tokio::join!(
            self.api.provide_hover(uri, position),
            self.lsp.get_hover(uri, position)
        );
        QueryResults {
            extensions,
            language_server: language_server.into_iter().collect(),
        }
    }

    pub async fn definition(&self, uri: &str, position: LspPosition) -> QueryResults<Vec<LspLocation>> {
        let (extensions, language_server) = tokio::join!(
            self.api.provide_definition(uri, position),
            self.lsp.get_definition(uri, position)
        );
        QueryResults {
            extensions,
            language_server,
        }
    }

    pub async fn format_document(
        &self,
        uri: &str,
        options: LspFormattingOptions,
    ) -> QueryResults<Vec<LspTextEdit>> {
        let (extensions, language_server) = tokio::join!(
            self.api.provide_formatting(uri, options),
            self.lsp.format_document(uri, options)
        );
        QueryResults {
            extensions,
            language_server,
        }
    }

    // =========================================================================
    // Extensions & commands
    // =========================================================================

    pub async fn list_extensions(&self) -> Vec<ExtensionDescriptor> {
        self.host.list_extensions().await
    }

    pub async fn install_from_path(&self, source: &Path) -> Result<ExtensionDescriptor> {
        self.host.install_from_path(source).await
    }

    pub async fn uninstall(&self, id: &str) -> Result<()> {
        self.host.uninstall(id).await
    }

    pub async fn enable_extension(&self, id: &str) -> Result<bool> {
        self.host.enable_extension(id).await
    }

    pub async fn disable_extension(&self, id: &str) -> Result<()> {
        self.host.disable_extension(id).await
    }

    pub async fn execute_command(&self, name: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        self.host.execute_command(name, args).await
    }

    /// Deactivate extensions, kill their processes and every language server
    pub async fn teardown(&self) {
        self.host.teardown().await;
        self.lsp.force_shutdown().await;
        info!("Workbench torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionContext, CompletionProvider};
    use async_trait::async_trait;

    struct Words;

    #[async_trait]
    impl CompletionProvider for Words {
        async fn provide_completion_items(
            &self,
            document: &TrackedDocument,
            _position: LspPosition,
            _context: &CompletionContext,
        ) -> anyhow::Result<Vec<LspCompletionItem>> {
            Ok(document
                .text()
                .split_whitespace()
                .map(LspCompletionItem::new)
                .collect())
        }
    }

    fn workbench(dir: &Path) -> Workbench {
        let mut settings = HostSettings::with_data_dir(dir);
        settings.lsp.servers.clear();
        Workbench::new(settings, ModuleLoader::new(), None)
    }

    #[tokio::test]
    async fn test_completion_returns_results_per_source() {
        let dir = tempfile::tempdir().unwrap();
        let wb = workbench(dir.path());
        let _registration = wb
            .api()
            .languages()
            .register_completion_provider("plaintext", Words, &[]);

        wb.did_open("file:///notes.txt", "plaintext", "alpha beta", 1).await;
        let results = wb.completion("file:///notes.txt", LspPosition::new(0, 0), None).await;

        let labels: Vec<&str> = results.extensions.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["alpha", "beta"]);
        assert!(results.language_server.is_empty());
    }

    #[tokio::test]
    async fn test_document_lifecycle_reaches_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let wb = workbench(dir.path());

        wb.did_open("file:///a.py", "python", "x", 1).await;
        assert!(wb.lsp().is_tracked("file:///a.py").await);

        let doc = wb.did_change("file:///a.py", vec![], "xy").await.unwrap();
        assert_eq!(doc.version(), 2);
        assert_eq!(wb.lsp().document_version("file:///a.py").await, Some(2));

        assert!(wb.did_change("file:///missing.py", vec![], "z").await.is_none());

        let closed = wb.did_close("file:///a.py").await.unwrap();
        assert_eq!(closed.text(), "xy");
        assert!(!wb.lsp().is_tracked("file:///a.py").await);
        assert!(wb.api().documents().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_is_safe_with_nothing_running() {
        let dir = tempfile::tempdir().unwrap();
        let wb = workbench(dir.path());
        assert!(wb.start().await.is_empty());
        wb.teardown().await;
        assert!(wb.lsp().running_languages().await.is_empty());
    }
}
