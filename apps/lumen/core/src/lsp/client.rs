//! Language server manager
//!
//! One server per language id, started on demand from the `lsp.servers`
//! settings. Documents are tracked locally whether or not a server is
//! running, so a server that finishes initializing later gets every open
//! document of its language replayed as `didOpen`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::config::LspConfig;
use super::parse::{parse_completion_list, parse_hover, parse_locations, parse_text_edits};
use super::server::{LanguageServerInstance, ServerState};
use crate::error::{LumenError, Result};
use crate::events::EventBus;
use crate::settings::LspSettings;
use crate::types::{
    LspCompletionList, LspFormattingOptions, LspHover, LspLocation, LspPosition, LspTextEdit,
};

/// A document as the language servers know it
#[derive(Debug, Clone)]
struct SyncedDocument {
    language_id: String,
    version: i32,
    text: String,
}

pub struct LspClient {
    settings: LspSettings,
    events: EventBus,
    root: Option<PathBuf>,
    servers: RwLock<HashMap<String, Arc<LanguageServerInstance>>>,
    documents: RwLock<HashMap<String, SyncedDocument>>,
}

impl LspClient {
    pub fn new(settings: LspSettings, events: EventBus) -> Self {
        Self {
            settings,
            events,
            root: None,
            servers: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Workspace root sent as `rootUri` in `initialize`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.request_timeout_ms)
    }

    pub fn has_server_config(&self, language_id: &str) -> bool {
        self.settings.servers.contains_key(language_id)
    }

    // =========================================================================
    // Server lifecycle
    // =========================================================================

    /// Start the configured server for `language_id`. A no-op while a server
    /// for that language is live; one that exited or failed to initialize is
    /// replaced.
    pub async fn start_language_server(&self, language_id: &str) -> Result<()> {
        let instance = {
            let mut servers = self.servers.write().await;
            if is_live(&servers, language_id) {
                return Ok(());
            }
            let command = self
                .settings
                .servers
                .get(language_id)
                .cloned()
                .ok_or_else(|| LumenError::not_found("language server", language_id))?;

            let instance = Arc::new(LanguageServerInstance::spawn(
                language_id,
                Arc::new(command),
                self.events.clone(),
                self.request_timeout(),
            )?);
            servers.insert(language_id.to_string(), instance.clone());
            instance
        };

        self.initialize(instance).await
    }

    /// Attach a server reachable over an already-open transport
    pub async fn connect_language_server<R, W>(
        &self,
        language_id: &str,
        reader: R,
        writer: W,
        config: Arc<dyn LspConfig>,
    ) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let instance = {
            let mut servers = self.servers.write().await;
            if is_live(&servers, language_id) {
                return Ok(());
            }
            let instance = Arc::new(LanguageServerInstance::connect(
                language_id,
                reader,
                writer,
                config,
                self.events.clone(),
                self.request_timeout(),
            ));
            servers.insert(language_id.to_string(), instance.clone());
            instance
        };

        self.initialize(instance).await
    }

    async fn initialize(&self, instance: Arc<LanguageServerInstance>) -> Result<()> {
        if let Err(e) = instance.initialize(self.root.as_deref()).await {
            warn!("{} language server failed to initialize: {}", instance.language_id(), e);
            instance.kill().await;
            return Err(e);
        }

        let replay: Vec<(String, SyncedDocument)> = self
            .documents
            .read()
            .await
            .iter()
            .filter(|(_, doc)| doc.language_id == instance.language_id())
            .map(|(uri, doc)| (uri.clone(), doc.clone()))
            .collect();

        if !replay.is_empty() {
            debug!(
                "Replaying {} open documents to {}",
                replay.len(),
                instance.language_id()
            );
        }
        for (uri, doc) in replay {
            instance.notify("textDocument/didOpen", did_open_params(&uri, &doc));
        }
        Ok(())
    }

    /// Whether `language_id` needs a (re)start
    pub async fn needs_start(&self, language_id: &str) -> bool {
        self.has_server_config(language_id) && !is_live(&*self.servers.read().await, language_id)
    }

    async fn server(&self, language_id: &str) -> Option<Arc<LanguageServerInstance>> {
        self.servers.read().await.get(language_id).cloned()
    }

    /// The server for `language_id` if it is ready for traffic
    async fn ready_server(&self, language_id: &str) -> Option<Arc<LanguageServerInstance>> {
        let server = self.server(language_id).await?;
        if server.is_initialized() {
            Some(server)
        } else {
            debug!(
                "{} language server not initialized ({:?}), skipping",
                language_id,
                server.state()
            );
            None
        }
    }

    pub async fn server_state(&self, language_id: &str) -> ServerState {
        match self.server(language_id).await {
            Some(server) => server.state(),
            None => ServerState::NotStarted,
        }
    }

    pub async fn server_capabilities(&self, language_id: &str) -> Option<Value> {
        self.server(language_id).await?.capabilities()
    }

    /// Languages with a started server, in any state
    pub async fn running_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.servers.read().await.keys().cloned().collect();
        languages.sort();
        languages
    }

    /// Graceful shutdown of one server: `shutdown`, `exit`, then kill
    pub async fn shutdown_server(&self, language_id: &str) {
        let removed = self.servers.write().await.remove(language_id);
        if let Some(server) = removed {
            server.shutdown().await;
        }
    }

    /// Graceful shutdown of every server
    pub async fn shutdown(&self) {
        let servers: Vec<Arc<LanguageServerInstance>> =
            self.servers.write().await.drain().map(|(_, s)| s).collect();
        for server in servers {
            server.shutdown().await;
        }
    }

    /// Kill every server process without protocol exchange and forget all state
    pub async fn force_shutdown(&self) {
        let servers: Vec<Arc<LanguageServerInstance>> =
            self.servers.write().await.drain().map(|(_, s)| s).collect();
        let count = servers.len();
        for server in servers {
            server.kill().await;
        }
        self.documents.write().await.clear();
        if count > 0 {
            info!("Force-stopped {} language servers", count);
        }
    }

    // =========================================================================
    // Document sync
    // =========================================================================

    /// Track a document and tell its server about it. Opening a tracked URI
    /// again is sent as a full-text change, or moves the document to another
    /// server when its language changed.
    pub async fn did_open(&self, uri: &str, language_id: &str, text: &str) {
        let (previous, doc) = {
            let mut documents = self.documents.write().await;
            match documents.get_mut(uri) {
                Some(doc) => {
                    let previous = std::mem::replace(&mut doc.language_id, language_id.to_string());
                    doc.version = doc.version.saturating_add(1);
                    doc.text = text.to_string();
                    (Some(previous), doc.clone())
                }
                None => {
                    let doc = SyncedDocument {
                        language_id: language_id.to_string(),
                        version: 1,
                        text: text.to_string(),
                    };
                    documents.insert(uri.to_string(), doc.clone());
                    (None, doc)
                }
            }
        };

        let reopened = match previous {
            Some(previous) if previous != doc.language_id => {
                if let Some(server) = self.ready_server(&previous).await {
                    server.notify(
                        "textDocument/didClose",
                        json!({ "textDocument": { "uri": uri } }),
                    );
                }
                false
            }
            Some(_) => true,
            None => false,
        };

        let Some(server) = self.ready_server(&doc.language_id).await else {
            return;
        };
        if reopened {
            server.notify("textDocument/didChange", did_change_params(uri, &doc));
        } else {
            server.notify("textDocument/didOpen", did_open_params(uri, &doc));
        }
    }

    /// Send the full new text of a tracked document
    pub async fn did_change(&self, uri: &str, text: &str) {
        let doc = {
            let mut documents = self.documents.write().await;
            let Some(doc) = documents.get_mut(uri) else {
                debug!("didChange for untracked document {}, ignoring", uri);
                return;
            };
            doc.version = doc.version.saturating_add(1);
            doc.text = text.to_string();
            doc.clone()
        };

        if let Some(server) = self.ready_server(&doc.language_id).await {
            server.notify("textDocument/didChange", did_change_params(uri, &doc));
        }
    }

    pub async fn did_save(&self, uri: &str) {
        let Some(doc) = self.documents.read().await.get(uri).cloned() else {
            debug!("didSave for untracked document {}, ignoring", uri);
            return;
        };
        if let Some(server) = self.ready_server(&doc.language_id).await {
            server.notify(
                "textDocument/didSave",
                json!({ "textDocument": { "uri": uri }, "text": doc.text }),
            );
        }
    }

    pub async fn did_close(&self, uri: &str) {
        let Some(doc) = self.documents.read().await.get(uri).cloned() else {
            debug!("didClose for untracked document {}, ignoring", uri);
            return;
        };
        if let Some(server) = self.ready_server(&doc.language_id).await {
            server.notify(
                "textDocument/didClose",
                json!({ "textDocument": { "uri": uri } }),
            );
        }
        self.documents.write().await.remove(uri);
    }

    pub async fn is_tracked(&self, uri: &str) -> bool {
        self.documents.read().await.contains_key(uri)
    }

    /// Version last sent for `uri`
    pub async fn document_version(&self, uri: &str) -> Option<i32> {
        self.documents.read().await.get(uri).map(|doc| doc.version)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a document request; `None` when there is nothing to ask or it failed
    async fn query(&self, uri: &str, method: &str, params: Value) -> Option<Value> {
        let language_id = match self.documents.read().await.get(uri) {
            Some(doc) => doc.language_id.clone(),
            None => {
                debug!("{} for untracked document {}", method, uri);
                return None;
            }
        };
        let server = self.ready_server(&language_id).await?;

        match server.request(method, params).await {
            Ok(result) => Some(result),
            Err(e) if e.is_timeout() => {
                warn!("{} for {} timed out", method, uri);
                None
            }
            Err(e) => {
                warn!("{} for {} failed: {}", method, uri, e);
                None
            }
        }
    }

    pub async fn get_completions(&self, uri: &str, position: LspPosition) -> LspCompletionList {
        let params = json!({
            "textDocument": { "uri": uri },
            "position": position,
        });
        self.query(uri, "textDocument/completion", params)
            .await
            .map(|result| parse_completion_list(&result))
            .unwrap_or_default()
    }

    pub async fn get_hover(&self, uri: &str, position: LspPosition) -> Option<LspHover> {
        let params = json!({
            "textDocument": { "uri": uri },
            "position": position,
        });
        let result = self.query(uri, "textDocument/hover", params).await?;
        parse_hover(&result)
    }

    pub async fn get_definition(&self, uri: &str, position: LspPosition) -> Vec<LspLocation> {
        let params = json!({
            "textDocument": { "uri": uri },
            "position": position,
        });
        self.query(uri, "textDocument/definition", params)
            .await
            .map(|result| parse_locations(&result))
            .unwrap_or_default()
    }

    pub async fn format_document(&self, uri: &str, options: LspFormattingOptions) -> Vec<LspTextEdit> {
        let params = json!({
            "textDocument": { "uri": uri },
            "options": options,
        });
        self.query(uri, "textDocument/formatting", params)
            .await
            .map(|result| parse_text_edits(&result))
            .unwrap_or_default()
    }
}

fn did_open_params(uri: &str, doc: &SyncedDocument) -> Value {
    json!({
        "textDocument": {
            "uri": uri,
            "languageId": doc.language_id,
            "version": doc.version,
            "text": doc.text,
        }
    })
}

fn is_live(servers: &HashMap<String, Arc<LanguageServerInstance>>, language_id: &str) -> bool {
    servers
        .get(language_id)
        .is_some_and(|server| server.state() != ServerState::Shutdown)
}

fn did_change_params(uri: &str, doc: &SyncedDocument) -> Value {
    json!({
        "textDocument": { "uri": uri, "version": doc.version },
        "contentChanges": [{ "text": doc.text }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HostEvent;
    use crate::lsp::codec::LspCodec;
    use crate::settings::ServerCommand;
    use futures::{SinkExt, StreamExt};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio_util::codec::{FramedRead, FramedWrite};

    struct FakeServer {
        reader: FramedRead<ReadHalf<DuplexStream>, LspCodec>,
        writer: FramedWrite<WriteHalf<DuplexStream>, LspCodec>,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Value {
            self.reader.next().await.unwrap().unwrap()
        }

        async fn send(&mut self, message: Value) {
            self.writer.send(message).await.unwrap();
        }

        async fn handshake(&mut self) {
            let init = self.recv().await;
            assert_eq!(init["method"], "initialize");
            self.send(json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "result": {"capabilities": {"completionProvider": {"triggerCharacters": ["."]}}}
            }))
            .await;
            assert_eq!(self.recv().await["method"], "initialized");
        }

        /// Answer the next request, which must be `method`
        async fn answer(&mut self, method: &str, result: Value) -> Value {
            let request = self.recv().await;
            assert_eq!(request["method"], method);
            self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
                .await;
            request
        }
    }

    async fn connected(client: &LspClient, language_id: &str) -> FakeServer {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(near);
        let (server_read, server_write) = tokio::io::split(far);
        let mut server = FakeServer {
            reader: FramedRead::new(server_read, LspCodec::new()),
            writer: FramedWrite::new(server_write, LspCodec::new()),
        };

        let (result, ()) = tokio::join!(
            client.connect_language_server(
                language_id,
                client_read,
                client_write,
                Arc::new(ServerCommand::new("fake", &[])),
            ),
            server.handshake()
        );
        result.unwrap();
        server
    }

    #[tokio::test]
    async fn test_documents_opened_before_init_are_replayed() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        client.did_open("file:///a.py", "python", "x = 1").await;
        client.did_open("file:///b.rs", "rust", "fn main() {}").await;
        assert_eq!(client.server_state("python").await, ServerState::NotStarted);

        let mut server = connected(&client, "python").await;
        assert_eq!(client.server_state("python").await, ServerState::Initialized);
        assert!(client.server_capabilities("python").await.unwrap()["completionProvider"].is_object());

        let replay = server.recv().await;
        assert_eq!(replay["method"], "textDocument/didOpen");
        assert_eq!(replay["params"]["textDocument"]["uri"], "file:///a.py");
        assert_eq!(replay["params"]["textDocument"]["text"], "x = 1");
    }

    #[tokio::test]
    async fn test_change_sends_full_text_with_increasing_version() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let mut server = connected(&client, "python").await;

        client.did_open("file:///a.py", "python", "a").await;
        client.did_change("file:///a.py", "ab").await;
        client.did_change("file:///a.py", "abc").await;
        client.did_change("file:///untracked.py", "zzz").await;
        client.did_close("file:///a.py").await;

        let open = server.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        assert_eq!(open["params"]["textDocument"]["version"], 1);

        let first = server.recv().await;
        let second = server.recv().await;
        assert_eq!(first["params"]["textDocument"]["version"], 2);
        assert_eq!(second["params"]["textDocument"]["version"], 3);
        assert_eq!(second["params"]["contentChanges"], json!([{"text": "abc"}]));

        let close = server.recv().await;
        assert_eq!(close["method"], "textDocument/didClose");
        assert!(!client.is_tracked("file:///a.py").await);
    }

    #[tokio::test]
    async fn test_completion_round_trip() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let mut server = connected(&client, "python").await;
        client.did_open("file:///a.py", "python", "import os\nos.").await;
        server.recv().await;

        let (list, request) = tokio::join!(
            client.get_completions("file:///a.py", LspPosition::new(1, 3)),
            server.answer(
                "textDocument/completion",
                json!({"isIncomplete": false, "items": [{"label": "path"}, {"label": "environ"}]})
            )
        );
        assert_eq!(request["params"]["position"], json!({"line": 1, "character": 3}));
        let labels: Vec<&str> = list.items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["path", "environ"]);
    }

    #[tokio::test]
    async fn test_hover_definition_and_formatting() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let mut server = connected(&client, "python").await;
        client.did_open("file:///a.py", "python", "x=1").await;
        server.recv().await;

        let range = json!({"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}});
        let (hover, _) = tokio::join!(
            client.get_hover("file:///a.py", LspPosition::new(0, 0)),
            server.answer("textDocument/hover", json!({"contents": {"kind": "markdown", "value": "int"}}))
        );
        assert_eq!(hover.unwrap().contents.value, "int");

        let (locations, _) = tokio::join!(
            client.get_definition("file:///a.py", LspPosition::new(0, 0)),
            server.answer("textDocument/definition", json!({"uri": "file:///a.py", "range": range}))
        );
        assert_eq!(locations.len(), 1);

        let (edits, request) = tokio::join!(
            client.format_document("file:///a.py", LspFormattingOptions::default()),
            server.answer("textDocument/formatting", json!([{"range": range, "newText": "x = 1"}]))
        );
        assert_eq!(request["params"]["options"]["tabSize"], 4);
        assert_eq!(edits[0].new_text, "x = 1");
    }

    #[tokio::test]
    async fn test_queries_degrade_to_empty() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let position = LspPosition::new(0, 0);

        assert!(client.get_completions("file:///nope.py", position).await.items.is_empty());

        client.did_open("file:///a.py", "python", "x").await;
        assert!(client.get_hover("file:///a.py", position).await.is_none());
        assert!(client.get_definition("file:///a.py", position).await.is_empty());
        assert!(client
            .format_document("file:///a.py", LspFormattingOptions::default())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_server_exit_degrades_queries() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let mut server = connected(&client, "python").await;
        client.did_open("file:///a.py", "python", "x").await;
        server.recv().await;

        let serve = async move {
            let request = server.recv().await;
            assert_eq!(request["method"], "textDocument/hover");
            drop(server);
        };
        let (hover, ()) = tokio::join!(client.get_hover("file:///a.py", LspPosition::new(0, 0)), serve);
        assert!(hover.is_none());
        assert_eq!(client.server_state("python").await, ServerState::Shutdown);
    }

    #[tokio::test]
    async fn test_crashed_server_can_be_reconnected() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let server = connected(&client, "python").await;
        client.did_open("file:///a.py", "python", "x").await;
        drop(server);

        while client.server_state("python").await != ServerState::Shutdown {
            tokio::task::yield_now().await;
        }

        let mut server = connected(&client, "python").await;
        assert_eq!(client.server_state("python").await, ServerState::Initialized);
        let replay = server.recv().await;
        assert_eq!(replay["method"], "textDocument/didOpen");
        assert_eq!(replay["params"]["textDocument"]["uri"], "file:///a.py");
    }

    #[tokio::test]
    async fn test_reopen_with_new_language_moves_document() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let mut python = connected(&client, "python").await;
        let mut rust = connected(&client, "rust").await;

        client.did_open("file:///a.txt", "python", "x").await;
        assert_eq!(python.recv().await["method"], "textDocument/didOpen");

        client.did_open("file:///a.txt", "rust", "fn x() {}").await;
        let close = python.recv().await;
        assert_eq!(close["method"], "textDocument/didClose");
        assert_eq!(close["params"]["textDocument"]["uri"], "file:///a.txt");

        let open = rust.recv().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        assert_eq!(open["params"]["textDocument"]["languageId"], "rust");
        assert_eq!(open["params"]["textDocument"]["version"], 2);
        assert_eq!(open["params"]["textDocument"]["text"], "fn x() {}");

        client.did_change("file:///a.txt", "fn y() {}").await;
        assert_eq!(rust.recv().await["method"], "textDocument/didChange");
    }

    #[tokio::test]
    async fn test_diagnostics_are_published_with_language_source() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let client = LspClient::new(LspSettings::default(), events);
        let mut server = connected(&client, "python").await;

        server
            .send(json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"uri": "file:///a.py", "diagnostics": []}
            }))
            .await;

        match rx.recv().await.unwrap() {
            HostEvent::Diagnostics { uri, source, diagnostics } => {
                assert_eq!(uri, "file:///a.py");
                assert_eq!(source, "python");
                assert!(diagnostics.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_unknown_language_fails() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let _server = connected(&client, "python").await;

        client.start_language_server("python").await.unwrap();
        assert_eq!(client.running_languages().await, vec!["python".to_string()]);

        let err = client.start_language_server("cobol").await.unwrap_err();
        assert!(matches!(err, LumenError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_force_shutdown_clears_everything() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let _server = connected(&client, "python").await;
        client.did_open("file:///a.py", "python", "x").await;

        client.force_shutdown().await;
        assert!(client.running_languages().await.is_empty());
        assert!(!client.is_tracked("file:///a.py").await);
        assert_eq!(client.server_state("python").await, ServerState::NotStarted);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_sends_shutdown_then_exit() {
        let client = LspClient::new(LspSettings::default(), EventBus::new());
        let mut server = connected(&client, "python").await;

        let serve = async {
            server.answer("shutdown", Value::Null).await;
            assert_eq!(server.recv().await["method"], "exit");
        };
        tokio::join!(client.shutdown_server("python"), serve);
        assert_eq!(client.server_state("python").await, ServerState::NotStarted);
    }
}
