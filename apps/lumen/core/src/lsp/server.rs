//! One running language server
//!
//! Owns the framed stdio transport, the pending-request table and the
//! dispatch of server-initiated messages. The transport is generic so the
//! same instance runs over a child process or an in-memory stream.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use super::codec::LspCodec;
use super::config::LspConfig;
use super::parse::parse_publish_diagnostics;
use super::protocol::{self, Incoming};
use crate::error::{LumenError, Result};
use crate::events::{EventBus, HostEvent};
use crate::types::MessageKind;
use crate::utils::paths::path_to_uri;

/// How long a server gets to exit on its own after `exit`
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of one language server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    NotStarted,
    /// Process spawned, `initialize` in flight
    Starting,
    Initialized,
    Shutdown,
}

type Reply = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct PendingTable {
    closed: bool,
    requests: HashMap<i64, Reply>,
}

struct Shared {
    language_id: String,
    config: Arc<dyn LspConfig>,
    events: EventBus,
    state: Mutex<ServerState>,
    capabilities: RwLock<Option<Value>>,
    pending: Mutex<PendingTable>,
}

impl Shared {
    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject everything in flight and refuse new requests
    fn close(&self, reason: &str) {
        self.set_state(ServerState::Shutdown);
        let rejected: Vec<(i64, Reply)> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.closed = true;
            pending.requests.drain().collect()
        };
        if !rejected.is_empty() {
            debug!(
                "Rejecting {} pending {} requests: {}",
                rejected.len(),
                self.language_id,
                reason
            );
        }
        for (_, reply) in rejected {
            let _ = reply.send(Err(LumenError::process(format!(
                "{} language server: {}",
                self.language_id, reason
            ))));
        }
    }

    fn dispatch(&self, message: Value, outgoing: &mpsc::UnboundedSender<Value>) {
        match Incoming::classify(message) {
            Incoming::Response { id, result } => {
                let reply = self
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .requests
                    .remove(&id);
                match reply {
                    Some(reply) => {
                        let result = result.map_err(|e| {
                            LumenError::protocol(format!("{} (code {})", e.message, e.code))
                        });
                        let _ = reply.send(result);
                    }
                    None => debug!(
                        "Dropping response for unknown or expired request {} from {}",
                        id, self.language_id
                    ),
                }
            }
            Incoming::Request { id, method, params } => {
                let result = self.handle_server_request(&method, &params);
                let _ = outgoing.send(protocol::response(id, result));
            }
            Incoming::Notification { method, params } => {
                self.handle_notification(&method, &params);
            }
            Incoming::Invalid(message) => {
                warn!(
                    "{}",
                    LumenError::protocol(format!(
                        "unexpected message from {}: {}",
                        self.language_id, message
                    ))
                );
            }
        }
    }

    fn handle_server_request(&self, method: &str, params: &Value) -> Value {
        match method {
            "workspace/configuration" => {
                let items = params
                    .get("items")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Value::Array(
                    items
                        .iter()
                        .map(|item| {
                            let section = item.get("section").and_then(Value::as_str);
                            self.config.workspace_configuration(section)
                        })
                        .collect(),
                )
            }
            "window/showMessageRequest" => {
                self.show_message(params);
                Value::Null
            }
            _ => {
                debug!("Answering {} request from {} with null", method, self.language_id);
                Value::Null
            }
        }
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "textDocument/publishDiagnostics" => {
                let Some((uri, diagnostics)) = parse_publish_diagnostics(params) else {
                    warn!("Malformed publishDiagnostics from {}", self.language_id);
                    return;
                };
                debug!(
                    "{} published {} diagnostics for {}",
                    self.language_id,
                    diagnostics.len(),
                    uri
                );
                self.events.emit(HostEvent::Diagnostics {
                    uri,
                    source: self.language_id.clone(),
                    diagnostics,
                });
            }
            "window/showMessage" => self.show_message(params),
            "window/logMessage" => {
                let message = params.get("message").and_then(Value::as_str).unwrap_or("");
                let kind = params
                    .get("type")
                    .and_then(Value::as_u64)
                    .map(MessageKind::from_lsp)
                    .unwrap_or(MessageKind::Log);
                match kind {
                    MessageKind::Error => error!("[{}] {}", self.language_id, message),
                    MessageKind::Warning => warn!("[{}] {}", self.language_id, message),
                    MessageKind::Info => info!("[{}] {}", self.language_id, message),
                    MessageKind::Log => debug!("[{}] {}", self.language_id, message),
                }
            }
            _ => debug!("Ignoring {} notification from {}", method, self.language_id),
        }
    }

    fn show_message(&self, params: &Value) {
        let text = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = params
            .get("type")
            .and_then(Value::as_u64)
            .map(MessageKind::from_lsp)
            .unwrap_or(MessageKind::Info);
        let actions = params
            .get("actions")
            .and_then(Value::as_array)
            .map(|actions| {
                actions
                    .iter()
                    .filter_map(|a| a.get("title").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        self.events.emit(HostEvent::ShowMessage { kind, text, actions });
    }
}

/// A connected language server.
///
/// Requests get strictly increasing ids and settle exactly once: with the
/// response, with a timeout error, or with a process error when the server
/// goes away.
pub struct LanguageServerInstance {
    shared: Arc<Shared>,
    next_id: AtomicI64,
    outgoing: mpsc::UnboundedSender<Value>,
    child: tokio::sync::Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl LanguageServerInstance {
    /// Spawn the configured command and connect to its stdio
    pub fn spawn(
        language_id: &str,
        config: Arc<dyn LspConfig>,
        events: EventBus,
        request_timeout: Duration,
    ) -> Result<Self> {
        let program = which::which(config.command()).map_err(|e| {
            LumenError::process(format!(
                "{} language server '{}' not found: {}",
                language_id,
                config.command(),
                e
            ))
        })?;

        info!("Starting {} language server: {:?} {:?}", language_id, program, config.args());

        let mut child = Command::new(&program)
            .args(config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LumenError::process(format!("failed to spawn {:?}: {}", program, e))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(LumenError::process("language server stdio unavailable"));
        };
        let stderr = child.stderr.take();

        let instance = Self::attach(
            language_id,
            stdout,
            stdin,
            config,
            events,
            request_timeout,
            Some(child),
        );

        if let Some(stderr) = stderr {
            let language = language_id.to_string();
            let handle = tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{} stderr] {}", language, line);
                }
            });
            instance.track_task(handle);
        }

        Ok(instance)
    }

    /// Connect over an arbitrary transport (pipes, sockets, in-memory streams)
    pub fn connect<R, W>(
        language_id: &str,
        reader: R,
        writer: W,
        config: Arc<dyn LspConfig>,
        events: EventBus,
        request_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::attach(language_id, reader, writer, config, events, request_timeout, None)
    }

    fn attach<R, W>(
        language_id: &str,
        reader: R,
        writer: W,
        config: Arc<dyn LspConfig>,
        events: EventBus,
        request_timeout: Duration,
        child: Option<Child>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            language_id: language_id.to_string(),
            config,
            events,
            state: Mutex::new(ServerState::NotStarted),
            capabilities: RwLock::new(None),
            pending: Mutex::new(PendingTable::default()),
        });
        let (outgoing, rx) = mpsc::unbounded_channel::<Value>();

        // The writer drains queued messages (e.g. `exit`) and ends once every
        // sender is gone, so it is not aborted with the other tasks.
        tokio::spawn(write_loop(writer, rx, language_id.to_string()));
        let reader_task = tokio::spawn(read_loop(reader, shared.clone(), outgoing.clone()));

        Self {
            shared,
            next_id: AtomicI64::new(1),
            outgoing,
            child: tokio::sync::Mutex::new(child),
            tasks: Mutex::new(vec![reader_task]),
            request_timeout,
        }
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    pub fn language_id(&self) -> &str {
        &self.shared.language_id
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ServerState::Initialized
    }

    /// `capabilities` from the `initialize` response
    pub fn capabilities(&self) -> Option<Value> {
        self.shared
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pending_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .len()
    }

    /// Perform the `initialize` / `initialized` handshake
    pub async fn initialize(&self, root: Option<&Path>) -> Result<()> {
        self.shared.set_state(ServerState::Starting);

        let root_uri = root.map(path_to_uri);
        let workspace_folders = match (&root_uri, root) {
            (Some(uri), Some(path)) => json!([{
                "uri": uri,
                "name": path.file_name().and_then(|n| n.to_str()).unwrap_or("workspace")
            }]),
            _ => Value::Null,
        };

        let params = json!({
            "processId": std::process::id(),
            "clientInfo": { "name": "lumen", "version": env!("CARGO_PKG_VERSION") },
            "rootUri": root_uri,
            "workspaceFolders": workspace_folders,
            "capabilities": self.shared.config.capabilities(),
            "initializationOptions": self.shared.config.initialization_options(root),
        });

        let result = match self.request("initialize", params).await {
            Ok(result) => result,
            Err(e) => {
                self.shared.set_state(ServerState::Shutdown);
                return Err(e);
            }
        };

        *self
            .shared
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) =
            Some(result.get("capabilities").cloned().unwrap_or(Value::Null));
        self.shared.set_state(ServerState::Initialized);
        self.notify("initialized", json!({}));

        info!("{} language server initialized", self.language_id());
        Ok(())
    }

    /// Send a request and wait for its response, bounded by the request timeout
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if pending.closed {
                return Err(LumenError::process(format!(
                    "{} language server is not running",
                    self.language_id()
                )));
            }
            pending.requests.insert(id, tx);
        }

        debug!("-> {} #{} {}", self.language_id(), id, method);
        if self.outgoing.send(protocol::request(id, method, params)).is_err() {
            self.forget(id);
            return Err(LumenError::process("language server writer closed"));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LumenError::process(format!(
                "{} language server dropped request {}",
                self.language_id(),
                method
            ))),
            Err(_) => {
                self.forget(id);
                warn!("{} request {} #{} timed out", self.language_id(), method, id);
                Err(LumenError::timeout(
                    method,
                    self.request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    fn forget(&self, id: i64) {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .remove(&id);
    }

    /// Queue a notification; false if the transport is gone
    pub fn notify(&self, method: &str, params: Value) -> bool {
        debug!("-> {} {}", self.language_id(), method);
        self.outgoing
            .send(protocol::notification(method, params))
            .is_ok()
    }

    /// `shutdown` request, `exit` notification, then kill whatever is left
    pub async fn shutdown(&self) {
        if self.is_initialized() {
            if let Err(e) = self.request("shutdown", Value::Null).await {
                debug!("{} shutdown request failed: {}", self.language_id(), e);
            }
            self.notify("exit", Value::Null);

            if let Some(child) = self.child.lock().await.as_mut() {
                match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                    Ok(Ok(status)) => debug!("{} exited with {}", self.language_id(), status),
                    _ => debug!("{} did not exit in time", self.language_id()),
                }
            }
        }
        self.kill().await;
    }

    /// Kill the process without any protocol exchange
    pub async fn kill(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("{} process already gone: {}", self.language_id(), e);
            }
        }
        self.shared.close("shut down");
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        info!("{} language server stopped", self.language_id());
    }
}

async fn write_loop<W>(writer: W, mut rx: mpsc::UnboundedReceiver<Value>, language_id: String)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut sink = FramedWrite::new(writer, LspCodec::new());
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!("Failed to write to {} language server: {}", language_id, e);
            break;
        }
    }
}

async fn read_loop<R>(reader: R, shared: Arc<Shared>, outgoing: mpsc::UnboundedSender<Value>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut stream = FramedRead::new(reader, LspCodec::new());
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(message) => shared.dispatch(message, &outgoing),
            Err(e) => {
                warn!("Read error from {} language server: {}", shared.language_id, e);
                break;
            }
        }
    }
    info!("{} language server output closed", shared.language_id);
    shared.close("process exited");
}
