//! Host Settings Module
//!
//! Handles the on-disk layout of the host and loading of `settings.jsonc`.
//! The raw settings tree backs `workspace.getConfiguration` for extensions;
//! the `lsp` section additionally configures the language server bridge.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{LumenError, Result};

// =============================================================================
// On-disk layout
// =============================================================================

const SETTINGS_FILENAME: &str = "settings.jsonc";
const USER_EXTENSIONS_DIR: &str = "extensions";
const BUNDLED_EXTENSIONS_DIR: &str = "bundled-extensions";
const STORAGE_DIR: &str = "extension-storage";
const LOGS_DIR: &str = "logs";
const DISABLED_FILENAME: &str = "disabled-extensions.json";

/// Default request timeout for language server requests
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Directory layout of a Lumen data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub data_dir: PathBuf,
    /// User-installed extensions, one `<publisher.name>` directory each
    pub user_extensions: PathBuf,
    /// Extensions shipped with the application
    pub bundled_extensions: PathBuf,
    /// Per-extension persisted storage
    pub storage: PathBuf,
    pub logs: PathBuf,
    /// JSON array of disabled extension ids
    pub disabled_file: PathBuf,
}

impl HostPaths {
    /// Build the layout rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            user_extensions: data_dir.join(USER_EXTENSIONS_DIR),
            bundled_extensions: data_dir.join(BUNDLED_EXTENSIONS_DIR),
            storage: data_dir.join(STORAGE_DIR),
            logs: data_dir.join(LOGS_DIR),
            disabled_file: data_dir.join(DISABLED_FILENAME),
            data_dir,
        }
    }

    /// The platform data directory (e.g. `~/.local/share/lumen`)
    pub fn default_location() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("dev", "lumen", "lumen")
            .ok_or_else(|| LumenError::config("Could not determine a data directory"))?;
        Ok(Self::new(dirs.data_dir()))
    }

    /// Use a different directory for bundled extensions
    pub fn with_bundled_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundled_extensions = dir.into();
        self
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILENAME)
    }

    /// Storage root of one extension (`extension-storage/<publisher.name>`)
    pub fn extension_storage(&self, extension_id: &str) -> PathBuf {
        self.storage.join(extension_id)
    }

    pub fn extension_log_dir(&self, extension_id: &str) -> PathBuf {
        self.logs.join(extension_id)
    }
}

// =============================================================================
// Settings Types
// =============================================================================

/// How to launch the language server for one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub initialization_options: Option<Value>,
    /// Returned to `workspace/configuration` requests
    #[serde(default)]
    pub settings: Option<Value>,
}

impl ServerCommand {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            initialization_options: None,
            settings: None,
        }
    }
}

/// The `lsp` settings section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspSettings {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// languageId -> server command
    #[serde(default = "default_servers")]
    pub servers: BTreeMap<String, ServerCommand>,
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_servers() -> BTreeMap<String, ServerCommand> {
    let typescript = ServerCommand::new("typescript-language-server", &["--stdio"]);
    let mut servers = BTreeMap::new();
    servers.insert("typescript".to_string(), typescript.clone());
    servers.insert("javascript".to_string(), typescript);
    servers.insert(
        "python".to_string(),
        ServerCommand::new("pyright-langserver", &["--stdio"]),
    );
    servers.insert("rust".to_string(), ServerCommand::new("rust-analyzer", &[]));
    servers
}

impl Default for LspSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            servers: default_servers(),
        }
    }
}

/// Loaded host settings
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub paths: HostPaths,
    pub lsp: LspSettings,
    /// The full settings tree, dotted keys expanded
    pub tree: Value,
}

impl HostSettings {
    /// Defaults for a data directory, without reading anything from disk
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: HostPaths::new(data_dir),
            lsp: LspSettings::default(),
            tree: Value::Object(serde_json::Map::new()),
        }
    }

    /// Load `settings.jsonc` from the layout's data directory
    pub fn load(paths: HostPaths) -> Result<Self> {
        let tree = read_settings_file(&paths.settings_file())?;
        let lsp = match tree.get("lsp") {
            Some(section) => serde_json::from_value(section.clone())
                .map_err(|e| LumenError::config(format!("Invalid lsp settings: {}", e)))?,
            None => LspSettings::default(),
        };
        Ok(Self { paths, lsp, tree })
    }
}

// =============================================================================
// Settings Loading & Parsing
// =============================================================================

/// Parse a JSONC string (JSON with comments) into a Value
pub fn parse_jsonc(content: &str) -> Result<Value> {
    let stripped = json_comments::StripComments::new(content.as_bytes());
    serde_json::from_reader(stripped)
        .map_err(|e| LumenError::config(format!("Failed to parse JSONC: {}", e)))
}

/// Read and parse a settings file, expanding dotted keys into nested objects
fn read_settings_file(path: &Path) -> Result<Value> {
    if !path.exists() {
        debug!("Settings file does not exist: {:?}", path);
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let mut value = parse_jsonc(&content)?;
    expand_dotted_keys(&mut value);
    Ok(value)
}

/// Deep merge two JSON values (source into target)
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(key) {
                    Some(target_value) => deep_merge(target_value, source_value),
                    None => {
                        target_map.insert(key.clone(), source_value.clone());
                    }
                }
            }
        }
        (target, source) => {
            *target = source.clone();
        }
    }
}

/// Expand dotted keys into nested objects
/// E.g., {"lsp.requestTimeoutMs": 5} -> {"lsp": {"requestTimeoutMs": 5}}
pub fn expand_dotted_keys(obj: &mut Value) {
    if let Value::Object(map) = obj {
        let dotted_keys: Vec<(String, Value)> = map
            .iter()
            .filter(|(k, _)| k.contains('.'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, value) in dotted_keys {
            map.remove(&key);
            if let Some((first, rest)) = key.split_once('.') {
                let nested = map
                    .entry(first.to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Value::Object(nested_map) = nested {
                    nested_map.insert(rest.to_string(), value);
                }
            }
        }

        for value in map.values_mut() {
            if value.is_object() {
                expand_dotted_keys(value);
            }
        }
    }
}

/// Look up a dotted key (`editor.tabSize`); an empty key returns the root
pub fn get_nested_value<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return Some(root);
    }
    key.split('.').try_fold(root, |current, part| current.get(part))
}

/// Set a value at a dotted key, creating intermediate objects as needed
pub fn set_nested_value(root: &mut Value, key: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if key.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(LumenError::config(format!("Invalid key format: {}", key)));
    }

    let mut current = root;
    for (i, part) in parts.iter().enumerate() {
        let Value::Object(map) = current else {
            return Err(LumenError::config(format!(
                "Cannot set {}: intermediate value is not an object",
                key
            )));
        };
        if i == parts.len() - 1 {
            map.insert(part.to_string(), value);
            return Ok(());
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    Ok(())
}
