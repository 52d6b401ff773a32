//! Workspace facade: open documents, document events and configuration

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use tracing::debug;

use super::disposable::Disposable;
use super::ExtensionApi;
use crate::documents::{ClosedDocument, TextDocumentContentChange, TrackedDocument};
use crate::error::Result;
use crate::settings;

/// Payload of `on_did_change_text_document`
#[derive(Debug, Clone)]
pub struct TextDocumentChangeEvent {
    pub document: Arc<TrackedDocument>,
    pub content_changes: Vec<TextDocumentContentChange>,
}

/// Payload of `on_did_change_configuration`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationChangeEvent {
    key: String,
}

impl ConfigurationChangeEvent {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the change touches `section` (a parent, the key itself, or a child of it)
    pub fn affects_configuration(&self, section: &str) -> bool {
        fn within(inner: &str, outer: &str) -> bool {
            inner == outer
                || (inner.len() > outer.len()
                    && inner.starts_with(outer)
                    && inner.as_bytes()[outer.len()] == b'.')
        }
        section.is_empty() || within(&self.key, section) || within(section, &self.key)
    }
}

/// Read-only snapshot of one configuration section
#[derive(Debug, Clone)]
pub struct Configuration {
    section: String,
    value: Value,
}

impl Configuration {
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = settings::get_nested_value(&self.value, key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Configuration {}.{} has unexpected shape: {}", self.section, key, e);
                None
            }
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        settings::get_nested_value(&self.value, key).is_some_and(|v| !v.is_null())
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

/// The `workspace` namespace
pub struct Workspace<'a> {
    pub(crate) api: &'a ExtensionApi,
}

impl Workspace<'_> {
    pub fn text_documents(&self) -> Vec<Arc<TrackedDocument>> {
        self.api.inner.documents.all()
    }

    pub fn get_text_document(&self, uri: &str) -> Option<Arc<TrackedDocument>> {
        self.api.inner.documents.get(uri)
    }

    pub fn workspace_folders(&self) -> Vec<PathBuf> {
        self.api
            .inner
            .workspace_folders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn on_did_open_text_document<F>(&self, listener: F) -> Disposable
    where
        F: Fn(&Arc<TrackedDocument>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.api.inner.on_open.event(listener)
    }

    pub fn on_did_change_text_document<F>(&self, listener: F) -> Disposable
    where
        F: Fn(&TextDocumentChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.api.inner.on_change.event(listener)
    }

    pub fn on_did_close_text_document<F>(&self, listener: F) -> Disposable
    where
        F: Fn(&ClosedDocument) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.api.inner.on_close.event(listener)
    }

    pub fn on_did_change_configuration<F>(&self, listener: F) -> Disposable
    where
        F: Fn(&ConfigurationChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.api.inner.on_config.event(listener)
    }

    /// Snapshot of a configuration section; an empty section is the whole tree
    pub fn get_configuration(&self, section: &str) -> Configuration {
        let tree = self
            .api
            .inner
            .configuration
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let value = settings::get_nested_value(&tree, section)
            .cloned()
            .unwrap_or(Value::Null);
        Configuration {
            section: section.to_string(),
            value,
        }
    }

    /// Set a dotted key in the in-memory settings and notify listeners
    pub fn update_configuration(&self, key: &str, value: Value) -> Result<()> {
        {
            let mut tree = self
                .api
                .inner
                .configuration
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            settings::set_nested_value(&mut tree, key, value)?;
        }
        debug!("[{}] Configuration {} updated", self.api.extension_id(), key);
        self.api
            .inner
            .on_config
            .fire(&ConfigurationChangeEvent::new(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affects_configuration() {
        let event = ConfigurationChangeEvent::new("python.analysis.typeCheckingMode");
        assert!(event.affects_configuration("python"));
        assert!(event.affects_configuration("python.analysis"));
        assert!(event.affects_configuration("python.analysis.typeCheckingMode.extra"));
        assert!(!event.affects_configuration("pythonx"));
        assert!(!event.affects_configuration("rust"));
    }

    #[test]
    fn test_configuration_get() {
        let config = Configuration {
            section: "editor".to_string(),
            value: serde_json::json!({ "tabSize": 2, "font": { "size": 13 } }),
        };
        assert_eq!(config.get::<u32>("tabSize"), Some(2));
        assert_eq!(config.get::<u32>("font.size"), Some(13));
        assert_eq!(config.get_or("wordWrap", false), false);
        assert!(config.get::<String>("tabSize").is_none());
        assert!(config.has("font"));
    }
}
