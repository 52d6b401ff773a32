//! Extension manifest (`package.json`)
//!
//! Only the fields the host acts on are modelled; everything else in the
//! file is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{LumenError, Result};

pub const MANIFEST_FILENAME: &str = "package.json";

fn default_version() -> String {
    "0.0.0".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Entry module; extensions without one are declarative only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default)]
    pub activation_events: Vec<String>,
    /// Engine compatibility, e.g. `{"vscode": "^1.80.0"}`
    #[serde(default)]
    pub engines: BTreeMap<String, String>,
    #[serde(default)]
    pub contributes: Contributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributes {
    #[serde(default)]
    pub commands: Vec<CommandContribution>,
    #[serde(default)]
    pub languages: Vec<LanguageContribution>,
    /// A configuration object, or an array of them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandContribution {
    pub command: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageContribution {
    pub id: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A parsed activation event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationEvent {
    /// `*`
    Always,
    OnStartupFinished,
    OnLanguage(String),
    OnCommand(String),
    WorkspaceContains(String),
    Other(String),
}

impl ActivationEvent {
    pub fn parse(event: &str) -> Self {
        if event == "*" {
            return Self::Always;
        }
        if event == "onStartupFinished" {
            return Self::OnStartupFinished;
        }
        match event.split_once(':') {
            Some(("onLanguage", id)) => Self::OnLanguage(id.to_string()),
            Some(("onCommand", id)) => Self::OnCommand(id.to_string()),
            Some(("workspaceContains", pattern)) => Self::WorkspaceContains(pattern.to_string()),
            _ => Self::Other(event.to_string()),
        }
    }
}

impl ExtensionManifest {
    /// Parse a manifest from JSON text
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: ExtensionManifest = serde_json::from_str(content)
            .map_err(|e| LumenError::manifest(format!("Invalid package.json: {}", e)))?;
        if manifest.publisher.trim().is_empty() || manifest.name.trim().is_empty() {
            return Err(LumenError::manifest(
                "package.json must declare both publisher and name",
            ));
        }
        Ok(manifest)
    }

    /// Read `package.json` from an extension directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);
        let content = fs::read_to_string(&path)
            .map_err(|e| LumenError::manifest(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// `publisher.name`
    pub fn id(&self) -> String {
        format!("{}.{}", self.publisher, self.name)
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether this manifest should activate for `event`. Contributed commands
    /// and languages imply the matching `onCommand`/`onLanguage` events.
    pub fn activates_on(&self, event: &str, workspace_open: bool) -> bool {
        let wanted = ActivationEvent::parse(event);
        let declared = self.activation_events.iter().any(|declared| {
            match ActivationEvent::parse(declared) {
                ActivationEvent::Always => true,
                ActivationEvent::WorkspaceContains(_) => workspace_open,
                parsed => parsed == wanted,
            }
        });
        if declared {
            return true;
        }
        match wanted {
            ActivationEvent::OnCommand(id) => self.contributes.commands.iter().any(|c| c.command == id),
            ActivationEvent::OnLanguage(id) => self.contributes.languages.iter().any(|l| l.id == id),
            _ => false,
        }
    }

    /// `(key, default)` pairs from `contributes.configuration`
    pub fn configuration_defaults(&self) -> Vec<(String, Value)> {
        let sections: Vec<&Value> = match &self.contributes.configuration {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(value @ Value::Object(_)) => vec![value],
            _ => Vec::new(),
        };

        let mut defaults = Vec::new();
        for section in sections {
            let Some(Value::Object(properties)) = section.get("properties") else {
                continue;
            };
            for (key, schema) in properties {
                if let Some(default) = schema.get("default") {
                    defaults.push((key.clone(), default.clone()));
                }
            }
        }
        defaults
    }
}
