//! LSP Configuration Trait
//!
//! Defines how a language server is launched and what the client advertises.

use serde_json::{json, Value};
use std::path::Path;

use crate::settings::{get_nested_value, ServerCommand};

/// Configuration trait for language servers.
///
/// `ServerCommand` from the settings file is the stock implementation;
/// tests and embedders can supply their own.
pub trait LspConfig: Send + Sync + 'static {
    /// The command to execute (e.g., "typescript-language-server")
    fn command(&self) -> &str;

    fn args(&self) -> Vec<String>;

    /// LSP initialization options (server-specific)
    fn initialization_options(&self, _root: Option<&Path>) -> Value {
        Value::Null
    }

    /// LSP client capabilities to advertise
    fn capabilities(&self) -> Value {
        json!({
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "didSave": true,
                    "willSave": false,
                    "willSaveWaitUntil": false
                },
                "publishDiagnostics": {
                    "relatedInformation": true
                },
                "hover": {
                    "contentFormat": ["markdown", "plaintext"]
                },
                "completion": {
                    "completionItem": {
                        "snippetSupport": false,
                        "documentationFormat": ["markdown", "plaintext"]
                    }
                },
                "definition": {
                    "linkSupport": true
                },
                "formatting": {}
            },
            "workspace": {
                "workspaceFolders": true,
                "configuration": true
            },
            "window": {
                "showMessage": {}
            }
        })
    }

    /// Value for one `workspace/configuration` item
    fn workspace_configuration(&self, _section: Option<&str>) -> Value {
        Value::Null
    }
}

impl LspConfig for ServerCommand {
    fn command(&self) -> &str {
        &self.command
    }

    fn args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn initialization_options(&self, _root: Option<&Path>) -> Value {
        self.initialization_options.clone().unwrap_or(Value::Null)
    }

    fn workspace_configuration(&self, section: Option<&str>) -> Value {
        let Some(settings) = &self.settings else {
            return Value::Null;
        };
        match section {
            Some(section) if !section.is_empty() => get_nested_value(settings, section)
                .cloned()
                .unwrap_or(Value::Null),
            _ => settings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_command_configuration_sections() {
        let mut server = ServerCommand::new("pyright-langserver", &["--stdio"]);
        assert_eq!(server.workspace_configuration(Some("python")), Value::Null);

        server.settings = Some(json!({"python": {"analysis": {"typeCheckingMode": "strict"}}}));
        assert_eq!(
            server.workspace_configuration(Some("python.analysis.typeCheckingMode")),
            json!("strict")
        );
        assert_eq!(server.workspace_configuration(None), server.settings.clone().unwrap());
        assert_eq!(server.workspace_configuration(Some("missing")), Value::Null);
    }

    #[test]
    fn test_default_capabilities_cover_used_features() {
        let caps = ServerCommand::new("x", &[]).capabilities();
        let text = &caps["textDocument"];
        assert_eq!(text["synchronization"]["didSave"], true);
        assert_eq!(text["publishDiagnostics"]["relatedInformation"], true);
        for feature in ["completion", "hover", "definition", "formatting"] {
            assert!(text.get(feature).is_some(), "missing {}", feature);
        }
    }
}
