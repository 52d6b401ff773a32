//! Host event types for the event bus system.
//!
//! These are the outbound events the core emits for the UI layer to render.

use serde::{Deserialize, Serialize};

use crate::types::{Diagnostic, MessageKind, StatusBarItem};

/// Events that flow from the core to the UI layer.
///
/// Events are categorized by their source domain:
/// - Language events: diagnostics published by servers or extensions
/// - Extension events: the installed/active extension set changed
/// - Window events: messages and status bar contributions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum HostEvent {
    /// Diagnostics for a document were replaced
    #[serde(rename_all = "camelCase")]
    Diagnostics {
        uri: String,
        /// Who published them (language id of a server or a collection name)
        source: String,
        diagnostics: Vec<Diagnostic>,
    },

    /// An extension was loaded, activated, deactivated, enabled, disabled or removed
    ExtensionsChanged,

    /// A message should be shown to the user
    ShowMessage {
        kind: MessageKind,
        text: String,
        actions: Vec<String>,
    },

    /// The set of visible status bar items changed
    StatusBarUpdate { items: Vec<StatusBarItem> },
}

impl HostEvent {
    /// Get a human-readable description of the event for logging.
    pub fn description(&self) -> String {
        match self {
            HostEvent::Diagnostics {
                uri,
                source,
                diagnostics,
            } => format!(
                "{} diagnostics for {} from {}",
                diagnostics.len(),
                uri,
                source
            ),
            HostEvent::ExtensionsChanged => "Extensions changed".to_string(),
            HostEvent::ShowMessage { kind, text, .. } => {
                format!("Show {:?} message: {}", kind, text)
            }
            HostEvent::StatusBarUpdate { items } => {
                format!("Status bar updated ({} items)", items.len())
            }
        }
    }
}
