//! Lumen - extension host and language server bridge
//!
//! Hosts extensions written against a VS Code style API and connects the
//! editor to external language servers over LSP. [`Workbench`] is the
//! entry point for an embedding editor.

pub mod api;
pub mod documents;
pub mod error;
pub mod events;
pub mod extensions;
pub mod logging;
pub mod lsp;
pub mod providers;
pub mod settings;
pub mod types;
pub mod utils;
pub mod workbench;

pub use api::ExtensionApi;
pub use error::{LumenError, Result};
pub use events::{EventBus, HostEvent};
pub use extensions::{Extension, ExtensionContext, ExtensionHost, ModuleLoader};
pub use lsp::LspClient;
pub use settings::{HostPaths, HostSettings};
pub use workbench::{QueryResults, Workbench};
