//! Extension system
//!
//! Extensions are packages with a VS Code style `package.json` and an
//! optional entry module implementing [`Extension`].

pub mod context;
pub mod host;
pub mod loader;
pub mod manifest;

pub use context::{ExtensionContext, Memento, ProcessTracker};
pub use host::{ExtensionDescriptor, ExtensionHost};
pub use loader::{Extension, ModuleLoader};
pub use manifest::{ActivationEvent, ExtensionManifest};
