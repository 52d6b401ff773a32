//! Provider traits implemented by extensions
//!
//! Each trait covers one capability. Providers return `anyhow::Result` so
//! extension code can use `?` freely; the API layer logs and skips failures.

use async_trait::async_trait;

use crate::documents::TrackedDocument;
use crate::types::{
    LspCompletionItem, LspFormattingOptions, LspHover, LspLocation, LspPosition, LspTextEdit,
    LspWorkspaceEdit,
};

/// Why completion was requested
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionContext {
    /// Set when the request was caused by typing one of the provider's trigger characters
    pub trigger_character: Option<String>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn provide_completion_items(
        &self,
        document: &TrackedDocument,
        position: LspPosition,
        context: &CompletionContext,
    ) -> anyhow::Result<Vec<LspCompletionItem>>;
}

#[async_trait]
pub trait HoverProvider: Send + Sync {
    async fn provide_hover(
        &self,
        document: &TrackedDocument,
        position: LspPosition,
    ) -> anyhow::Result<Option<LspHover>>;
}

#[async_trait]
pub trait DefinitionProvider: Send + Sync {
    async fn provide_definition(
        &self,
        document: &TrackedDocument,
        position: LspPosition,
    ) -> anyhow::Result<Vec<LspLocation>>;
}

#[async_trait]
pub trait ReferenceProvider: Send + Sync {
    async fn provide_references(
        &self,
        document: &TrackedDocument,
        position: LspPosition,
        include_declaration: bool,
    ) -> anyhow::Result<Vec<LspLocation>>;
}

#[async_trait]
pub trait FormattingProvider: Send + Sync {
    async fn provide_document_formatting_edits(
        &self,
        document: &TrackedDocument,
        options: LspFormattingOptions,
    ) -> anyhow::Result<Vec<LspTextEdit>>;
}

#[async_trait]
pub trait RenameProvider: Send + Sync {
    async fn provide_rename_edits(
        &self,
        document: &TrackedDocument,
        position: LspPosition,
        new_name: &str,
    ) -> anyhow::Result<Option<LspWorkspaceEdit>>;
}
