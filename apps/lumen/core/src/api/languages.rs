//! Languages facade: provider registration and diagnostic collections

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::disposable::Disposable;
use super::ExtensionApi;
use crate::events::{EventBus, HostEvent};
use crate::providers::{
    Capability, CompletionProvider, DefinitionProvider, DocumentSelector, FormattingProvider,
    HoverProvider, ProviderHandle, ReferenceProvider, Registration, RenameProvider,
};
use crate::types::Diagnostic;

/// The `languages` namespace
pub struct Languages<'a> {
    pub(crate) api: &'a ExtensionApi,
}

impl Languages<'_> {
    fn register(
        &self,
        selector: DocumentSelector,
        provider: ProviderHandle,
        trigger_characters: &[&str],
    ) -> Disposable {
        let id = self.api.inner.registry.register(
            selector,
            provider,
            self.api.extension_id(),
            trigger_characters.iter().map(|c| c.to_string()).collect(),
        );
        let registry = Arc::downgrade(&self.api.inner);
        Disposable::new(move || {
            if let Some(inner) = registry.upgrade() {
                inner.registry.unregister(id);
            }
        })
    }

    pub fn register_completion_provider(
        &self,
        selector: impl Into<DocumentSelector>,
        provider: impl CompletionProvider + 'static,
        trigger_characters: &[&str],
    ) -> Disposable {
        self.register(
            selector.into(),
            ProviderHandle::Completion(Arc::new(provider)),
            trigger_characters,
        )
    }

    pub fn register_hover_provider(
        &self,
        selector: impl Into<DocumentSelector>,
        provider: impl HoverProvider + 'static,
    ) -> Disposable {
        self.register(selector.into(), ProviderHandle::Hover(Arc::new(provider)), &[])
    }

    pub fn register_definition_provider(
        &self,
        selector: impl Into<DocumentSelector>,
        provider: impl DefinitionProvider + 'static,
    ) -> Disposable {
        self.register(selector.into(), ProviderHandle::Definition(Arc::new(provider)), &[])
    }

    pub fn register_reference_provider(
        &self,
        selector: impl Into<DocumentSelector>,
        provider: impl ReferenceProvider + 'static,
    ) -> Disposable {
        self.register(selector.into(), ProviderHandle::References(Arc::new(provider)), &[])
    }

    pub fn register_document_formatting_provider(
        &self,
        selector: impl Into<DocumentSelector>,
        provider: impl FormattingProvider + 'static,
    ) -> Disposable {
        self.register(selector.into(), ProviderHandle::Formatting(Arc::new(provider)), &[])
    }

    pub fn register_rename_provider(
        &self,
        selector: impl Into<DocumentSelector>,
        provider: impl RenameProvider + 'static,
    ) -> Disposable {
        self.register(selector.into(), ProviderHandle::Rename(Arc::new(provider)), &[])
    }

    pub fn providers_for_language(&self, capability: Capability, language_id: &str) -> Vec<Arc<Registration>> {
        self.api.inner.registry.providers_for_language(capability, language_id)
    }

    pub fn create_diagnostic_collection(&self, name: &str) -> DiagnosticCollection {
        DiagnosticCollection {
            name: name.to_string(),
            events: self.api.inner.events.clone(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

/// Diagnostics published by an extension under one name.
/// Every change replaces the document's diagnostics and emits a `Diagnostics` event.
#[derive(Clone)]
pub struct DiagnosticCollection {
    name: String,
    events: EventBus,
    entries: Arc<RwLock<HashMap<String, Vec<Diagnostic>>>>,
}

impl DiagnosticCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
        self.events.emit(HostEvent::Diagnostics {
            uri: uri.to_string(),
            source: self.name.clone(),
            diagnostics,
        });
    }

    pub fn set(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
        let diagnostics: Vec<Diagnostic> = diagnostics
            .into_iter()
            .map(|mut d| {
                d.source.get_or_insert_with(|| self.name.clone());
                d
            })
            .collect();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.to_string(), diagnostics.clone());
        self.publish(uri, diagnostics);
    }

    pub fn get(&self, uri: &str) -> Vec<Diagnostic> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    pub fn delete(&self, uri: &str) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
        if removed.is_some() {
            self.publish(uri, Vec::new());
        }
    }

    pub fn clear(&self) {
        let uris: Vec<String> = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(uri, _)| uri)
            .collect();
        for uri in uris {
            self.publish(&uri, Vec::new());
        }
    }

    /// A [`Disposable`] that clears the collection
    pub fn as_disposable(&self) -> Disposable {
        let collection = self.clone();
        Disposable::new(move || collection.clear())
    }
}
