//! Provider registry
//!
//! Maps (capability, language) to an ordered list of provider registrations.
//! One selector can resolve to many languages, so a registration may sit in
//! several buckets at once; unregistering removes it from all of them.
//! Registrations whose selector only matches by path or scheme live in a
//! separate per-capability list and are only considered for concrete documents.

pub mod selector;
pub mod traits;

pub use selector::{DocumentFilter, DocumentSelector};
pub use traits::{
    CompletionContext, CompletionProvider, DefinitionProvider, FormattingProvider, HoverProvider,
    ReferenceProvider, RenameProvider,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A provider capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Completion,
    Hover,
    Definition,
    References,
    Formatting,
    Rename,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Completion => "completion",
            Capability::Hover => "hover",
            Capability::Definition => "definition",
            Capability::References => "references",
            Capability::Formatting => "formatting",
            Capability::Rename => "rename",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completion" => Ok(Capability::Completion),
            "hover" => Ok(Capability::Hover),
            "definition" => Ok(Capability::Definition),
            "references" | "reference" => Ok(Capability::References),
            "formatting" | "documentFormatting" => Ok(Capability::Formatting),
            "rename" => Ok(Capability::Rename),
            other => Err(format!("Unknown provider capability: {}", other)),
        }
    }
}

/// The provider object behind a registration
#[derive(Clone)]
pub enum ProviderHandle {
    Completion(Arc<dyn CompletionProvider>),
    Hover(Arc<dyn HoverProvider>),
    Definition(Arc<dyn DefinitionProvider>),
    References(Arc<dyn ReferenceProvider>),
    Formatting(Arc<dyn FormattingProvider>),
    Rename(Arc<dyn RenameProvider>),
}

impl ProviderHandle {
    pub fn capability(&self) -> Capability {
        match self {
            ProviderHandle::Completion(_) => Capability::Completion,
            ProviderHandle::Hover(_) => Capability::Hover,
            ProviderHandle::Definition(_) => Capability::Definition,
            ProviderHandle::References(_) => Capability::References,
            ProviderHandle::Formatting(_) => Capability::Formatting,
            ProviderHandle::Rename(_) => Capability::Rename,
        }
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderHandle({})", self.capability())
    }
}

/// Registration id; ids increase with registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistrationId(u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct Registration {
    pub id: RegistrationId,
    pub selector: DocumentSelector,
    pub provider: ProviderHandle,
    pub extension_id: String,
    pub trigger_characters: Vec<String>,
}

impl Registration {
    pub fn capability(&self) -> Capability {
        self.provider.capability()
    }
}

#[derive(Default)]
struct RegistryInner {
    registrations: HashMap<RegistrationId, Arc<Registration>>,
    /// (capability, language or `*`) -> ids in registration order
    buckets: HashMap<(Capability, String), Vec<RegistrationId>>,
    /// Registrations with path/scheme-only selector parts
    pattern_entries: HashMap<Capability, Vec<RegistrationId>>,
}

impl RegistryInner {
    fn resolve(&self, mut ids: Vec<RegistrationId>) -> Vec<Arc<Registration>> {
        ids.sort();
        ids.dedup();
        ids.iter()
            .filter_map(|id| self.registrations.get(id).cloned())
            .collect()
    }
}

/// Per-capability provider multimap
#[derive(Default)]
pub struct ProviderRegistry {
    next_id: AtomicU64,
    inner: RwLock<RegistryInner>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under every language its selector resolves to
    pub fn register(
        &self,
        selector: DocumentSelector,
        provider: ProviderHandle,
        extension_id: &str,
        trigger_characters: Vec<String>,
    ) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let capability = provider.capability();
        let keys = selector.keys();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for language in &keys.languages {
            inner
                .buckets
                .entry((capability, language.clone()))
                .or_default()
                .push(id);
        }
        if keys.has_patterns {
            inner.pattern_entries.entry(capability).or_default().push(id);
        }

        debug!(
            "Registered {} provider {} for {} ({:?})",
            capability, id, extension_id, keys.languages
        );

        inner.registrations.insert(
            id,
            Arc::new(Registration {
                id,
                selector,
                provider,
                extension_id: extension_id.to_string(),
                trigger_characters,
            }),
        );
        id
    }

    /// Remove a registration from every bucket. Returns false if it was already gone.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(registration) = inner.registrations.remove(&id) else {
            return false;
        };

        let capability = registration.capability();
        let keys = registration.selector.keys();
        for language in &keys.languages {
            let key = (capability, language.clone());
            if let Some(bucket) = inner.buckets.get_mut(&key) {
                bucket.retain(|entry| *entry != id);
                if bucket.is_empty() {
                    inner.buckets.remove(&key);
                }
            }
        }
        if let Some(entries) = inner.pattern_entries.get_mut(&capability) {
            entries.retain(|entry| *entry != id);
        }

        debug!("Unregistered {} provider {}", capability, id);
        true
    }

    /// Remove every registration owned by an extension
    pub fn unregister_extension(&self, extension_id: &str) -> usize {
        let ids: Vec<RegistrationId> = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            inner
                .registrations
                .values()
                .filter(|r| r.extension_id == extension_id)
                .map(|r| r.id)
                .collect()
        };
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }

    /// Registrations matching a language, in registration order
    pub fn providers_for_language(
        &self,
        capability: Capability,
        language_id: &str,
    ) -> Vec<Arc<Registration>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids = Vec::new();
        for key in [language_id, selector::WILDCARD] {
            if let Some(bucket) = inner.buckets.get(&(capability, key.to_string())) {
                ids.extend_from_slice(bucket);
            }
        }
        inner.resolve(ids)
    }

    /// String-keyed lookup; unknown capabilities yield an empty list
    pub fn get_providers_for_language(
        &self,
        capability: &str,
        language_id: &str,
    ) -> Vec<Arc<Registration>> {
        match capability.parse::<Capability>() {
            Ok(capability) => self.providers_for_language(capability, language_id),
            Err(e) => {
                debug!("{}", e);
                Vec::new()
            }
        }
    }

    /// Registrations matching a concrete document, path patterns included
    pub fn providers_for_document(
        &self,
        capability: Capability,
        uri: &str,
        language_id: &str,
    ) -> Vec<Arc<Registration>> {
        let mut ids: Vec<RegistrationId> = self
            .providers_for_language(capability, language_id)
            .iter()
            .map(|r| r.id)
            .collect();

        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = inner.pattern_entries.get(&capability) {
            for id in entries {
                let matched = inner
                    .registrations
                    .get(id)
                    .is_some_and(|r| r.selector.matches_document(uri, language_id));
                if matched {
                    ids.push(*id);
                }
            }
        }
        inner.resolve(ids)
    }

    /// Trigger characters declared by completion providers for a language
    pub fn trigger_characters(&self, language_id: &str) -> Vec<String> {
        let mut chars: Vec<String> = self
            .providers_for_language(Capability::Completion, language_id)
            .iter()
            .flat_map(|r| r.trigger_characters.iter().cloned())
            .collect();
        chars.sort();
        chars.dedup();
        chars
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .registrations
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::TrackedDocument;
    use crate::types::{LspHover, LspMarkupContent, LspPosition};
    use async_trait::async_trait;

    struct StaticHover(&'static str);

    #[async_trait]
    impl HoverProvider for StaticHover {
        async fn provide_hover(
            &self,
            _document: &TrackedDocument,
            _position: LspPosition,
        ) -> anyhow::Result<Option<LspHover>> {
            Ok(Some(LspHover {
                contents: LspMarkupContent::plaintext(self.0),
                range: None,
            }))
        }
    }

    fn hover(text: &'static str) -> ProviderHandle {
        ProviderHandle::Hover(Arc::new(StaticHover(text)))
    }

    #[test]
    fn test_language_and_glob_selector_registers_once() {
        let registry = ProviderRegistry::new();
        let id = registry.register(
            DocumentSelector::from(vec!["python", "*.py"]),
            hover("py"),
            "acme.python",
            vec![],
        );

        let found = registry.get_providers_for_language("hover", "python");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);

        assert!(registry.unregister(id));
        assert!(registry.get_providers_for_language("hover", "python").is_empty());
        assert!(registry
            .providers_for_document(Capability::Hover, "file:///x.py", "python")
            .is_empty());
    }

    #[test]
    fn test_multi_language_selector_lands_in_every_bucket() {
        let registry = ProviderRegistry::new();
        let id = registry.register(
            DocumentSelector::from(vec!["javascript", "typescript"]),
            hover("js"),
            "acme.js",
            vec![],
        );

        assert_eq!(registry.providers_for_language(Capability::Hover, "javascript").len(), 1);
        assert_eq!(registry.providers_for_language(Capability::Hover, "typescript").len(), 1);

        registry.unregister(id);
        assert!(registry.providers_for_language(Capability::Hover, "javascript").is_empty());
        assert!(registry.providers_for_language(Capability::Hover, "typescript").is_empty());
        assert!(!registry.unregister(id));
    }

    #[test]
    fn test_fifo_order_with_wildcard() {
        let registry = ProviderRegistry::new();
        let first = registry.register(DocumentSelector::any(), hover("any"), "a.first", vec![]);
        let second = registry.register("rust".into(), hover("rust"), "b.second", vec![]);
        let third = registry.register(DocumentSelector::any(), hover("any2"), "c.third", vec![]);

        let ids: Vec<_> = registry
            .providers_for_language(Capability::Hover, "rust")
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[test]
    fn test_unknown_capability_or_language_is_empty() {
        let registry = ProviderRegistry::new();
        registry.register("rust".into(), hover("rust"), "a.b", vec![]);
        assert!(registry.get_providers_for_language("codeLens", "rust").is_empty());
        assert!(registry.get_providers_for_language("hover", "cobol").is_empty());
        assert!(registry.get_providers_for_language("completion", "rust").is_empty());
    }

    #[test]
    fn test_glob_only_matches_documents() {
        let registry = ProviderRegistry::new();
        registry.register("*.toml".into(), hover("toml"), "a.toml", vec![]);

        assert!(registry.providers_for_language(Capability::Hover, "toml").is_empty());
        assert_eq!(
            registry
                .providers_for_document(Capability::Hover, "file:///Cargo.toml", "toml")
                .len(),
            1
        );
    }

    #[test]
    fn test_unregister_extension() {
        let registry = ProviderRegistry::new();
        registry.register("rust".into(), hover("1"), "a.owner", vec![]);
        registry.register("go".into(), hover("2"), "a.owner", vec![]);
        registry.register("go".into(), hover("3"), "b.other", vec![]);

        assert_eq!(registry.unregister_extension("a.owner"), 2);
        assert_eq!(registry.len(), 1);
    }
}
