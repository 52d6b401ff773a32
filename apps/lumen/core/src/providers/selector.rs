//! Document selectors
//!
//! A selector decides which documents a provider applies to. It is a language
//! id, `*`, a glob over the document path, a filter object, or a list of any of
//! these (matching their union).

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::utils::paths;

/// Language id that matches every document
pub const WILDCARD: &str = "*";

/// A `{ language, scheme, pattern }` filter; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentSelector {
    /// A language id, `*`, or a glob such as `*.py`
    Language(String),
    Filter(DocumentFilter),
    Many(Vec<DocumentSelector>),
}

/// The language buckets a selector lands in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorKeys {
    /// Concrete language ids, `*` included when the selector is a wildcard
    pub languages: BTreeSet<String>,
    /// Some part of the selector only matches by path or scheme
    pub has_patterns: bool,
}

fn is_glob(s: &str) -> bool {
    s != WILDCARD && s.contains(['*', '?', '['])
}

fn glob_matches(pattern: &str, uri: &str) -> bool {
    let target = paths::uri_to_path(uri)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| uri.to_string());
    match Pattern::new(pattern) {
        Ok(p) => p.matches(&target),
        Err(e) => {
            tracing::debug!("Invalid selector pattern {}: {}", pattern, e);
            false
        }
    }
}

impl DocumentSelector {
    pub fn language(language: &str) -> Self {
        Self::Language(language.to_string())
    }

    pub fn any() -> Self {
        Self::Language(WILDCARD.to_string())
    }

    pub fn many<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Many(items.into_iter().map(|s| Self::Language(s.into())).collect())
    }

    /// Collect the language buckets this selector should be indexed under
    pub fn keys(&self) -> SelectorKeys {
        let mut keys = SelectorKeys::default();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut SelectorKeys) {
        match self {
            DocumentSelector::Language(s) if is_glob(s) => keys.has_patterns = true,
            DocumentSelector::Language(s) => {
                keys.languages.insert(s.clone());
            }
            DocumentSelector::Filter(filter) => match &filter.language {
                Some(language) if filter.scheme.is_none() && filter.pattern.is_none() => {
                    keys.languages.insert(language.clone());
                }
                _ => keys.has_patterns = true,
            },
            DocumentSelector::Many(items) => {
                for item in items {
                    item.collect_keys(keys);
                }
            }
        }
    }

    /// Whether the selector matches a language regardless of document path
    pub fn matches_language(&self, language: &str) -> bool {
        let keys = self.keys();
        keys.languages.contains(WILDCARD) || keys.languages.contains(language)
    }

    /// Whether the selector matches a concrete document
    pub fn matches_document(&self, uri: &str, language: &str) -> bool {
        match self {
            DocumentSelector::Language(s) if s == WILDCARD => true,
            DocumentSelector::Language(s) if is_glob(s) => glob_matches(s, uri),
            DocumentSelector::Language(s) => s == language,
            DocumentSelector::Filter(filter) => {
                let language_ok = filter
                    .language
                    .as_deref()
                    .map_or(true, |l| l == WILDCARD || l == language);
                let scheme_ok = filter
                    .scheme
                    .as_deref()
                    .map_or(true, |s| paths::uri_scheme(uri) == Some(s));
                let pattern_ok = filter
                    .pattern
                    .as_deref()
                    .map_or(true, |p| glob_matches(p, uri));
                language_ok && scheme_ok && pattern_ok
            }
            DocumentSelector::Many(items) => items.iter().any(|i| i.matches_document(uri, language)),
        }
    }
}

impl From<&str> for DocumentSelector {
    fn from(s: &str) -> Self {
        Self::Language(s.to_string())
    }
}

impl From<Vec<&str>> for DocumentSelector {
    fn from(items: Vec<&str>) -> Self {
        Self::many(items)
    }
}

impl From<DocumentFilter> for DocumentSelector {
    fn from(filter: DocumentFilter) -> Self {
        Self::Filter(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_split_languages_and_globs() {
        let selector = DocumentSelector::from(vec!["python", "*.py"]);
        let keys = selector.keys();
        assert_eq!(keys.languages.len(), 1);
        assert!(keys.languages.contains("python"));
        assert!(keys.has_patterns);
    }

    #[test]
    fn test_wildcard_matches_everything() {
        let selector = DocumentSelector::any();
        assert!(selector.matches_language("rust"));
        assert!(selector.matches_document("file:///x.rs", "rust"));
    }

    #[test]
    fn test_glob_matches_path() {
        let selector = DocumentSelector::from("*.py");
        assert!(selector.matches_document("file:///home/me/app.py", "plaintext"));
        assert!(!selector.matches_document("file:///home/me/app.js", "javascript"));
        assert!(!selector.matches_language("python"));
    }

    #[test]
    fn test_filter_with_scheme() {
        let selector = DocumentSelector::Filter(DocumentFilter {
            language: Some("markdown".to_string()),
            scheme: Some("file".to_string()),
            pattern: None,
        });
        assert!(selector.matches_document("file:///README.md", "markdown"));
        assert!(!selector.matches_document("untitled:Untitled-1", "markdown"));
        assert!(selector.keys().has_patterns);
    }

    #[test]
    fn test_deserializes_mixed_array() {
        let selector: DocumentSelector = serde_json::from_value(serde_json::json!([
            "javascript",
            { "language": "typescript" }
        ]))
        .unwrap();
        let keys = selector.keys();
        assert!(keys.languages.contains("javascript"));
        assert!(keys.languages.contains("typescript"));
        assert!(!keys.has_patterns);
    }
}
