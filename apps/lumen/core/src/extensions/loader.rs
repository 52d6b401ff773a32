//! Extension ABI and module loader
//!
//! An extension's entry module is a Rust type implementing [`Extension`].
//! The [`ModuleLoader`] maps extension ids to factories that build those
//! types; activation receives the shared [`ExtensionApi`] as an argument.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use super::context::ExtensionContext;
use crate::api::ExtensionApi;
use crate::error::{LumenError, Result};

/// The entry point of an extension
#[async_trait]
pub trait Extension: Send + Sync {
    /// Called once when an activation event fires. The returned value is the
    /// extension's public exports.
    async fn activate(&mut self, ctx: ExtensionContext, api: ExtensionApi) -> anyhow::Result<Value>;

    /// Called on deactivation, before the context's subscriptions are disposed
    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Table of entry-module factories keyed by extension id
#[derive(Clone, Default)]
pub struct ModuleLoader {
    factories: Arc<RwLock<HashMap<String, ExtensionFactory>>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, extension_id: &str, factory: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        debug!("Registered entry module for {}", extension_id);
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(extension_id.to_string(), Arc::new(factory));
    }

    /// Register a type whose `Default` value is the entry module
    pub fn register_default<E>(&self, extension_id: &str)
    where
        E: Extension + Default + 'static,
    {
        self.register(extension_id, || Box::new(E::default()));
    }

    pub fn contains(&self, extension_id: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(extension_id)
    }

    /// Build the entry module declared as `main` by an extension
    pub fn instantiate(&self, extension_id: &str, main: &str) -> Result<Box<dyn Extension>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(extension_id)
            .cloned()
            .ok_or_else(|| {
                LumenError::activation(
                    extension_id,
                    format!("no entry module registered for main '{}'", main),
                )
            })?;

        catch_unwind(AssertUnwindSafe(|| factory()))
            .map_err(|_| LumenError::activation(extension_id, "entry module constructor panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Noop;

    #[async_trait]
    impl Extension for Noop {
        async fn activate(&mut self, _ctx: ExtensionContext, _api: ExtensionApi) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_missing_factory_is_activation_error() {
        let loader = ModuleLoader::new();
        let err = loader.instantiate("acme.none", "./out/extension.js").err().unwrap();
        assert!(matches!(err, LumenError::Activation { .. }));
    }

    #[test]
    fn test_registered_factory_instantiates() {
        let loader = ModuleLoader::new();
        loader.register_default::<Noop>("acme.noop");
        assert!(loader.contains("acme.noop"));
        assert!(loader.instantiate("acme.noop", "main").is_ok());
    }

    #[test]
    fn test_panicking_factory_is_activation_error() {
        let loader = ModuleLoader::new();
        loader.register("acme.bad", || panic!("constructor bug"));
        assert!(loader.instantiate("acme.bad", "main").is_err());
    }
}
