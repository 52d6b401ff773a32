//! Command registry
//!
//! Commands are async callbacks keyed by name. Executing an unregistered
//! command is a logged no-op that yields `null`.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use super::disposable::Disposable;
use crate::error::{LumenError, Result};

type CommandHandler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

struct CommandEntry {
    token: u64,
    extension_id: String,
    handler: CommandHandler,
}

#[derive(Default)]
pub struct CommandRegistry {
    next_token: AtomicU64,
    commands: Arc<RwLock<HashMap<String, CommandEntry>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. Fails if the name is already taken.
    pub fn register<F, Fut>(&self, name: &str, extension_id: &str, callback: F) -> Result<Disposable>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let handler: CommandHandler = Arc::new(move |args| callback(args).boxed());

        {
            let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = commands.get(name) {
                return Err(LumenError::General(format!(
                    "Command '{}' already registered by {}",
                    name, existing.extension_id
                )));
            }
            commands.insert(
                name.to_string(),
                CommandEntry {
                    token,
                    extension_id: extension_id.to_string(),
                    handler,
                },
            );
        }
        debug!("Registered command {} for {}", name, extension_id);

        let commands = Arc::downgrade(&self.commands);
        let name = name.to_string();
        Ok(Disposable::new(move || {
            if let Some(commands) = commands.upgrade() {
                let mut commands = commands.write().unwrap_or_else(PoisonError::into_inner);
                if commands.get(&name).is_some_and(|e| e.token == token) {
                    commands.remove(&name);
                }
            }
        }))
    }

    /// Run a command and await it. The callback's own failure is the command's failure.
    pub async fn execute(&self, name: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        let handler = {
            let commands = self.commands.read().unwrap_or_else(PoisonError::into_inner);
            commands.get(name).map(|e| e.handler.clone())
        };

        let Some(handler) = handler else {
            debug!("Command {} is not registered, ignoring", name);
            return Ok(Value::Null);
        };

        match AssertUnwindSafe(handler(args)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("Command '{}' panicked", name)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered command names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_execute_dispose() {
        let registry = CommandRegistry::new();
        let d = registry
            .register("demo.echo", "acme.demo", |args| async move {
                Ok(args.into_iter().next().unwrap_or(Value::Null))
            })
            .unwrap();

        let result = registry.execute("demo.echo", vec![json!(42)]).await.unwrap();
        assert_eq!(result, json!(42));

        d.dispose();
        assert!(!registry.contains("demo.echo"));
        let result = registry.execute("demo.echo", vec![json!(1)]).await.unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_callback_error_propagates() {
        let registry = CommandRegistry::new();
        let _d = registry
            .register("demo.fail", "acme.demo", |_| async {
                Err::<Value, _>(anyhow::anyhow!("nope"))
            })
            .unwrap();

        let err = registry.execute("demo.fail", vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = CommandRegistry::new();
        let _d = registry
            .register("demo.x", "a.one", |_| async { Ok(Value::Null) })
            .unwrap();
        assert!(registry
            .register("demo.x", "b.two", |_| async { Ok(Value::Null) })
            .is_err());
    }

    #[tokio::test]
    async fn test_stale_disposable_keeps_new_registration() {
        let registry = CommandRegistry::new();
        let old = registry
            .register("demo.x", "a.one", |_| async { Ok(json!(1)) })
            .unwrap();
        old.dispose();
        let _new = registry
            .register("demo.x", "a.one", |_| async { Ok(json!(2)) })
            .unwrap();
        old.dispose();

        assert_eq!(registry.execute("demo.x", vec![]).await.unwrap(), json!(2));
    }

    async fn explode(_args: Vec<Value>) -> anyhow::Result<Value> {
        panic!("bad command")
    }

    #[tokio::test]
    async fn test_panicking_command_is_an_error() {
        let registry = CommandRegistry::new();
        let _d = registry.register("demo.panic", "a.one", explode).unwrap();
        assert!(registry.execute("demo.panic", vec![]).await.is_err());
    }
}
