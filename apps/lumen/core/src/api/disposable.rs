//! Disposables and event emitters
//!
//! Everything an extension registers hands back a [`Disposable`]; disposing
//! undoes the registration. [`Emitter`] is the listener list behind the
//! `on_did_*` workspace events.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{error, warn};

type DisposeFn = Box<dyn FnOnce() + Send>;

/// Handle that undoes a registration. Clones share the same underlying action,
/// which runs at most once.
#[derive(Clone)]
pub struct Disposable {
    action: Arc<Mutex<Option<DisposeFn>>>,
}

impl Disposable {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Arc::new(Mutex::new(Some(Box::new(action)))),
        }
    }

    pub fn dispose(&self) {
        let action = self
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(action) = action {
            if catch_unwind(AssertUnwindSafe(action)).is_err() {
                error!("Dispose action panicked");
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// A list of listeners for one event type
pub struct Emitter<T> {
    name: &'static str,
    next_id: AtomicU64,
    listeners: Arc<RwLock<Vec<(u64, Listener<T>)>>>,
}

impl<T: 'static> Emitter<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe a listener; dispose the result to unsubscribe
    pub fn event<F>(&self, listener: F) -> Disposable
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));

        let listeners = Arc::downgrade(&self.listeners);
        Disposable::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Call every listener. Listener errors and panics are logged and skipped.
    pub fn fire(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{} listener failed: {:#}", self.name, e),
                Err(_) => error!("{} listener panicked", self.name),
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispose_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let d = Disposable::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let copy = d.clone();

        d.dispose();
        copy.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(copy.is_disposed());
    }

    #[test]
    fn test_emitter_unsubscribe() {
        let emitter: Emitter<u32> = Emitter::new("test");
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let sub = emitter.event(move |v| {
            s.fetch_add(*v as usize, Ordering::SeqCst);
            Ok(())
        });

        emitter.fire(&2);
        sub.dispose();
        emitter.fire(&5);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let emitter: Emitter<()> = Emitter::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        let _a = emitter.event(|_| anyhow::bail!("boom"));
        let _b = emitter.event(|_| panic!("listener panic"));
        let s = seen.clone();
        let _c = emitter.event(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        emitter.fire(&());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
