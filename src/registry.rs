//! Registry of live sessions with lifecycle hooks.
//!
//! Long-running work (a grid search, an open provider connection) registers
//! itself under an id so that something else can find it and shut it down.
//! Hooks run on registration and on close, always outside the lock, so a
//! hook may call back into the registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

type Hook<S> = Box<dyn Fn(&str, &S) + Send + Sync>;

/// Thread-safe map of session id to session.
///
/// ```rust
/// use cleave::{CancelToken, SessionRegistry};
///
/// let registry = SessionRegistry::new().with_on_close(|_, token: &CancelToken| token.cancel());
/// let token = CancelToken::new();
/// registry.insert("grid-1", token.clone());
///
/// assert_eq!(registry.close_all(), 1);
/// assert!(token.is_cancelled());
/// assert!(registry.is_empty());
/// ```
pub struct SessionRegistry<S> {
    sessions: Mutex<HashMap<String, Arc<S>>>,
    on_create: Option<Hook<S>>,
    on_close: Option<Hook<S>>,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            on_create: None,
            on_close: None,
        }
    }
}

impl<S> SessionRegistry<S> {
    /// An empty registry without hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` after every insert.
    #[must_use]
    pub fn with_on_create(mut self, hook: impl Fn(&str, &S) + Send + Sync + 'static) -> Self {
        self.on_create = Some(Box::new(hook));
        self
    }

    /// Run `hook` for every session removed, replaced, or closed.
    #[must_use]
    pub fn with_on_close(mut self, hook: impl Fn(&str, &S) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Register a session. A session already registered under `id` is
    /// replaced and closed.
    pub fn insert(&self, id: impl Into<String>, session: S) -> Arc<S> {
        let id = id.into();
        let session = Arc::new(session);
        let replaced = self.sessions.lock().insert(id.clone(), Arc::clone(&session));

        if let (Some(old), Some(hook)) = (replaced, &self.on_close) {
            hook(&id, &old);
        }
        if let Some(hook) = &self.on_create {
            hook(&id, &session);
        }
        session
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<S>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Remove and close a session.
    pub fn remove(&self, id: &str) -> Option<Arc<S>> {
        let removed = self.sessions.lock().remove(id)?;
        if let Some(hook) = &self.on_close {
            hook(id, &removed);
        }
        Some(removed)
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Remove and close every session; returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(String, Arc<S>)> = self.sessions.lock().drain().collect();
        if let Some(hook) = &self.on_close {
            for (id, session) in &drained {
                hook(id, session);
            }
        }
        drained.len()
    }
}

impl<S> std::fmt::Debug for SessionRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("ids", &self.ids())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_hooks_fire() {
        let created = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let (c, d) = (Arc::clone(&created), Arc::clone(&closed));
        let registry = SessionRegistry::new()
            .with_on_create(move |_, _: &u32| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .with_on_close(move |_, _: &u32| {
                d.fetch_add(1, Ordering::SeqCst);
            });

        registry.insert("a", 1);
        registry.insert("b", 2);
        registry.insert("a", 3); // replaces and closes the first "a"
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(*registry.get("a").unwrap(), 3);

        assert_eq!(registry.remove("b").map(|s| *s), Some(2));
        assert!(registry.remove("b").is_none());
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert_eq!(registry.ids(), ["a"]);
    }

    #[test]
    fn test_hook_may_reenter() {
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let seen_in_hook = Arc::clone(&seen);
        let registry = Arc::new_cyclic(|weak: &std::sync::Weak<SessionRegistry<u32>>| {
            let weak = weak.clone();
            SessionRegistry::new().with_on_close(move |_, _: &u32| {
                // Deadlocks if the hook runs while the map is locked
                if let Some(registry) = weak.upgrade() {
                    seen_in_hook.store(registry.len(), Ordering::SeqCst);
                }
            })
        });

        registry.insert("x", 1);
        assert_eq!(registry.close_all(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
