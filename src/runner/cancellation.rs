//! Process-local cancellation of in-flight runs.
//!
//! The orchestrator registers a token for the run it executes and holds the
//! returned [`CancellationGuard`] for the duration of the call. Dropping the
//! guard removes the token, whatever way the run ended.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared cancellation flag for one run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

/// Map from run id to the token of the orchestrator executing it.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a fresh token for `run_id`.
    ///
    /// A token already registered under the same id is replaced.
    pub fn register(&self, run_id: impl Into<String>) -> CancellationGuard {
        let run_id = run_id.into();
        let token = CancellationToken::new();
        self.tokens().insert(run_id.clone(), token.clone());
        CancellationGuard {
            run_id,
            token,
            registry: self.clone(),
        }
    }

    /// Fires the token for `run_id`. Returns false if none is registered.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.tokens().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, run_id: &str) -> bool {
        self.tokens().contains_key(run_id)
    }

    /// Number of runs currently in flight.
    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, run_id: &str, token: &CancellationToken) {
        let mut tokens = self.tokens();
        if tokens.get(run_id).is_some_and(|t| t.same_as(token)) {
            tokens.remove(run_id);
        }
    }
}

/// Registration handle; deregisters its token on drop.
#[derive(Debug)]
pub struct CancellationGuard {
    run_id: String,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl CancellationGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        self.registry.release(&self.run_id, &self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_registered_run() {
        let registry = CancellationRegistry::new();
        let guard = registry.register("run-1");
        assert!(!guard.token().is_cancelled());

        assert!(registry.cancel("run-1"));
        assert!(guard.token().is_cancelled());
        assert!(registry.cancel("run-1"));
    }

    #[test]
    fn test_cancel_unknown_run() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel("nope"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_drop_deregisters() {
        let registry = CancellationRegistry::new();
        {
            let _guard = registry.register("run-1");
            assert!(registry.is_registered("run-1"));
        }
        assert!(!registry.is_registered("run-1"));
        assert!(!registry.cancel("run-1"));
    }

    #[test]
    fn test_stale_guard_keeps_replacement() {
        let registry = CancellationRegistry::new();
        let first = registry.register("run-1");
        let second = registry.register("run-1");
        drop(first);

        assert!(registry.is_registered("run-1"));
        registry.cancel("run-1");
        assert!(second.token().is_cancelled());
    }
}
