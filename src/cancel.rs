//! Per-ingest cancellation tokens.
//!
//! Each ingest registers a [`CancelToken`] under a fresh [`IngestHandle`].
//! Cancelling sets a flag that the orchestrator checks only at stage
//! boundaries; a collaborator call already in flight runs to completion.
//! Cancellation is best-effort and process-local.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a running ingest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngestHandle(String);

impl IngestHandle {
    pub fn new() -> Self {
        IngestHandle(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IngestHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for IngestHandle {
    fn from(s: &str) -> Self {
        IngestHandle(s.to_string())
    }
}

impl fmt::Display for IngestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Registry of active ingests, keyed by handle.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    active: Mutex<HashMap<IngestHandle, CancelToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new ingest and return its handle and a fresh, unset token.
    pub fn register(&self) -> (IngestHandle, CancelToken) {
        let handle = IngestHandle::new();
        let token = self.register_as(handle.clone());
        (handle, token)
    }

    /// Register under a caller-chosen handle, replacing any token already
    /// registered under it.
    pub fn register_as(&self, handle: IngestHandle) -> CancelToken {
        let token = CancelToken::new();
        self.lock().insert(handle, token.clone());
        token
    }

    /// Request cancellation of one ingest. Returns false if it is not active.
    pub fn cancel(&self, handle: &IngestHandle) -> bool {
        match self.lock().get(handle) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every active ingest. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.lock();
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }

    /// Drop a finished ingest from the registry.
    pub fn complete(&self, handle: &IngestHandle) {
        self.lock().remove(handle);
    }

    pub fn active(&self) -> Vec<IngestHandle> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IngestHandle, CancelToken>> {
        // A poisoned map still holds valid tokens.
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_targets_one_ingest() {
        let registry = CancelRegistry::new();
        let (h1, t1) = registry.register();
        let (_h2, t2) = registry.register();

        assert!(registry.cancel(&h1));
        assert!(t1.is_cancelled());
        assert!(!t2.is_cancelled());
    }

    #[test]
    fn cancel_all_signals_every_active_ingest() {
        let registry = CancelRegistry::new();
        let (_, t1) = registry.register();
        let (_, t2) = registry.register();
        assert_eq!(registry.cancel_all(), 2);
        assert!(t1.is_cancelled() && t2.is_cancelled());
    }

    #[test]
    fn completed_ingest_is_not_cancellable() {
        let registry = CancelRegistry::new();
        let (h, t) = registry.register();
        registry.complete(&h);
        assert!(!registry.cancel(&h));
        assert!(!t.is_cancelled());
        assert!(registry.active().is_empty());
    }

    #[test]
    fn new_registration_starts_uncancelled() {
        let registry = CancelRegistry::new();
        let (_, t1) = registry.register();
        registry.cancel_all();
        let (_, t2) = registry.register();
        assert!(t1.is_cancelled());
        assert!(!t2.is_cancelled());
    }
}
