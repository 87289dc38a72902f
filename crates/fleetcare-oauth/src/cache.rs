//! Run-scoped token cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Maps tenant key to bearer token for the lifetime of one sync run.
///
/// No expiry tracking: a new run always re-acquires tokens. The cache is
/// cheap to clone and share within a run, but must not outlive it.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token previously acquired for a tenant key, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.tokens.read().get(key).cloned()
    }

    /// Remember a tenant's token for the rest of the run.
    pub fn insert(&self, key: &str, token: &str) {
        self.tokens
            .write()
            .insert(key.to_string(), token.to_string());
    }

    /// Number of tenants with a cached token.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }

    /// Drop all cached tokens.
    pub fn clear(&self) {
        self.tokens.write().clear();
    }
}
