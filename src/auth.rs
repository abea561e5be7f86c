//! Shared-secret token store

use crate::config::RelayConfig;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Flat set of valid tokens
///
/// Loads merge into the existing set, so a reload never revokes a token.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: RwLock<HashSet<String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the configuration's tokens into the store
    pub fn load(&self, config: &RelayConfig) {
        self.extend(config.tokens.iter().cloned());
    }

    pub fn extend(&self, tokens: impl IntoIterator<Item = String>) {
        self.tokens.write().extend(tokens);
    }

    /// Exact membership test
    pub fn is_valid(&self, token: &str) -> bool {
        self.tokens.read().contains(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for TokenStore {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let store = Self::new();
        store.extend(iter.into_iter().map(Into::into));
        store
    }
}
