//! Registry of scanners keyed by coin type

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::error::MuxError;
use crate::scanner::Scanner;

/// Coin type to scanner map behind a single reader/writer lock
///
/// Every read and every mutation goes through the same lock. The count is
/// the map's length, so it cannot drift from the set of keys.
#[derive(Default)]
pub struct Registry {
    scanners: RwLock<HashMap<String, Arc<dyn Scanner>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // Each mutation is a single insert, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Scanner>>> {
        self.scanners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Scanner>>> {
        self.scanners.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a scanner unless its coin type is taken
    pub fn insert(&self, coin_type: &str, scanner: Arc<dyn Scanner>) -> Result<(), MuxError> {
        debug!(%coin_type, "Registry::insert: called");
        match self.write().entry(coin_type.to_string()) {
            Entry::Occupied(_) => {
                debug!(%coin_type, "Registry::insert: coin type taken");
                Err(MuxError::DuplicateCoinType {
                    coin_type: coin_type.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(scanner);
                Ok(())
            }
        }
    }

    /// Look up the scanner for a coin type
    pub fn get(&self, coin_type: &str) -> Option<Arc<dyn Scanner>> {
        self.read().get(coin_type).cloned()
    }

    /// Number of registered scanners
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no scanner is registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Registered coin types, sorted
    pub fn coin_types(&self) -> Vec<String> {
        let mut coin_types: Vec<String> = self.read().keys().cloned().collect();
        coin_types.sort();
        coin_types
    }

    /// Copy of every entry, taken under one lock acquisition
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn Scanner>)> {
        let mut entries: Vec<(String, Arc<dyn Scanner>)> = self
            .read()
            .iter()
            .map(|(coin_type, scanner)| (coin_type.clone(), scanner.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(count = entries.len(), "Registry::snapshot: taken");
        entries
    }
}
