// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory artifact store.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::{open, seal, validate_key, ArtifactHash, ArtifactStore, StoreError};

/// In-memory artifact store.
///
/// Holds sealed envelopes in a `BTreeMap` so [`keys`](ArtifactStore::keys)
/// is sorted without extra work. Publishing swaps the whole entry under a
/// write lock; readers never observe a partially replaced artifact.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Arc<[u8]>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw sealed bytes for `key`, including envelope framing.
    pub fn sealed(&self, key: &str) -> Option<Arc<[u8]>> {
        self.entries.read().ok()?.get(key).cloned()
    }
}

impl ArtifactStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        let sealed = {
            let entries = self
                .entries
                .read()
                .map_err(|_| StoreError::Poisoned("memory store"))?;
            match entries.get(key) {
                Some(bytes) => Arc::clone(bytes),
                None => return Ok(None),
            }
        };
        open(key, &sealed).map(|payload| Some(payload.to_vec()))
    }

    fn publish(&self, key: &str, payload: &[u8]) -> Result<ArtifactHash, StoreError> {
        validate_key(key)?;
        let (sealed, sum) = seal(key, payload)?;
        self.entries
            .write()
            .map_err(|_| StoreError::Poisoned("memory store"))?
            .insert(key.to_owned(), Arc::from(sealed));
        Ok(sum)
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self
            .entries
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?
            .contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self
            .entries
            .write()
            .map_err(|_| StoreError::Poisoned("memory store"))?
            .remove(key)
            .is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?
            .keys()
            .cloned()
            .collect())
    }
}
