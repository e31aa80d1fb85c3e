//! Lazily created default key
//!
//! Lookup order: in-process slot → cache store → durable store → mint. A
//! minted key is persisted with `set_if_absent`, so concurrent first users
//! (threads or processes sharing the durable store) converge on whichever
//! key reached the store first.

use std::sync::{Arc, Mutex, PoisonError};

use envseal_core::config::DefaultKeyConfig;
use envseal_core::{EnvsealError, EnvsealResult, KeyValueStore};

use crate::keys::{Key, DEFAULT_KEY_LEN};

pub struct DefaultKeyProvider {
    cache: Arc<dyn KeyValueStore>,
    store: Arc<dyn KeyValueStore>,
    cache_name: String,
    store_name: String,
    slot: Mutex<Option<Key>>,
}

impl DefaultKeyProvider {
    /// Provider using the default entry names.
    pub fn new(cache: Arc<dyn KeyValueStore>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::from_config(&DefaultKeyConfig::default(), cache, store)
    }

    pub fn from_config(
        config: &DefaultKeyConfig,
        cache: Arc<dyn KeyValueStore>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            cache,
            store,
            cache_name: config.cache_name.clone(),
            store_name: config.store_name.clone(),
            slot: Mutex::new(None),
        }
    }

    /// The default key, resolving and caching it on first use.
    ///
    /// Resolution holds the slot lock, so within one process the stores are
    /// consulted at most once even under concurrent first access.
    pub fn get(&self) -> EnvsealResult<Key> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = slot.as_ref() {
            return Ok(key.clone());
        }
        let key = self.resolve()?;
        *slot = Some(key.clone());
        Ok(key)
    }

    /// The in-process key, if already resolved. Never touches the stores.
    pub fn peek(&self) -> Option<Key> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn resolve(&self) -> EnvsealResult<Key> {
        if let Some(bytes) = self.cache.get(&self.cache_name)?.filter(|b| !b.is_empty()) {
            tracing::debug!("default key served from cache");
            return Ok(Key::from_bytes(bytes));
        }

        let bytes = match self.store.get(&self.store_name)? {
            Some(bytes) if bytes.is_empty() => return Err(self.empty_entry()),
            Some(bytes) => {
                tracing::debug!("default key loaded from durable store");
                bytes
            }
            None => {
                let candidate = Key::generate(DEFAULT_KEY_LEN.0, DEFAULT_KEY_LEN.1);
                let stored = self
                    .store
                    .set_if_absent(&self.store_name, candidate.as_bytes())?;
                if stored.is_empty() {
                    return Err(self.empty_entry());
                }
                if stored.as_slice() == candidate.as_bytes() {
                    tracing::info!(name = %self.store_name, "minted new default key");
                } else {
                    tracing::info!(name = %self.store_name, "adopted default key minted concurrently");
                }
                stored
            }
        };

        self.cache.set(&self.cache_name, &bytes)?;
        Ok(Key::from_bytes(bytes))
    }

    /// An empty durable entry would normalise to an all-zero cipher key.
    fn empty_entry(&self) -> EnvsealError {
        EnvsealError::Store(format!(
            "durable default key entry {} is empty",
            self.store_name
        ))
    }
}

impl std::fmt::Debug for DefaultKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultKeyProvider")
            .field("cache_name", &self.cache_name)
            .field("store_name", &self.store_name)
            .field("resolved", &self.peek().is_some())
            .finish()
    }
}
