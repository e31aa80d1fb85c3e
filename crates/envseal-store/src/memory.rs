//! In-memory store

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use envseal_core::{EnvsealResult, KeyValueStore};

/// A `HashMap` behind a mutex. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn remove(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().remove(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, name: &str) -> EnvsealResult<Option<Vec<u8>>> {
        Ok(self.lock().get(name).cloned())
    }

    fn set(&self, name: &str, value: &[u8]) -> EnvsealResult<()> {
        self.lock().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn set_if_absent(&self, name: &str, value: &[u8]) -> EnvsealResult<Vec<u8>> {
        Ok(self
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| value.to_vec())
            .clone())
    }
}
