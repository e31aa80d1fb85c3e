//! Key store collaborator contract
//!
//! The default key is looked up in two stores with the same shape: a fast
//! cache and a durable store. Neither is chosen by the engine; callers inject
//! implementations (see the `envseal-store` crate).

use crate::error::EnvsealResult;

/// A named byte-value store.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `name`, if any.
    fn get(&self, name: &str) -> EnvsealResult<Option<Vec<u8>>>;

    /// Store `value` under `name`, replacing any previous value.
    fn set(&self, name: &str, value: &[u8]) -> EnvsealResult<()>;

    /// Store `value` under `name` only if nothing is stored there yet.
    ///
    /// Returns the value that ends up stored: `value` if this call created
    /// the entry, otherwise the existing one. The provided implementation is
    /// get-then-set and is not atomic; stores shared between processes must
    /// override it.
    fn set_if_absent(&self, name: &str, value: &[u8]) -> EnvsealResult<Vec<u8>> {
        if let Some(existing) = self.get(name)? {
            return Ok(existing);
        }
        self.set(name, value)?;
        Ok(value.to_vec())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, name: &str) -> EnvsealResult<Option<Vec<u8>>> {
        (**self).get(name)
    }

    fn set(&self, name: &str, value: &[u8]) -> EnvsealResult<()> {
        (**self).set(name, value)
    }

    fn set_if_absent(&self, name: &str, value: &[u8]) -> EnvsealResult<Vec<u8>> {
        (**self).set_if_absent(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<String, Vec<u8>>>);

    impl KeyValueStore for MapStore {
        fn get(&self, name: &str) -> EnvsealResult<Option<Vec<u8>>> {
            Ok(self.0.lock().unwrap().get(name).cloned())
        }

        fn set(&self, name: &str, value: &[u8]) -> EnvsealResult<()> {
            self.0.lock().unwrap().insert(name.to_string(), value.to_vec());
            Ok(())
        }
    }

    #[test]
    fn provided_set_if_absent_keeps_first_value() {
        let store = MapStore::default();
        assert_eq!(store.set_if_absent("k", b"first").unwrap(), b"first");
        assert_eq!(store.set_if_absent("k", b"second").unwrap(), b"first");
        assert_eq!(store.get("k").unwrap().unwrap(), b"first");
    }

    #[test]
    fn arc_forwards() {
        let store = std::sync::Arc::new(MapStore::default());
        store.set("a", b"1").unwrap();
        let shared: std::sync::Arc<dyn KeyValueStore> = store.clone();
        assert_eq!(shared.get("a").unwrap().unwrap(), b"1");
    }
}
