//! envseal-store: [`KeyValueStore`] implementations for the default key
//!
//! - [`MemoryStore`]: process-local map, used as the cache
//! - [`FileStore`]: one file per entry under a root directory, used as the
//!   durable store

pub mod fs;
pub mod memory;

pub use envseal_core::KeyValueStore;
pub use fs::FileStore;
pub use memory::MemoryStore;
