pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use error::{EnvsealError, EnvsealResult};
pub use store::KeyValueStore;
pub use types::SchemaVersion;
