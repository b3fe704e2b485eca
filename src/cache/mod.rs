//! Key-value cache stores.
//!
//! Every cached fact in the engine (trading calendars, price-resolution
//! outcomes) goes through the [`KvStore`] abstraction so that tests can
//! inject an in-memory fake. Persistence to a JSON document is one
//! implementation of the interface, not a property of the callers.

mod store;

pub use store::{CacheEntry, JsonFileStore, KvStore, MemoryStore, StoreError};
