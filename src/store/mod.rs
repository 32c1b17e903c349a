//! Storage layer
//!
//! The trie reads and writes nodes through a plain key-value contract,
//! [`KeyValueStore`]. Two backends ship with the crate: [`MemoryStore`] for
//! tests and ephemeral tries, and [`FileStore`], a single-file store with
//! zstd-compressed values. [`NodeStore`] sits between the trie and the backend
//! as a write-back cache with reference-counted garbage collection.

mod file_store;
mod memory;
mod node_store;

pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use node_store::{CommitSummary, NodeRecord, NodeStore, TrackState, Trackable};

use crate::Result;
use std::sync::Arc;

/// The backing store contract
///
/// Methods take `&self`; implementations synchronize internally so several
/// tries can share one store.
pub trait KeyValueStore {
    /// Read the value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    fn delete(&self, key: &[u8]) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &S {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        (**self).delete(key)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        (**self).delete(key)
    }
}
