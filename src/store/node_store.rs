//! Write-back node cache with reference-counted garbage collection
//!
//! Nodes are addressed by digest. Every mutation is recorded in the cache as a
//! [`Trackable`] and nothing reaches the backing store until
//! [`NodeStore::commit`]. Each stored node carries a reference count so that
//! identical subtrees produced by unrelated edits share one stored copy and
//! are only removed once nothing points at them.

use super::KeyValueStore;
use crate::model::Digest;
use crate::trie::Node;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The persisted envelope of a node: its full serialization plus the number
/// of parent edges pointing at it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub refs: u32,
    pub raw: Vec<u8>,
}

/// Mutation state of a cached entry relative to the backing store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    /// Same as the backing store
    Unchanged,
    /// Must be written on commit
    Put,
    /// Must be removed on commit
    Deleted,
}

/// A cached entry; `record` is `None` for deleted entries
#[derive(Clone, Debug)]
pub struct Trackable {
    pub state: TrackState,
    pub record: Option<NodeRecord>,
}

/// Counts of the writes applied by a commit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub written: usize,
    pub deleted: usize,
}

/// Cached entries plus, while a mutation is open, the entries they replaced
#[derive(Default)]
struct Cache {
    entries: HashMap<Digest, Trackable>,
    /// First prior value of every digest touched since [`NodeStore::begin`];
    /// `None` means the digest was not cached
    undo: Option<HashMap<Digest, Option<Trackable>>>,
}

impl Cache {
    fn insert(&mut self, digest: Digest, entry: Trackable) {
        let previous = self.entries.insert(digest, entry);
        if let Some(undo) = &mut self.undo {
            undo.entry(digest).or_insert(previous);
        }
    }
}

/// Node-level view of a backing store
pub struct NodeStore<S: KeyValueStore> {
    store: S,
    prefix: Vec<u8>,
    cache: Mutex<Cache>,
}

impl<S: KeyValueStore> NodeStore<S> {
    /// Store nodes directly under their digests
    pub fn new(store: S) -> Self {
        Self::with_prefix(store, Vec::new())
    }

    /// Store nodes under `prefix ‖ digest`, so the trie can share a backing
    /// store with unrelated data
    pub fn with_prefix(store: S, prefix: impl Into<Vec<u8>>) -> Self {
        NodeStore {
            store,
            prefix: prefix.into(),
            cache: Mutex::new(Cache::default()),
        }
    }

    fn store_key(&self, digest: &Digest) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + digest.as_bytes().len());
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(digest.as_bytes());
        key
    }

    /// Current record for `digest`, from the cache or else the backing store.
    /// Records read from the store are cached as unchanged.
    fn load_record(&self, digest: &Digest) -> Result<Option<NodeRecord>> {
        if let Some(entry) = self.cache.lock().entries.get(digest) {
            return Ok(entry.record.clone());
        }

        tracing::trace!(digest = %digest.short(), "reading node from store");
        let record = match self.store.get(&self.store_key(digest))? {
            Some(bytes) => bincode::deserialize::<NodeRecord>(&bytes)?,
            None => return Ok(None),
        };

        self.cache.lock().insert(
            *digest,
            Trackable {
                state: TrackState::Unchanged,
                record: Some(record.clone()),
            },
        );
        Ok(Some(record))
    }

    fn track(&self, digest: Digest, state: TrackState, record: Option<NodeRecord>) {
        self.cache.lock().insert(digest, Trackable { state, record });
    }

    /// Load and decode the node stored under `digest`
    ///
    /// Returns `None` for the zero digest and for digests the store does not
    /// hold.
    pub fn get(&self, digest: &Digest) -> Result<Option<Node>> {
        if digest.is_zero() {
            return Ok(None);
        }
        match self.load_record(digest)? {
            Some(record) => Ok(Some(Node::deserialize(&record.raw)?)),
            None => Ok(None),
        }
    }

    /// Reference count currently recorded for `digest` (0 when absent)
    pub fn ref_count(&self, digest: &Digest) -> Result<u32> {
        Ok(self.load_record(digest)?.map_or(0, |record| record.refs))
    }

    /// Record `node` for writing with a single reference, replacing any
    /// pending entry for its digest
    pub fn put(&self, node: &Node) -> Result<()> {
        if node.is_reference() {
            return Err(Error::InvalidNode(
                "hash references carry no content and cannot be stored".into(),
            ));
        }
        let record = NodeRecord {
            refs: 1,
            raw: node.serialize_full(),
        };
        self.track(node.hash(), TrackState::Put, Some(record));
        Ok(())
    }

    /// Record `digest` for removal, replacing any pending entry
    pub fn delete(&self, digest: &Digest) {
        self.track(*digest, TrackState::Deleted, None);
    }

    /// Add one reference to `node`, storing it if it is not stored yet
    pub fn put_node_with_refcount(&self, node: &Node) -> Result<()> {
        if node.is_reference() {
            return Err(Error::InvalidNode(
                "hash references carry no content and cannot be stored".into(),
            ));
        }
        let digest = node.hash();
        let record = match self.load_record(&digest)? {
            Some(mut record) => {
                record.refs += 1;
                record
            }
            None => NodeRecord {
                refs: 1,
                raw: node.serialize_full(),
            },
        };
        self.track(digest, TrackState::Put, Some(record));
        Ok(())
    }

    /// Drop one reference to `digest`, deleting the node when none remain
    pub fn release_node(&self, digest: &Digest) -> Result<()> {
        if digest.is_zero() {
            return Ok(());
        }
        match self.load_record(digest)? {
            Some(mut record) if record.refs > 1 => {
                record.refs -= 1;
                self.track(*digest, TrackState::Put, Some(record));
            }
            Some(_) => self.delete(digest),
            None => {
                tracing::warn!(digest = %digest, "release of a node that is not stored");
            }
        }
        Ok(())
    }

    /// Apply every pending write and deletion to the backing store
    ///
    /// Committed entries stay cached as unchanged, so the next session reads
    /// them from memory; deleted entries are dropped from the cache.
    pub fn commit(&self) -> Result<CommitSummary> {
        let mut cache = self.cache.lock();
        let mut summary = CommitSummary::default();

        for (digest, entry) in cache.entries.iter_mut() {
            match entry.state {
                TrackState::Put => {
                    if let Some(record) = &entry.record {
                        let bytes = bincode::serialize(record)?;
                        self.store.put(&self.store_key(digest), &bytes)?;
                        summary.written += 1;
                    }
                    entry.state = TrackState::Unchanged;
                }
                TrackState::Deleted => {
                    self.store.delete(&self.store_key(digest))?;
                    summary.deleted += 1;
                    entry.state = TrackState::Unchanged;
                }
                TrackState::Unchanged => {}
            }
        }
        cache.entries.retain(|_, entry| entry.record.is_some());

        tracing::debug!(
            written = summary.written,
            deleted = summary.deleted,
            "committed node cache"
        );
        Ok(summary)
    }

    /// Start journaling cache changes so that [`NodeStore::rollback`] can
    /// undo them
    pub(crate) fn begin(&self) {
        self.cache.lock().undo = Some(HashMap::new());
    }

    /// Keep every change made since [`NodeStore::begin`]
    pub(crate) fn finish(&self) {
        self.cache.lock().undo = None;
    }

    /// Restore the cache to its state at [`NodeStore::begin`]
    pub(crate) fn rollback(&self) {
        let mut cache = self.cache.lock();
        let Some(undo) = cache.undo.take() else {
            return;
        };
        tracing::debug!(entries = undo.len(), "rolling back node cache");
        for (digest, previous) in undo {
            match previous {
                Some(entry) => {
                    cache.entries.insert(digest, entry);
                }
                None => {
                    cache.entries.remove(&digest);
                }
            }
        }
    }

    /// Number of entries waiting for commit
    pub fn pending(&self) -> usize {
        self.cache
            .lock()
            .entries
            .values()
            .filter(|entry| entry.state != TrackState::Unchanged)
            .count()
    }
}
