//! # mpt_db
//!
//! An authenticated key-value index built on a merkle patricia trie.
//!
//! Keys and values are byte strings. The trie exposes a single 256-bit root
//! digest that commits to the entire key-value set: two tries holding the
//! same pairs produce the same digest regardless of insertion order.
//!
//! ## Core Concepts
//!
//! - **Nodes**: leaves, extensions and branches, each addressed by the digest
//!   of its serialization
//! - **Node store**: a write-back cache over any [`KeyValueStore`], with
//!   reference-counted sharing of identical subtrees
//! - **Roots**: committing a trie yields a root digest; reopening from that
//!   digest loads nodes lazily as lookups reach them
//!
//! ## Example
//!
//! ```
//! use mpt_db::{MemoryStore, MerkleTrie, SeekDirection};
//!
//! let mut trie = MerkleTrie::new(MemoryStore::new());
//! trie.put(b"a", b"1")?;
//! trie.put(b"ab", b"2")?;
//! trie.put(b"ac", b"3")?;
//! trie.commit()?;
//!
//! let after: Vec<_> = trie
//!     .seek(b"ab", SeekDirection::Forward)
//!     .collect::<mpt_db::Result<_>>()?;
//! assert_eq!(after.len(), 2);
//! # Ok::<(), mpt_db::Error>(())
//! ```

pub mod model;
pub mod store;
pub mod trie;

mod error;

pub use error::{Error, Result};
pub use model::Digest;
pub use store::{CommitSummary, FileStore, KeyValueStore, MemoryStore, NodeStore};
pub use trie::{verify_proof, MerkleTrie, Node, SeekDirection, TrieIter};

/// File format version for compatibility
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"MPTRIEDB";
