//! Merkle patricia trie
//!
//! A content-addressed trie over nibble paths where:
//! - Each node's digest is derived from its children's digests
//! - Identical subtrees share one stored copy, reference counted
//! - The root digest uniquely identifies the whole key-value set

mod node;
mod proof;
mod traversal;
mod tree;

pub use node::{BranchNode, ExtensionNode, LeafNode, Node, BRANCH_CHILD_COUNT, BRANCH_VALUE_INDEX};
pub use proof::verify_proof;
pub use traversal::{SeekDirection, TrieIter};
pub use tree::MerkleTrie;
