//! Merkle patricia trie engine

use super::node::{BranchNode, Node, BRANCH_VALUE_INDEX};
use crate::model::{common_prefix_len, to_nibbles, Digest};
use crate::store::{CommitSummary, KeyValueStore, NodeStore};
use crate::{Error, Result};
use std::mem;

/// An authenticated key-value map
///
/// Keys and values are byte strings. [`MerkleTrie::root_hash`] commits to the
/// whole content: two tries holding the same pairs have the same root no
/// matter how they were built.
///
/// Mutations stay in memory until [`MerkleTrie::commit`]. Dropping a trie
/// without committing leaves the backing store untouched.
pub struct MerkleTrie<S: KeyValueStore> {
    pub(crate) db: NodeStore<S>,
    pub(crate) root: Node,
}

impl<S: KeyValueStore> MerkleTrie<S> {
    /// Create a new empty trie
    pub fn new(store: S) -> Self {
        MerkleTrie {
            db: NodeStore::new(store),
            root: Node::Empty,
        }
    }

    /// Open the trie committed under `root`
    ///
    /// Nothing is read until a lookup or mutation reaches the root.
    pub fn from_root(store: S, root: Digest) -> Self {
        Self::from_node_store(NodeStore::new(store), root)
    }

    /// Open the trie committed under `root`, with nodes stored under
    /// `prefix ‖ digest`
    pub fn with_prefix(store: S, prefix: impl Into<Vec<u8>>, root: Digest) -> Self {
        Self::from_node_store(NodeStore::with_prefix(store, prefix), root)
    }

    fn from_node_store(db: NodeStore<S>, root: Digest) -> Self {
        tracing::debug!(root = %root.short(), "opening trie");
        MerkleTrie {
            db,
            root: Node::hash_ref(root),
        }
    }

    /// Get the root hash, reflecting uncommitted changes
    pub fn root_hash(&self) -> Digest {
        self.root.hash()
    }

    /// The root node as currently held in memory
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// The node cache in front of the backing store
    pub fn node_store(&self) -> &NodeStore<S> {
        &self.db
    }

    /// Persist every pending node write and deletion
    pub fn commit(&self) -> Result<CommitSummary> {
        let summary = self.db.commit()?;
        tracing::debug!(root = %self.root_hash().short(), "committed trie");
        Ok(summary)
    }

    /// Load the node behind a hash reference
    pub fn resolve(&self, digest: &Digest) -> Result<Node> {
        self.db.get(digest)?.ok_or(Error::MissingNode(*digest))
    }

    /// Insert or replace a value
    ///
    /// An empty value deletes the key. Returns whether the trie changed.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let path = to_nibbles(key);
        self.atomically(|trie, root| {
            if value.is_empty() {
                trie.delete_at(root, &path)
            } else {
                trie.put_at(root, &path, Node::leaf(value.to_vec()))
            }
        })
    }

    /// Remove a key
    ///
    /// Returns `Ok(false)` when the key was not present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let path = to_nibbles(key);
        self.atomically(|trie, root| trie.delete_at(root, &path))
    }

    /// Apply a mutation to the root, undoing all of it if any step fails
    ///
    /// Every node reachable from the previous root is recorded in the node
    /// cache or the backing store, so after rolling the cache back the trie
    /// reopens from the previous root digest.
    fn atomically(
        &mut self,
        mutate: impl FnOnce(&Self, &mut Node) -> Result<bool>,
    ) -> Result<bool> {
        let before = self.root.hash();
        let mut root = mem::take(&mut self.root);

        self.db.begin();
        match mutate(self, &mut root) {
            Ok(changed) => {
                self.db.finish();
                self.root = root;
                Ok(changed)
            }
            Err(e) => {
                self.db.rollback();
                tracing::debug!(
                    root = %before.short(),
                    error = %e,
                    "mutation failed, trie left unchanged"
                );
                self.root = Node::hash_ref(before);
                Err(e)
            }
        }
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = to_nibbles(key);
        let mut path = path.as_slice();
        let mut node = &self.root;

        loop {
            match node {
                Node::Empty => return Ok(None),
                Node::Hash(digest) => return self.get_from(self.resolve(digest)?, path),
                Node::Leaf(leaf) => {
                    return Ok(path.is_empty().then(|| leaf.value.clone()));
                }
                Node::Extension(ext) => {
                    if !path.starts_with(&ext.key) {
                        return Ok(None);
                    }
                    path = &path[ext.key.len()..];
                    node = &*ext.next;
                }
                Node::Branch(branch) => match path.split_first() {
                    None => node = &branch.children[BRANCH_VALUE_INDEX],
                    Some((&nibble, rest)) => {
                        node = &branch.children[nibble as usize];
                        path = rest;
                    }
                },
            }
        }
    }

    /// Continue a lookup below a node loaded from the store
    fn get_from(&self, mut node: Node, mut path: &[u8]) -> Result<Option<Vec<u8>>> {
        loop {
            node = match node {
                Node::Empty => return Ok(None),
                Node::Hash(digest) => self.resolve(&digest)?,
                Node::Leaf(leaf) => return Ok(path.is_empty().then_some(leaf.value)),
                Node::Extension(ext) => {
                    if !path.starts_with(&ext.key) {
                        return Ok(None);
                    }
                    path = &path[ext.key.len()..];
                    *ext.next
                }
                Node::Branch(branch) => {
                    let index = match path.split_first() {
                        None => BRANCH_VALUE_INDEX,
                        Some((&nibble, rest)) => {
                            path = rest;
                            nibble as usize
                        }
                    };
                    let mut children = (*branch).into_children();
                    mem::take(&mut children[index])
                }
            };
        }
    }

    /// Store `node` and count one more reference to it
    fn register(&self, node: &Node) -> Result<()> {
        self.db.put_node_with_refcount(node)
    }

    /// Drop one reference to the stored form of a node being replaced
    fn retire(&self, digest: &Digest) -> Result<()> {
        self.db.release_node(digest)
    }

    fn put_at(&self, node: &mut Node, path: &[u8], value: Node) -> Result<bool> {
        match node {
            Node::Leaf(leaf) => {
                if path.is_empty() {
                    let old = leaf.hash();
                    if old == value.hash() {
                        return Ok(false);
                    }
                    self.retire(&old)?;
                    self.register(&value)?;
                    *node = value;
                    return Ok(true);
                }

                // The key continues past this leaf: the leaf moves into the
                // terminal slot of a new branch
                let mut branch = BranchNode::new();
                branch.children[BRANCH_VALUE_INDEX] = mem::take(node);
                self.put_at(
                    &mut branch.children[path[0] as usize],
                    &path[1..],
                    value,
                )?;
                let branch = Node::Branch(Box::new(branch));
                self.register(&branch)?;
                *node = branch;
                Ok(true)
            }
            Node::Extension(ext) => {
                let common = common_prefix_len(&ext.key, path);
                if common == ext.key.len() {
                    let old = ext.hash();
                    if !self.put_at(&mut ext.next, &path[common..], value)? {
                        return Ok(false);
                    }
                    self.retire(&old)?;
                    ext.set_dirty();
                    self.register(node)?;
                    return Ok(true);
                }

                self.retire(&ext.hash())?;
                let key = mem::take(&mut ext.key);
                let next = mem::take(&mut *ext.next);

                let mut branch = BranchNode::new();

                let key_rest = &key[common..];
                branch.children[key_rest[0] as usize] = if key_rest.len() == 1 {
                    next
                } else {
                    let moved = Node::extension(key_rest[1..].to_vec(), next);
                    self.register(&moved)?;
                    moved
                };

                let path_rest = &path[common..];
                match path_rest.split_first() {
                    None => {
                        self.put_at(&mut branch.children[BRANCH_VALUE_INDEX], path_rest, value)?
                    }
                    Some((&nibble, rest)) => {
                        self.put_at(&mut branch.children[nibble as usize], rest, value)?
                    }
                };

                let branch = Node::Branch(Box::new(branch));
                self.register(&branch)?;

                *node = if common > 0 {
                    let shared = Node::extension(path[..common].to_vec(), branch);
                    self.register(&shared)?;
                    shared
                } else {
                    branch
                };
                Ok(true)
            }
            Node::Branch(branch) => {
                let old = branch.hash();
                let changed = match path.split_first() {
                    None => self.put_at(&mut branch.children[BRANCH_VALUE_INDEX], path, value)?,
                    Some((&nibble, rest)) => {
                        self.put_at(&mut branch.children[nibble as usize], rest, value)?
                    }
                };
                if !changed {
                    return Ok(false);
                }
                self.retire(&old)?;
                branch.set_dirty();
                self.register(node)?;
                Ok(true)
            }
            Node::Empty => {
                self.register(&value)?;
                if path.is_empty() {
                    *node = value;
                } else {
                    let ext = Node::extension(path.to_vec(), value);
                    self.register(&ext)?;
                    *node = ext;
                }
                Ok(true)
            }
            Node::Hash(digest) => {
                let digest = *digest;
                *node = self.resolve(&digest)?;
                self.put_at(node, path, value)
            }
        }
    }

    fn delete_at(&self, node: &mut Node, path: &[u8]) -> Result<bool> {
        match node {
            Node::Leaf(leaf) => {
                if !path.is_empty() {
                    return Ok(false);
                }
                self.retire(&leaf.hash())?;
                *node = Node::Empty;
                Ok(true)
            }
            Node::Extension(ext) => {
                if !path.starts_with(&ext.key) {
                    return Ok(false);
                }
                let old = ext.hash();
                if !self.delete_at(&mut ext.next, &path[ext.key.len()..])? {
                    return Ok(false);
                }
                self.retire(&old)?;

                match mem::take(&mut *ext.next) {
                    Node::Empty => {
                        *node = Node::Empty;
                        return Ok(true);
                    }
                    Node::Extension(child) => {
                        // Never leave an extension pointing at an extension
                        self.retire(&child.hash())?;
                        ext.key.extend_from_slice(&child.key);
                        ext.next = child.next;
                    }
                    other => *ext.next = other,
                }
                ext.set_dirty();
                self.register(node)?;
                Ok(true)
            }
            Node::Branch(branch) => {
                let old = branch.hash();
                let removed = match path.split_first() {
                    None => self.delete_at(&mut branch.children[BRANCH_VALUE_INDEX], path)?,
                    Some((&nibble, rest)) => {
                        self.delete_at(&mut branch.children[nibble as usize], rest)?
                    }
                };
                if !removed {
                    return Ok(false);
                }
                self.retire(&old)?;

                let occupied = branch.occupied();
                if occupied.len() > 1 {
                    branch.set_dirty();
                    self.register(node)?;
                    return Ok(true);
                }

                // A branch with a single child collapses into it
                let Some(&index) = occupied.first() else {
                    *node = Node::Empty;
                    return Ok(true);
                };
                let mut child = mem::take(&mut branch.children[index]);
                if let Node::Hash(digest) = child {
                    child = self.resolve(&digest)?;
                }

                if index == BRANCH_VALUE_INDEX {
                    // Only the value ending here remains
                    *node = child;
                    return Ok(true);
                }

                *node = match child {
                    Node::Extension(mut ext) => {
                        self.retire(&ext.hash())?;
                        ext.key.insert(0, index as u8);
                        ext.set_dirty();
                        Node::Extension(ext)
                    }
                    other => Node::extension(vec![index as u8], other),
                };
                self.register(node)?;
                Ok(true)
            }
            Node::Empty => Ok(false),
            Node::Hash(digest) => {
                let digest = *digest;
                *node = self.resolve(&digest)?;
                self.delete_at(node, path)
            }
        }
    }
}
