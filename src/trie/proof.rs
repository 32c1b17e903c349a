//! Inclusion proofs
//!
//! A proof is the list of full node serializations met on the way from the
//! root to a key, root first. Since every node is addressed by the digest of
//! its serialization, a verifier holding only the root digest can replay the
//! lookup against the proof and trust whatever value it reaches.

use super::node::{Node, BRANCH_VALUE_INDEX};
use super::tree::MerkleTrie;
use crate::model::{to_nibbles, Digest};
use crate::store::KeyValueStore;
use crate::{Error, Result};
use std::collections::HashMap;

/// One step of a lookup
enum Step<'n> {
    Found(&'n [u8]),
    Absent,
    Child(&'n Node),
}

/// Move one node down along `path`, consuming the nibbles the node covers.
/// References must be resolved by the caller first.
fn descend<'n>(node: &'n Node, path: &mut &[u8]) -> Step<'n> {
    let current: &[u8] = *path;
    match node {
        Node::Empty | Node::Hash(_) => Step::Absent,
        Node::Leaf(leaf) if current.is_empty() => Step::Found(&leaf.value),
        Node::Leaf(_) => Step::Absent,
        Node::Extension(ext) => {
            if !current.starts_with(&ext.key) {
                return Step::Absent;
            }
            *path = &current[ext.key.len()..];
            Step::Child(&ext.next)
        }
        Node::Branch(branch) => match current.split_first() {
            None => Step::Child(&branch.children[BRANCH_VALUE_INDEX]),
            Some((&nibble, rest)) => {
                *path = rest;
                Step::Child(&branch.children[nibble as usize])
            }
        },
    }
}

impl<S: KeyValueStore> MerkleTrie<S> {
    /// Collect the nodes proving the value stored under `key`
    ///
    /// Returns `None` when the key is not present. Uncommitted changes are
    /// included, so the proof checks against the current [`root_hash`].
    ///
    /// [`root_hash`]: MerkleTrie::root_hash
    pub fn get_proof(&self, key: &[u8]) -> Result<Option<Vec<Vec<u8>>>> {
        let path = to_nibbles(key);
        let mut path = path.as_slice();
        let mut proof = Vec::new();
        let mut node = &self.root;

        // In-memory part of the path
        let mut digest = loop {
            match node {
                Node::Empty => return Ok(None),
                Node::Hash(digest) => break *digest,
                _ => {}
            }
            proof.push(node.serialize_full());
            match descend(node, &mut path) {
                Step::Found(_) => return Ok(Some(proof)),
                Step::Absent => return Ok(None),
                Step::Child(child) => node = child,
            }
        };

        // Stored part: children of loaded nodes are always references
        loop {
            let node = self.resolve(&digest)?;
            proof.push(node.serialize_full());
            digest = match descend(&node, &mut path) {
                Step::Found(_) => return Ok(Some(proof)),
                Step::Absent => return Ok(None),
                Step::Child(Node::Hash(next)) => *next,
                Step::Child(_) => return Ok(None),
            };
        }
    }
}

/// Check a proof against a root digest
///
/// Returns the value the proof establishes for `key`, or `None` when it
/// establishes that the key is absent. A node the lookup needs but the proof
/// lacks is reported as [`Error::MissingNode`].
pub fn verify_proof(root: Digest, key: &[u8], proof: &[Vec<u8>]) -> Result<Option<Vec<u8>>> {
    let nodes = proof
        .iter()
        .map(|raw| Ok((Digest::digest(raw), Node::deserialize(raw)?)))
        .collect::<Result<HashMap<Digest, Node>>>()?;

    let path = to_nibbles(key);
    let mut path = path.as_slice();
    let mut digest = root;

    loop {
        if digest.is_zero() {
            return Ok(None);
        }
        let node = nodes.get(&digest).ok_or(Error::MissingNode(digest))?;
        digest = match descend(node, &mut path) {
            Step::Found(value) => return Ok(Some(value.to_vec())),
            Step::Absent => return Ok(None),
            Step::Child(child) => child.hash(),
        };
    }
}
