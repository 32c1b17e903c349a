//! Prefix search and ordered iteration
//!
//! Both walks are lazy: nodes are resolved from the store only when the
//! iterator reaches them, and dropping the iterator stops all work. Keys are
//! ordered nibble by nibble, with a key sorting before every key it is a
//! prefix of. That puts a branch's terminal slot before nibble 0.

use super::node::{Node, BRANCH_CHILD_COUNT, BRANCH_VALUE_INDEX};
use super::tree::MerkleTrie;
use crate::model::{from_nibbles, to_nibbles, Digest};
use crate::store::KeyValueStore;
use crate::Result;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::iter;
use std::mem;

/// Direction for [`MerkleTrie::seek`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekDirection {
    /// Ascending key order, starting at the seek key
    Forward,
    /// Descending key order, starting at the seek key
    Backward,
}

/// A node waiting to be visited
struct Frame<'t> {
    node: Cow<'t, Node>,
    /// Nibbles leading to `node`
    key: Vec<u8>,
    /// Remaining nibbles of the seek key, or `None` when the whole subtree is
    /// in range
    target: Option<Vec<u8>>,
}

/// A node taken apart, borrowing from the trie or owning what was resolved
enum Parts<'t> {
    Empty,
    Hash(Digest),
    Leaf(Vec<u8>),
    Extension(Vec<u8>, Cow<'t, Node>),
    Branch([Cow<'t, Node>; BRANCH_CHILD_COUNT]),
}

fn split(node: Cow<'_, Node>) -> Parts<'_> {
    match node {
        Cow::Borrowed(node) => match node {
            Node::Empty => Parts::Empty,
            Node::Hash(digest) => Parts::Hash(*digest),
            Node::Leaf(leaf) => Parts::Leaf(leaf.value.clone()),
            Node::Extension(ext) => Parts::Extension(ext.key.clone(), Cow::Borrowed(&*ext.next)),
            Node::Branch(branch) => {
                Parts::Branch(std::array::from_fn(move |i| Cow::Borrowed(&branch.children[i])))
            }
        },
        Cow::Owned(node) => match node {
            Node::Empty => Parts::Empty,
            Node::Hash(digest) => Parts::Hash(digest),
            Node::Leaf(leaf) => Parts::Leaf(leaf.value),
            Node::Extension(ext) => Parts::Extension(ext.key, Cow::Owned(*ext.next)),
            Node::Branch(branch) => Parts::Branch((*branch).into_children().map(Cow::Owned)),
        },
    }
}

/// Lazy iterator over `(key, value)` pairs
///
/// Yields an error and stops if a node cannot be resolved.
pub struct TrieIter<'t, S: KeyValueStore> {
    trie: &'t MerkleTrie<S>,
    direction: SeekDirection,
    stack: Vec<Frame<'t>>,
}

impl<'t, S: KeyValueStore> TrieIter<'t, S> {
    fn step(&mut self, frame: Frame<'t>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Frame { node, key, target } = frame;
        match split(node) {
            Parts::Empty => {}
            Parts::Hash(digest) => {
                let node = self.trie.resolve(&digest)?;
                self.stack.push(Frame {
                    node: Cow::Owned(node),
                    key,
                    target,
                });
            }
            Parts::Leaf(value) => {
                // The leaf's key is a prefix of the seek key: it sorts before
                let in_range = match &target {
                    None => true,
                    Some(path) => path.is_empty() || self.direction == SeekDirection::Backward,
                };
                if in_range {
                    return Ok(Some((from_nibbles(&key)?, value)));
                }
            }
            Parts::Extension(ext_key, next) => {
                if let Some(target) = self.extension_target(&ext_key, target) {
                    let mut key = key;
                    key.extend_from_slice(&ext_key);
                    self.stack.push(Frame {
                        node: next,
                        key,
                        target,
                    });
                }
            }
            Parts::Branch(children) => self.push_branch(children, key, target),
        }
        Ok(None)
    }

    /// Decide what part of an extension's subtree is in range: `None` to skip
    /// it, `Some(None)` to take all of it, `Some(Some(rest))` to keep seeking
    fn extension_target(&self, ext_key: &[u8], target: Option<Vec<u8>>) -> Option<Option<Vec<u8>>> {
        let Some(path) = target else {
            return Some(None);
        };
        let forward = self.direction == SeekDirection::Forward;
        let len = ext_key.len().min(path.len());
        match ext_key[..len].cmp(&path[..len]) {
            Ordering::Less => (!forward).then_some(None),
            Ordering::Greater => forward.then_some(None),
            Ordering::Equal if ext_key.len() <= path.len() => {
                Some(Some(path[ext_key.len()..].to_vec()))
            }
            // The seek key ends inside the extension: everything below
            // extends it and sorts after it
            Ordering::Equal => forward.then_some(None),
        }
    }

    fn push_branch(
        &mut self,
        mut children: [Cow<'t, Node>; BRANCH_CHILD_COUNT],
        key: Vec<u8>,
        target: Option<Vec<u8>>,
    ) {
        let forward = self.direction == SeekDirection::Forward;
        let everything = |forward: bool| -> Vec<(usize, Option<Vec<u8>>)> {
            if forward {
                iter::once(BRANCH_VALUE_INDEX)
                    .chain(0..BRANCH_VALUE_INDEX)
                    .map(|i| (i, None))
                    .collect()
            } else {
                (0..BRANCH_VALUE_INDEX)
                    .rev()
                    .chain(iter::once(BRANCH_VALUE_INDEX))
                    .map(|i| (i, None))
                    .collect()
            }
        };

        // Slots in visiting order
        let order = match target {
            None => everything(forward),
            Some(path) => match path.split_first() {
                None if forward => everything(true),
                None => vec![(BRANCH_VALUE_INDEX, None)],
                Some((&first, rest)) => {
                    let first = first as usize;
                    let mut order = vec![(first, Some(rest.to_vec()))];
                    if forward {
                        order.extend((first + 1..BRANCH_VALUE_INDEX).map(|i| (i, None)));
                    } else {
                        order.extend((0..first).rev().map(|i| (i, None)));
                        order.push((BRANCH_VALUE_INDEX, None));
                    }
                    order
                }
            },
        };

        for (index, target) in order.into_iter().rev() {
            let child = mem::replace(&mut children[index], Cow::Owned(Node::Empty));
            if child.is_empty() {
                continue;
            }
            let mut child_key = key.clone();
            if index != BRANCH_VALUE_INDEX {
                child_key.push(index as u8);
            }
            self.stack.push(Frame {
                node: child,
                key: child_key,
                target,
            });
        }
    }
}

impl<'t, S: KeyValueStore> Iterator for TrieIter<'t, S> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.stack.pop() {
            match self.step(frame) {
                Ok(Some(pair)) => return Some(Ok(pair)),
                Ok(None) => {}
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl<S: KeyValueStore> MerkleTrie<S> {
    /// All pairs whose key starts with `prefix`, each exactly once
    ///
    /// The walk down to the prefix happens eagerly; the subtree below it is
    /// walked lazily in ascending key order.
    pub fn find(&self, prefix: &[u8]) -> Result<TrieIter<'_, S>> {
        let path = to_nibbles(prefix);
        let stack = match self.seek_prefix(&path)? {
            Some((key, start)) => vec![Frame {
                node: start,
                key,
                target: None,
            }],
            None => Vec::new(),
        };
        Ok(TrieIter {
            trie: self,
            direction: SeekDirection::Forward,
            stack,
        })
    }

    /// Ordered iteration starting at `key`, inclusive
    ///
    /// `Forward` yields every key `>= key` ascending; `Backward` yields every
    /// key `<= key` descending.
    pub fn seek(&self, key: &[u8], direction: SeekDirection) -> TrieIter<'_, S> {
        TrieIter {
            trie: self,
            direction,
            stack: vec![Frame {
                node: Cow::Borrowed(&self.root),
                key: Vec::new(),
                target: Some(to_nibbles(key)),
            }],
        }
    }

    /// Descend along `path` to the subtree holding every key that extends it
    ///
    /// Returns the nibbles consumed on the way, which may run past the end of
    /// `path` when it stops inside an extension, and the subtree root.
    fn seek_prefix(&self, path: &[u8]) -> Result<Option<(Vec<u8>, Cow<'_, Node>)>> {
        let mut node = Cow::Borrowed(&self.root);
        let mut consumed = Vec::with_capacity(path.len());
        let mut path = path;

        loop {
            let found = match &*node {
                Node::Empty => Some(false),
                Node::Leaf(_) | Node::Branch(_) if path.is_empty() => Some(true),
                Node::Leaf(_) => Some(false),
                Node::Hash(_) | Node::Extension(_) | Node::Branch(_) => None,
            };
            match found {
                Some(true) => return Ok(Some((consumed, node))),
                Some(false) => return Ok(None),
                None => {}
            }

            node = match split(node) {
                Parts::Hash(digest) => Cow::Owned(self.resolve(&digest)?),
                Parts::Branch(mut children) => {
                    let Some((&nibble, rest)) = path.split_first() else {
                        return Ok(None);
                    };
                    consumed.push(nibble);
                    path = rest;
                    mem::replace(&mut children[nibble as usize], Cow::Owned(Node::Empty))
                }
                Parts::Extension(key, next) => {
                    if path.starts_with(&key) {
                        path = &path[key.len()..];
                        consumed.extend_from_slice(&key);
                        next
                    } else if key.starts_with(path) {
                        consumed.extend_from_slice(&key);
                        return Ok(Some((consumed, next)));
                    } else {
                        return Ok(None);
                    }
                }
                Parts::Empty | Parts::Leaf(_) => return Ok(None),
            };
        }
    }
}
