//! Trie node types and their wire encoding
//!
//! Every node is stored under the digest of its full serialization. Inside a
//! parent's serialization a child is always written as a hash reference, so a
//! stored record never inlines its subtree and the trie can be loaded lazily.
//!
//! ```text
//! Hash       0x02 | varint len | digest (len 0 = empty)
//! Leaf       0x03 | varint len | value
//! Extension  0x01 | varint len | nibbles | child ref
//! Branch     0x00 | 17 x child ref
//! ```

use crate::model::{Digest, DIGEST_LEN};
use crate::{Error, Result};
use serde_json::{json, Map, Value};
use std::cell::Cell;

/// Slots in a branch: sixteen nibbles plus the terminal value slot
pub const BRANCH_CHILD_COUNT: usize = 17;

/// Index of the slot holding the value of a key ending at the branch
pub const BRANCH_VALUE_INDEX: usize = BRANCH_CHILD_COUNT - 1;

const TAG_BRANCH: u8 = 0x00;
const TAG_EXTENSION: u8 = 0x01;
const TAG_HASH: u8 = 0x02;
const TAG_LEAF: u8 = 0x03;

/// A node in the merkle patricia trie
#[derive(Clone, Debug, Default)]
pub enum Node {
    /// Absence of a subtree; its digest is [`Digest::ZERO`]
    #[default]
    Empty,
    /// Placeholder for a stored node that has not been loaded yet
    Hash(Digest),
    /// Value of a key ending at this position
    Leaf(LeafNode),
    /// Shared nibble run leading to a single child
    Extension(ExtensionNode),
    /// Sixteen nibble slots plus a terminal value slot
    Branch(Box<BranchNode>),
}

/// Terminal node holding a value
#[derive(Clone, Debug)]
pub struct LeafNode {
    pub(crate) value: Vec<u8>,
    digest: Cell<Option<Digest>>,
}

/// Node compressing a run of nibbles shared by everything below it
///
/// `next` is never `Empty` and never another extension; consecutive runs are
/// always merged.
#[derive(Clone, Debug)]
pub struct ExtensionNode {
    pub(crate) key: Vec<u8>,
    pub(crate) next: Box<Node>,
    digest: Cell<Option<Digest>>,
}

/// Sixteen-way fan-out node
#[derive(Clone, Debug)]
pub struct BranchNode {
    pub(crate) children: [Node; BRANCH_CHILD_COUNT],
    digest: Cell<Option<Digest>>,
}

fn memoized(cell: &Cell<Option<Digest>>, encode: impl FnOnce() -> Vec<u8>) -> Digest {
    if let Some(digest) = cell.get() {
        return digest;
    }
    let digest = Digest::digest(&encode());
    cell.set(Some(digest));
    digest
}

impl LeafNode {
    pub fn new(value: Vec<u8>) -> Self {
        LeafNode {
            value,
            digest: Cell::new(None),
        }
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn hash(&self) -> Digest {
        memoized(&self.digest, || self.encode())
    }

    pub fn set_dirty(&self) {
        self.digest.set(None);
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.value.len() + 4);
        out.push(TAG_LEAF);
        write_var_bytes(&mut out, &self.value);
        out
    }
}

impl ExtensionNode {
    pub fn new(key: Vec<u8>, next: Node) -> Self {
        debug_assert!(!key.is_empty(), "extension key must not be empty");
        ExtensionNode {
            key,
            next: Box::new(next),
            digest: Cell::new(None),
        }
    }

    /// The nibble run
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn next(&self) -> &Node {
        &self.next
    }

    pub fn hash(&self) -> Digest {
        memoized(&self.digest, || self.encode())
    }

    /// Invalidate the memoized digest after `key` or `next` changed
    pub fn set_dirty(&self) {
        self.digest.set(None);
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.key.len() + DIGEST_LEN + 8);
        out.push(TAG_EXTENSION);
        write_var_bytes(&mut out, &self.key);
        self.next.serialize_as_child(&mut out);
        out
    }
}

impl BranchNode {
    pub fn new() -> Self {
        BranchNode {
            children: std::array::from_fn(|_| Node::Empty),
            digest: Cell::new(None),
        }
    }

    pub fn children(&self) -> &[Node; BRANCH_CHILD_COUNT] {
        &self.children
    }

    /// Take ownership of every slot
    pub fn into_children(self) -> [Node; BRANCH_CHILD_COUNT] {
        self.children
    }

    pub fn hash(&self) -> Digest {
        memoized(&self.digest, || self.encode())
    }

    /// Invalidate the memoized digest after a slot changed
    pub fn set_dirty(&self) {
        self.digest.set(None);
    }

    /// Indexes of the slots that hold something
    pub fn occupied(&self) -> Vec<usize> {
        (0..BRANCH_CHILD_COUNT)
            .filter(|&i| !self.children[i].is_empty())
            .collect()
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + BRANCH_CHILD_COUNT * (DIGEST_LEN + 2));
        out.push(TAG_BRANCH);
        for child in &self.children {
            child.serialize_as_child(&mut out);
        }
        out
    }
}

impl Default for BranchNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    /// Create a leaf node
    pub fn leaf(value: Vec<u8>) -> Self {
        Node::Leaf(LeafNode::new(value))
    }

    /// Create an extension node
    pub fn extension(key: Vec<u8>, next: Node) -> Self {
        Node::Extension(ExtensionNode::new(key, next))
    }

    /// Create a reference to a stored node; the zero digest means empty
    pub fn hash_ref(digest: Digest) -> Self {
        if digest.is_zero() {
            Node::Empty
        } else {
            Node::Hash(digest)
        }
    }

    /// Check if this node is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// Check if this node is an unresolved reference
    pub fn is_reference(&self) -> bool {
        matches!(self, Node::Empty | Node::Hash(_))
    }

    /// Digest of the node, computed on first use and memoized until the
    /// node is marked dirty
    pub fn hash(&self) -> Digest {
        match self {
            Node::Empty => Digest::ZERO,
            Node::Hash(digest) => *digest,
            Node::Leaf(leaf) => leaf.hash(),
            Node::Extension(ext) => ext.hash(),
            Node::Branch(branch) => branch.hash(),
        }
    }

    /// Canonical encoding of the node with its full payload
    pub fn serialize_full(&self) -> Vec<u8> {
        match self {
            Node::Empty => {
                let mut out = Vec::with_capacity(2);
                write_hash_ref(&mut out, None);
                out
            }
            Node::Hash(digest) => {
                let mut out = Vec::with_capacity(DIGEST_LEN + 2);
                write_hash_ref(&mut out, Some(digest));
                out
            }
            Node::Leaf(leaf) => leaf.encode(),
            Node::Extension(ext) => ext.encode(),
            Node::Branch(branch) => branch.encode(),
        }
    }

    /// Encode this node as it appears inside its parent: a hash reference
    pub fn serialize_as_child(&self, out: &mut Vec<u8>) {
        match self {
            Node::Empty => write_hash_ref(out, None),
            Node::Hash(digest) => write_hash_ref(out, Some(digest)),
            other => write_hash_ref(out, Some(&other.hash())),
        }
    }

    /// Decode a node from its full serialization
    pub fn deserialize(bytes: &[u8]) -> Result<Node> {
        let mut reader = Reader::new(bytes);
        let node = reader.read_node()?;
        if !reader.is_done() {
            return Err(Error::InvalidNode(format!(
                "{} trailing bytes after node",
                reader.remaining()
            )));
        }
        Ok(node)
    }

    /// Render the in-memory tree for inspection; unresolved children are
    /// shown as their digests
    pub fn to_json(&self) -> Value {
        match self {
            Node::Empty => Value::Null,
            Node::Hash(digest) => json!({ "hash": digest.to_hex() }),
            Node::Leaf(leaf) => json!({
                "type": "leaf",
                "hash": leaf.hash().to_hex(),
                "value": hex::encode(&leaf.value),
            }),
            Node::Extension(ext) => json!({
                "type": "extension",
                "hash": ext.hash().to_hex(),
                "key": nibble_string(&ext.key),
                "next": ext.next.to_json(),
            }),
            Node::Branch(branch) => {
                let mut children = Map::new();
                for (i, child) in branch.children.iter().enumerate() {
                    if child.is_empty() {
                        continue;
                    }
                    let label = if i == BRANCH_VALUE_INDEX {
                        "value".to_string()
                    } else {
                        format!("{:x}", i)
                    };
                    children.insert(label, child.to_json());
                }
                json!({
                    "type": "branch",
                    "hash": branch.hash().to_hex(),
                    "children": children,
                })
            }
        }
    }
}

fn nibble_string(nibbles: &[u8]) -> String {
    nibbles.iter().map(|n| format!("{:x}", n)).collect()
}

fn write_var_uint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_var_uint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn write_hash_ref(out: &mut Vec<u8>, digest: Option<&Digest>) {
    out.push(TAG_HASH);
    match digest {
        Some(digest) if !digest.is_zero() => write_var_bytes(out, digest.as_bytes()),
        _ => write_var_bytes(out, &[]),
    }
}

/// Cursor over a serialized node
struct Reader<'b> {
    data: &'b [u8],
    pos: usize,
}

impl<'b> Reader<'b> {
    fn new(data: &'b [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_done(&self) -> bool {
        self.pos == self.data.len()
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::InvalidNode("truncated node".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_var_uint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::InvalidNode("length prefix overflow".into()))
    }

    fn read_var_bytes(&mut self) -> Result<&'b [u8]> {
        let len = self.read_var_uint()?;
        if len > self.remaining() as u64 {
            return Err(Error::InvalidNode(format!(
                "truncated node: need {} bytes, have {}",
                len,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += len as usize;
        Ok(&self.data[start..self.pos])
    }

    fn read_hash_payload(&mut self) -> Result<Node> {
        let bytes = self.read_var_bytes()?;
        if bytes.is_empty() {
            return Ok(Node::Empty);
        }
        let digest = Digest::from_slice(bytes).ok_or_else(|| {
            Error::InvalidNode(format!("hash reference of {} bytes", bytes.len()))
        })?;
        Ok(Node::hash_ref(digest))
    }

    fn read_child(&mut self) -> Result<Node> {
        match self.read_u8()? {
            TAG_HASH => self.read_hash_payload(),
            tag => Err(Error::InvalidNode(format!(
                "child must be a hash reference, found tag {:#04x}",
                tag
            ))),
        }
    }

    fn read_node(&mut self) -> Result<Node> {
        match self.read_u8()? {
            TAG_HASH => self.read_hash_payload(),
            TAG_LEAF => Ok(Node::leaf(self.read_var_bytes()?.to_vec())),
            TAG_EXTENSION => {
                let key = self.read_var_bytes()?;
                if key.is_empty() || key.iter().any(|&n| n > 0x0F) {
                    return Err(Error::InvalidNode("invalid extension key".into()));
                }
                let key = key.to_vec();
                let next = self.read_child()?;
                if next.is_empty() {
                    return Err(Error::InvalidNode("extension without child".into()));
                }
                Ok(Node::extension(key, next))
            }
            TAG_BRANCH => {
                let mut branch = BranchNode::new();
                for slot in branch.children.iter_mut() {
                    *slot = self.read_child()?;
                }
                Ok(Node::Branch(Box::new(branch)))
            }
            tag => Err(Error::InvalidNode(format!("unknown node tag {:#04x}", tag))),
        }
    }
}
