//! Nibble paths
//!
//! Keys are arbitrary byte strings; the trie walks them four bits at a time.
//! Each byte becomes two nibbles, high nibble first.

use crate::{Error, Result};

/// Split every byte of `key` into its high and low nibble
pub fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles
}

/// Pack a nibble sequence back into bytes
///
/// Fails with [`Error::MalformedPath`] when the sequence has odd length.
pub fn from_nibbles(nibbles: &[u8]) -> Result<Vec<u8>> {
    if nibbles.len() % 2 != 0 {
        return Err(Error::MalformedPath(nibbles.len()));
    }
    Ok(nibbles
        .chunks_exact(2)
        .map(|pair| (pair[0] << 4) | (pair[1] & 0x0F))
        .collect())
}

/// Find the length of the common prefix between two nibble slices
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
