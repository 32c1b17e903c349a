//! Core data model types for mpt_db

mod hash;
pub mod nibbles;

pub use hash::{Digest, DIGEST_LEN};
pub use nibbles::{common_prefix_len, from_nibbles, to_nibbles};
