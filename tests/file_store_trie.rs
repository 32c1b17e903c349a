//! Tries persisted through a `FileStore`
//!
//! Run with: `cargo test --test file_store_trie`

use mpt_db::{Digest, Error, FileStore, KeyValueStore, MerkleTrie, SeekDirection};
use tempfile::tempdir;

fn pairs(trie: &MerkleTrie<&FileStore>, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    trie.find(prefix)
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
}

#[test]
fn test_trie_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.mpt");

    let root = {
        let store = FileStore::create(&path).unwrap();
        let mut trie = MerkleTrie::new(&store);
        trie.put(b"account:alice", b"100").unwrap();
        trie.put(b"account:bob", b"250").unwrap();
        trie.put(b"config:fee", b"3").unwrap();
        trie.commit().unwrap();
        store.sync().unwrap();
        trie.root_hash()
    };

    let store = FileStore::open(&path).unwrap();
    let trie = MerkleTrie::from_root(&store, root);
    assert_eq!(trie.get(b"account:bob").unwrap(), Some(b"250".to_vec()));
    assert_eq!(
        pairs(&trie, b"account:"),
        vec![
            (b"account:alice".to_vec(), b"100".to_vec()),
            (b"account:bob".to_vec(), b"250".to_vec()),
        ]
    );

    let last: Vec<_> = trie
        .seek(b"zzz", SeekDirection::Backward)
        .take(1)
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(last, vec![b"config:fee".to_vec()]);
}

#[test]
fn test_updates_across_sessions_collect_garbage() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gc.mpt");

    let first = {
        let store = FileStore::create(&path).unwrap();
        let mut trie = MerkleTrie::new(&store);
        for i in 0..20u8 {
            trie.put(&[b'k', i], &[i; 4]).unwrap();
        }
        trie.commit().unwrap();
        store.sync().unwrap();
        trie.root_hash()
    };

    let second = {
        let store = FileStore::open(&path).unwrap();
        let mut trie = MerkleTrie::from_root(&store, first);
        for i in 0..20u8 {
            assert!(trie.delete(&[b'k', i]).unwrap());
        }
        trie.commit().unwrap();
        store.sync().unwrap();
        assert!(store.is_empty());
        trie.root_hash()
    };
    assert_eq!(second, Digest::ZERO);

    // the old root was garbage collected
    let store = FileStore::open(&path).unwrap();
    let trie = MerkleTrie::from_root(&store, first);
    assert!(matches!(trie.get(b"k\x01"), Err(Error::MissingNode(_))));
}

#[test]
fn test_prefixed_trie_shares_store() {
    let dir = tempdir().unwrap();
    let store = FileStore::create(dir.path().join("shared.mpt")).unwrap();
    store.put(b"meta:name", b"ledger").unwrap();

    let mut trie = MerkleTrie::with_prefix(&store, b"n:".to_vec(), Digest::ZERO);
    trie.put(b"x", b"1").unwrap();
    trie.put(b"y", b"2").unwrap();
    trie.commit().unwrap();
    let root = trie.root_hash();

    let mut key = b"n:".to_vec();
    key.extend_from_slice(root.as_bytes());
    assert!(store.contains(&key));
    assert_eq!(store.get(b"meta:name").unwrap(), Some(b"ledger".to_vec()));

    // without the prefix the nodes are not found
    let unprefixed = MerkleTrie::from_root(&store, root);
    assert!(matches!(unprefixed.get(b"x"), Err(Error::MissingNode(d)) if d == root));
}

#[test]
fn test_uncommitted_edits_leave_file_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dry.mpt");
    let store = FileStore::create(&path).unwrap();

    let mut trie = MerkleTrie::new(&store);
    trie.put(b"pending", b"value").unwrap();
    assert!(store.is_empty());
    assert_eq!(trie.get(b"pending").unwrap(), Some(b"value".to_vec()));
}
