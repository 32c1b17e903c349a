//! Single-file backing store
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("MPTRIEDB")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - entry_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - reserved: 32 bytes
//!
//! [VALUES: variable]
//!   - zstd-compressed values, concatenated
//!
//! [INDEX: variable]
//!   - (key_len u16, key, offset u64, size u32) entries sorted by key
//! ```
//!
//! Values are append-only. Overwriting or deleting a key only updates the
//! in-memory index; the index is written out on [`FileStore::sync`].

use super::KeyValueStore;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: u64 = 64;

/// zstd level used for stored values
const COMPRESSION_LEVEL: i32 = 3;

/// Location of a value inside the file
#[derive(Clone, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// A key-value store backed by a single file
pub struct FileStore {
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<Vec<u8>, IndexEntry>>,
    /// Current append position
    write_offset: RwLock<u64>,
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(arr)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(arr)
}

impl FileStore {
    /// Create a new store file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "created file store");

        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
            write_offset: RwLock::new(HEADER_SIZE),
        })
    }

    /// Open an existing store file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| Error::InvalidFile("File too short for header".into()))?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = le_u32(&header[8..12]);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let entry_count = le_u64(&header[16..24]);
        let index_offset = le_u64(&header[24..32]);

        let mut index = HashMap::new();
        if index_offset > 0 && entry_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..entry_count {
                let mut len_buf = [0u8; 2];
                file.read_exact(&mut len_buf)?;
                let key_len = u16::from_le_bytes(len_buf) as usize;

                let mut key = vec![0u8; key_len];
                file.read_exact(&mut key)?;

                let mut loc_buf = [0u8; 12];
                file.read_exact(&mut loc_buf)?;
                let offset = le_u64(&loc_buf[0..8]);
                let size = le_u32(&loc_buf[8..12]);

                index.insert(key, IndexEntry { offset, size });
            }
        }

        // New values overwrite the old index; it is rewritten on sync
        let write_offset = if index_offset > 0 {
            index_offset
        } else {
            file.seek(SeekFrom::End(0))?
        };

        tracing::debug!(path = %path.display(), entries = index.len(), "opened file store");

        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            write_offset: RwLock::new(write_offset),
        })
    }

    /// Open or create a store file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Check if a key exists
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// Get the number of live keys
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Flush changes and write index to disk
    pub fn sync(&self) -> Result<()> {
        let index = self.index.read();
        let write_offset = *self.write_offset.read();
        let mut file = self.file.write();

        file.seek(SeekFrom::Start(16))?;
        file.write_all(&(index.len() as u64).to_le_bytes())?;
        file.write_all(&write_offset.to_le_bytes())?;

        file.seek(SeekFrom::Start(write_offset))?;

        // Sort by key for determinism
        let mut entries: Vec<_> = index.iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut buf = Vec::new();
        for (key, entry) in entries {
            buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&entry.size.to_le_bytes());
        }
        file.write_all(&buf)?;
        let end = write_offset + buf.len() as u64;
        file.set_len(end)?;

        file.sync_all()?;
        Ok(())
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entry = match self.index.read().get(key).cloned() {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(entry.offset))?;

        let mut data = vec![0u8; entry.size as usize];
        file.read_exact(&mut data).map_err(|e| {
            Error::Corruption(format!("value at offset {} unreadable: {}", entry.offset, e))
        })?;

        Ok(Some(zstd::decode_all(data.as_slice())?))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > u16::MAX as usize {
            return Err(Error::Store(format!("key of {} bytes too long", key.len())));
        }

        let compressed = zstd::encode_all(value, COMPRESSION_LEVEL)?;
        let size = compressed.len() as u32;

        let offset = {
            let mut write_offset = self.write_offset.write();
            let offset = *write_offset;

            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&compressed)?;

            *write_offset = offset + size as u64;
            offset
        };

        self.index
            .write()
            .insert(key.to_vec(), IndexEntry { offset, size });
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.index.write().remove(key);
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        if let Err(e) = self.sync() {
            tracing::warn!(path = %self.path.display(), error = %e, "sync on drop failed");
        }
    }
}
