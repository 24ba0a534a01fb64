use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crc32fast::Hasher;

use crate::traffic::{LedData, LedTable};
use crate::{Error, Result};

const CRC_LEN: usize = 4;
const ENTRY_EXTENSION: &str = "bin";

/// Key-value store that outlives the process (flash on the board, files on
/// a host).
pub trait PersistentStore: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// One file per key inside `dir`, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::Store(format!("invalid store key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.{ENTRY_EXTENSION}")))
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.entry_path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-memory store; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `set` fail.
    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.lock() {
            *flag = fail;
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.lock().map(|flag| *flag).unwrap_or(false) {
            return Err(Error::Store(format!("write to '{key}' refused")));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".into()))?;
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Serialize a table as bincode entries followed by a little-endian CRC-32.
pub fn encode_table(table: &LedTable) -> Result<Vec<u8>> {
    let mut bytes = bincode::encode_to_vec(table.entries().to_vec(), bincode::config::standard())
        .map_err(|err| Error::Store(format!("encode table: {err}")))?;
    let crc = checksum(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    Ok(bytes)
}

/// Inverse of [`encode_table`]; the table must have exactly `expected_len`
/// slots.
pub fn decode_table(bytes: &[u8], expected_len: usize) -> Result<LedTable> {
    if bytes.len() < CRC_LEN {
        return Err(Error::Parse("persisted table is truncated".into()));
    }
    let (payload, crc_bytes) = bytes.split_at(bytes.len() - CRC_LEN);
    let mut crc = [0u8; CRC_LEN];
    crc.copy_from_slice(crc_bytes);
    if checksum(payload) != u32::from_le_bytes(crc) {
        return Err(Error::ChecksumMismatch);
    }

    let (entries, used): (Vec<LedData>, usize) =
        bincode::decode_from_slice(payload, bincode::config::standard())
            .map_err(|err| Error::Parse(format!("decode table: {err}")))?;
    if used != payload.len() {
        return Err(Error::Parse(format!(
            "persisted table has {} trailing bytes",
            payload.len() - used
        )));
    }
    if entries.len() != expected_len {
        return Err(Error::Store(format!(
            "persisted table has {} slots, expected {expected_len}",
            entries.len()
        )));
    }
    Ok(LedTable::from_entries(entries))
}

pub fn save_table(store: &mut dyn PersistentStore, key: &str, table: &LedTable) -> Result<()> {
    let bytes = encode_table(table)?;
    store.set(key, &bytes)
}

/// Last persisted table for `key`, or `None` if nothing was ever stored.
pub fn load_table(
    store: &dyn PersistentStore,
    key: &str,
    expected_len: usize,
) -> Result<Option<LedTable>> {
    match store.get(key)? {
        Some(bytes) => decode_table(&bytes, expected_len).map(Some),
        None => Ok(None),
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
