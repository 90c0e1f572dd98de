use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Browser-grade per-key budget used when no quota is configured.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Key-value storage the history and library persist into.
pub trait KvSubstrate: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SubstrateError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SubstrateError>;
    fn remove(&self, key: &str) -> Result<(), SubstrateError>;
}

#[derive(Debug)]
pub enum SubstrateError {
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },
    Io(io::Error),
}

impl SubstrateError {
    /// Whether the write was rejected for size reasons.
    pub fn is_capacity(&self) -> bool {
        match self {
            SubstrateError::QuotaExceeded { .. } => true,
            SubstrateError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::FileTooLarge
            ),
        }
    }
}

impl std::fmt::Display for SubstrateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubstrateError::QuotaExceeded { key, size, limit } => write!(
                f,
                "quota exceeded for {key}: {size} bytes exceeds limit of {limit} bytes"
            ),
            SubstrateError::Io(err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for SubstrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubstrateError::QuotaExceeded { .. } => None,
            SubstrateError::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for SubstrateError {
    fn from(err: io::Error) -> Self {
        SubstrateError::Io(err)
    }
}

fn check_quota(key: &str, value: &str, quota: Option<usize>) -> Result<(), SubstrateError> {
    match quota {
        Some(limit) if value.len() > limit => Err(SubstrateError::QuotaExceeded {
            key: key.to_string(),
            size: value.len(),
            limit,
        }),
        _ => Ok(()),
    }
}

/// In-process substrate. Clones share the same backing map.
#[derive(Debug, Clone, Default)]
pub struct MemorySubstrate {
    values: Arc<Mutex<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            values: Arc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn quota_bytes(&self) -> Option<usize> {
        self.quota_bytes
    }

    /// Write directly, bypassing the quota. Used to seed foreign or corrupt
    /// snapshots.
    pub fn insert_raw(&self, key: &str, value: impl Into<String>) {
        self.values.lock().insert(key.to_string(), value.into());
    }
}

impl KvSubstrate for MemorySubstrate {
    fn get(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        check_quota(key, value, self.quota_bytes)?;
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SubstrateError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key under `root`, each capped at `quota_bytes`.
#[derive(Debug, Clone)]
pub struct FileSubstrate {
    root: PathBuf,
    quota_bytes: usize,
}

impl FileSubstrate {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: usize) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }
}

impl KvSubstrate for FileSubstrate {
    fn get(&self, key: &str) -> Result<Option<String>, SubstrateError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SubstrateError> {
        check_quota(key, value, Some(self.quota_bytes))?;
        atomic_write(&self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SubstrateError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

// Temp file, fsync, rename: readers see the old snapshot or the new one.
fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let write_result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if write_result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    write_result
}

/// Map a key to a file stem. Bytes outside `[A-Za-z0-9_-]` are written as
/// `%XX`, so distinct keys never share a file.
fn sanitize_key(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }

    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}
