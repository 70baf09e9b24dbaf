// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem artifact store: one `<key>.tgba` file per artifact.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::{open, seal, validate_key, ArtifactHash, ArtifactStore, StoreError};

/// File extension of published artifacts.
pub const EXTENSION: &str = "tgba";

/// Artifact store rooted at a directory.
///
/// # Publish protocol
///
/// 1. Take the per-key writer lock (writers to different keys proceed in
///    parallel; writers to the same key queue).
/// 2. Write the sealed envelope to `.<key>.tgba.<pid>.<n>.tmp` and `fsync` it.
/// 3. `rename` the temporary file over `<key>.tgba` (see [`write_atomic`]).
///
/// Readers only ever open `<key>.tgba`, so they see the previous artifact or
/// the new one, never a prefix. Temporary files left by a killed process are
/// ignored by [`keys`](ArtifactStore::keys) and overwritten on the next
/// publish from a different counter value.
pub struct FsStore {
    root: PathBuf,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the artifacts.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of the artifact for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{EXTENSION}"))
    }

    fn writer_lock(&self, key: &str) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| StoreError::Poisoned("fs store writer table"))?;
        Ok(Arc::clone(writers.entry(key.to_owned()).or_default()))
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Replace `dest` with `bytes` so that readers see either the old file or
/// the complete new one.
///
/// The bytes go to a hidden sibling `.<name>.<pid>.<n>.tmp`, are synced, then
/// renamed over `dest`. On failure the temporary file is removed and `dest`
/// is untouched.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::InvalidKey(dest.display().to_string()))?;
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = dest.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()));

    let written = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(&tmp)(err));
    }
    if let Err(err) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(dest)(err));
    }
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl ArtifactStore for FsStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&path)(err)),
        };
        let payload = open(key, &bytes)?;
        debug!(key, bytes = bytes.len(), "artifact loaded");
        Ok(Some(payload.to_vec()))
    }

    fn publish(&self, key: &str, payload: &[u8]) -> Result<ArtifactHash, StoreError> {
        validate_key(key)?;
        let (sealed, sum) = seal(key, payload)?;
        let lock = self.writer_lock(key)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::Poisoned("fs store key writer"))?;

        write_atomic(&self.path_for(key), &sealed)?;
        info!(key, bytes = sealed.len(), checksum = %sum, "artifact published");
        Ok(sum)
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self.path_for(key).is_file())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        let lock = self.writer_lock(key)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::Poisoned("fs store key writer"))?;
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(&path)(err)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(io_err(&self.root))?;
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err(&self.root))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
