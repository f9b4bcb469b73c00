//! Persistence layer.
//!
//! One pretty-printed JSON document per ledger, rewritten whole on every
//! save:
//!
//! ```text
//! <root>/<mode>/<variant>/<partition>.json
//! ```
//!
//! Every read-modify-write goes through `LedgerStore::lock`, which hands out
//! a `LockedLedger` holding an async mutex for that key. The guard is
//! released when the handle drops, on every exit path.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::types::{Ledger, LedgerError, LedgerKey, Mode, PartitionKey, Variant};

/// Default ledger directory.
pub const DEFAULT_DATA_DIR: &str = "ledgers";

/// File-backed ledger store with per-key mutual exclusion.
pub struct LedgerStore {
    root: PathBuf,
    locks: Mutex<HashMap<LedgerKey, Arc<AsyncMutex<()>>>>,
}

impl LedgerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document backing `key`.
    pub fn path_for(&self, key: &LedgerKey) -> Result<PathBuf, LedgerError> {
        key.partition.validate()?;
        Ok(self
            .root
            .join(key.mode.as_str())
            .join(key.variant.as_str())
            .join(format!("{}.json", key.partition.file_stem())))
    }

    /// Acquire exclusive access to one ledger. Waiting suspends the task
    /// without blocking other keys.
    pub async fn lock(&self, key: &LedgerKey) -> Result<LockedLedger, LedgerError> {
        let path = self.path_for(key)?;
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = mutex.lock_owned().await;
        Ok(LockedLedger {
            key: key.clone(),
            path,
            _guard: guard,
        })
    }

    /// Overwrite a ledger with a fresh empty one.
    pub async fn reset(&self, key: &LedgerKey) -> Result<(), LedgerError> {
        let handle = self.lock(key).await?;
        handle.save(&Ledger::default())?;
        info!(ledger = %key, "Ledger reset");
        Ok(())
    }

    /// Unlocked read for status display. May observe the state just before
    /// or just after a concurrent save, never a partial write.
    pub fn snapshot(&self, key: &LedgerKey) -> Result<Ledger, LedgerError> {
        read_ledger(&self.path_for(key)?)
    }

    /// Every persisted ledger under `mode`.
    pub fn keys(&self, mode: Mode) -> Result<Vec<LedgerKey>, LedgerError> {
        let mut keys = Vec::new();
        for variant in Variant::ALL {
            let dir = self.root.join(mode.as_str()).join(variant.as_str());
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(LedgerError::Storage { path: dir, source }),
            };
            for entry in entries {
                let entry = entry.map_err(|source| LedgerError::Storage {
                    path: dir.clone(),
                    source,
                })?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let partition = match stem.split_once('@') {
                    Some((ticket, loc)) => PartitionKey::with_location(ticket, loc),
                    None => PartitionKey::new(stem),
                };
                if partition.validate().is_ok() {
                    keys.push(LedgerKey::new(*variant, partition, mode));
                }
            }
        }
        keys.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        Ok(keys)
    }
}

/// Exclusive handle on one ledger document.
pub struct LockedLedger {
    key: LedgerKey,
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl LockedLedger {
    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    /// The persisted ledger, or an empty one if none exists yet.
    pub fn load(&self) -> Result<Ledger, LedgerError> {
        let ledger = read_ledger(&self.path)?;
        debug!(ledger = %self.key, records = ledger.history.len(), "Ledger loaded");
        Ok(ledger)
    }

    /// Durably replace the whole document.
    pub fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        write_ledger(&self.path, ledger)?;
        debug!(
            ledger = %self.key,
            records = ledger.history.len(),
            at_risk = %ledger.cumulative_stake(),
            "Ledger saved"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

fn read_ledger(path: &Path) -> Result<Ledger, LedgerError> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Ledger::default()),
        Err(source) => {
            return Err(LedgerError::Storage {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let ledger: Ledger = serde_json::from_str(&json).map_err(|source| LedgerError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    ledger.check_integrity()?;
    Ok(ledger)
}

fn write_ledger(path: &Path, ledger: &Ledger) -> Result<(), LedgerError> {
    let storage_err = |source| LedgerError::Storage {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(storage_err)?;
    }
    let json = serde_json::to_string_pretty(ledger).map_err(|source| LedgerError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    // write-then-rename so readers never see a half-written document; the
    // data is synced before the rename can be persisted
    let tmp = path.with_extension("json.tmp");
    let cleanup_and_err = |source: std::io::Error| {
        let _ = std::fs::remove_file(&tmp);
        storage_err(source)
    };
    let mut file = File::create(&tmp).map_err(storage_err)?;
    file.write_all(json.as_bytes()).map_err(cleanup_and_err)?;
    file.sync_all().map_err(cleanup_and_err)?;
    drop(file);
    std::fs::rename(&tmp, path).map_err(cleanup_and_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
