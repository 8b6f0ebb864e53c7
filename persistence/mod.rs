/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Key-value persistence for gallery settings.
//!
//! Everything the site remembers (the ad-link list, the active-index
//! selection, the rotation frequency, the image collection) is a small
//! string value under a well-known key. Backends implement [`KeyValueStore`]:
//! - [`RedbStore`]: the durable local store (one redb table on disk)
//! - [`MemoryStore`]: tests and last-resort fallback when the disk store
//!   cannot be opened
//! - [`RemoteStore`]: HTTP document-store client for the optional cloud
//!   mirror
//! - [`MirroredStore`]: local-first composition of a local store and a
//!   remote mirror, with writes replicated in the background

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use redb::{ReadableDatabase, ReadableTable};

const SETTINGS_TABLE: redb::TableDefinition<&str, &str> =
    redb::TableDefinition::new("settings");

/// Errors from a persistence backend.
///
/// Consumers treat any of these as "no data present" and fall back to
/// defaults; they are never fatal.
#[derive(Debug)]
pub enum StoreError {
    Io(String),
    Redb(String),
    Http(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {e}"),
            StoreError::Redb(e) => write!(f, "Redb error: {e}"),
            StoreError::Http(e) => write!(f, "HTTP error: {e}"),
        }
    }
}

/// String key-value storage contract shared by all backends.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete the value stored under `key`, if any.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub type KeyValueStoreRef = Arc<dyn KeyValueStore>;

/// In-memory backend. Used by tests and as the fallback when no durable
/// store can be opened.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Durable local backend: a single string table in one redb database.
pub struct RedbStore {
    db: redb::Database,
}

impl RedbStore {
    /// Open or create the settings database under the given directory.
    pub fn open(base_dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| StoreError::Io(format!("Failed to create dir: {e}")))?;

        let db_path = base_dir.join("settings.redb");
        let db = redb::Database::create(&db_path)
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        debug!("Opened settings store at {}", db_path.display());
        Ok(Self { db })
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        // A missing table means nothing was ever written.
        let Ok(table) = read_txn.open_table(SETTINGS_TABLE) else {
            return Ok(None);
        };
        let entry = table
            .get(key)
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        Ok(entry.map(|guard| guard.value().to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        {
            let mut table = write_txn
                .open_table(SETTINGS_TABLE)
                .map_err(|e| StoreError::Redb(format!("{e}")))?;
            table
                .insert(key, value)
                .map_err(|e| StoreError::Redb(format!("{e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        {
            let mut table = write_txn
                .open_table(SETTINGS_TABLE)
                .map_err(|e| StoreError::Redb(format!("{e}")))?;
            let _ = table
                .remove(key)
                .map_err(|e| StoreError::Redb(format!("{e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Redb(format!("{e}")))?;
        Ok(())
    }
}

/// Remote document-store client.
///
/// Speaks a minimal HTTP contract: `GET`/`PUT`/`DELETE {base}/kv/{key}`,
/// where 404 on read means absent. Every failure surfaces as
/// [`StoreError::Http`] and is absorbed by callers.
pub struct RemoteStore {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl RemoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Http(format!("{e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/kv/{key}", self.base_url)
    }
}

impl KeyValueStore for RemoteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let response = self
            .client
            .get(self.key_url(key))
            .send()
            .map_err(|e| StoreError::Http(format!("{e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Http(format!(
                "unexpected status {} reading '{key}'",
                response.status()
            )));
        }
        let body = response
            .text()
            .map_err(|e| StoreError::Http(format!("{e}")))?;
        Ok(Some(body))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.key_url(key))
            .body(value.to_string())
            .send()
            .map_err(|e| StoreError::Http(format!("{e}")))?;
        if !response.status().is_success() {
            return Err(StoreError::Http(format!(
                "unexpected status {} writing '{key}'",
                response.status()
            )));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.key_url(key))
            .send()
            .map_err(|e| StoreError::Http(format!("{e}")))?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::Http(format!(
                "unexpected status {} removing '{key}'",
                response.status()
            )));
        }
        Ok(())
    }
}

enum MirrorOp {
    Set(String, String),
    Remove(String),
    Flush(Sender<()>),
}

/// Local-first composition of a local store and a remote mirror.
///
/// Reads hit the local store; the mirror is consulted only when the local
/// read itself fails. Writes go through the local store and are then queued
/// to a background worker so a slow or dead mirror never blocks the caller.
pub struct MirroredStore {
    local: KeyValueStoreRef,
    remote: KeyValueStoreRef,
    mirror_tx: Sender<MirrorOp>,
}

impl MirroredStore {
    pub fn new(local: KeyValueStoreRef, remote: KeyValueStoreRef) -> Self {
        let (mirror_tx, mirror_rx) = crossbeam_channel::unbounded();
        let worker_remote = Arc::clone(&remote);
        let spawned = std::thread::Builder::new()
            .name("kv-mirror".to_string())
            .spawn(move || mirror_worker(mirror_rx, worker_remote));
        if let Err(e) = spawned {
            warn!("Failed to start mirror worker, remote mirroring disabled: {e}");
        }
        Self {
            local,
            remote,
            mirror_tx,
        }
    }

    /// One-shot cold-start sync: copy remote values for keys the local
    /// store does not have yet. Returns the number of keys copied.
    pub fn hydrate(&self, keys: &[&str]) -> usize {
        let mut copied = 0;
        for key in keys {
            match self.local.get(key) {
                Ok(Some(_)) => continue,
                Ok(None) => {},
                Err(e) => {
                    warn!("Skipping hydration of '{key}': local read failed: {e}");
                    continue;
                },
            }
            match self.remote.get(key) {
                Ok(Some(value)) => {
                    if let Err(e) = self.local.set(key, &value) {
                        warn!("Failed to hydrate '{key}' into local store: {e}");
                    } else {
                        copied += 1;
                    }
                },
                Ok(None) => {},
                Err(e) => {
                    // Mirror unreachable; no point probing the remaining keys.
                    warn!("Mirror unreachable during hydration: {e}");
                    break;
                },
            }
        }
        if copied > 0 {
            info!("Hydrated {copied} setting(s) from the remote mirror");
        }
        copied
    }

    /// Wait until all queued mirror writes have been applied.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.mirror_tx.send(MirrorOp::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }
}

impl KeyValueStore for MirroredStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.local.get(key) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Local read of '{key}' failed, trying mirror: {e}");
                self.remote.get(key)
            },
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.local.set(key, value)?;
        let _ = self
            .mirror_tx
            .send(MirrorOp::Set(key.to_string(), value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.local.remove(key)?;
        let _ = self.mirror_tx.send(MirrorOp::Remove(key.to_string()));
        Ok(())
    }
}

fn mirror_worker(mirror_rx: Receiver<MirrorOp>, remote: KeyValueStoreRef) {
    for op in mirror_rx {
        match op {
            MirrorOp::Set(key, value) => {
                if let Err(e) = remote.set(&key, &value) {
                    warn!("Mirror write of '{key}' failed: {e}");
                }
            },
            MirrorOp::Remove(key) => {
                if let Err(e) = remote.remove(&key) {
                    warn!("Mirror removal of '{key}' failed: {e}");
                }
            },
            MirrorOp::Flush(ack_tx) => {
                let _ = ack_tx.send(());
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Backend whose writes always fail; reads report absent.
    struct DeadStore;

    impl KeyValueStore for DeadStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Http("connection refused".to_string()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Http("connection refused".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Http("connection refused".to_string()))
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());
        store.set("ad_links", "[\"a\"]").unwrap();
        assert_eq!(store.get("ad_links").unwrap().as_deref(), Some("[\"a\"]"));
        store.remove("ad_links").unwrap();
        assert!(store.get("ad_links").unwrap().is_none());
    }

    #[test]
    fn test_redb_store_roundtrip_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RedbStore::open(dir.path().to_path_buf()).unwrap();
            assert!(store.get("ad_frequency").unwrap().is_none());
            store.set("ad_frequency", "30000").unwrap();
            assert_eq!(
                store.get("ad_frequency").unwrap().as_deref(),
                Some("30000")
            );
        }

        // Values survive reopening the database.
        let reopened = RedbStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            reopened.get("ad_frequency").unwrap().as_deref(),
            Some("30000")
        );
    }

    #[test]
    fn test_redb_store_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().to_path_buf()).unwrap();
        store.remove("never_written").unwrap();
        store.set("k", "v").unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_mirrored_store_replicates_writes() {
        let local: KeyValueStoreRef = Arc::new(MemoryStore::new());
        let remote: KeyValueStoreRef = Arc::new(MemoryStore::new());
        let mirrored = MirroredStore::new(Arc::clone(&local), Arc::clone(&remote));

        mirrored.set("ad_links", "[\"a\",\"b\"]").unwrap();
        assert!(mirrored.flush(Duration::from_secs(5)));

        assert_eq!(
            local.get("ad_links").unwrap().as_deref(),
            Some("[\"a\",\"b\"]")
        );
        assert_eq!(
            remote.get("ad_links").unwrap().as_deref(),
            Some("[\"a\",\"b\"]")
        );

        mirrored.remove("ad_links").unwrap();
        assert!(mirrored.flush(Duration::from_secs(5)));
        assert!(remote.get("ad_links").unwrap().is_none());
    }

    #[test]
    fn test_mirrored_store_survives_dead_mirror() {
        let local: KeyValueStoreRef = Arc::new(MemoryStore::new());
        let mirrored = MirroredStore::new(Arc::clone(&local), Arc::new(DeadStore));

        mirrored.set("active_ad_indices", "[0,1]").unwrap();
        assert!(mirrored.flush(Duration::from_secs(5)));
        assert_eq!(
            mirrored.get("active_ad_indices").unwrap().as_deref(),
            Some("[0,1]")
        );
    }

    #[test]
    fn test_hydrate_copies_only_absent_keys() {
        let local: KeyValueStoreRef = Arc::new(MemoryStore::new());
        let remote: KeyValueStoreRef = Arc::new(MemoryStore::new());
        local.set("ad_links", "local").unwrap();
        remote.set("ad_links", "remote").unwrap();
        remote.set("ad_frequency", "15000").unwrap();

        let mirrored = MirroredStore::new(Arc::clone(&local), Arc::clone(&remote));
        let copied = mirrored.hydrate(&["ad_links", "ad_frequency", "images"]);

        assert_eq!(copied, 1);
        // Present local values are never clobbered by the mirror.
        assert_eq!(local.get("ad_links").unwrap().as_deref(), Some("local"));
        assert_eq!(local.get("ad_frequency").unwrap().as_deref(), Some("15000"));
        assert!(local.get("images").unwrap().is_none());
    }

    #[test]
    fn test_hydrate_with_unreachable_mirror_is_a_no_op() {
        let local: KeyValueStoreRef = Arc::new(MemoryStore::new());
        let mirrored = MirroredStore::new(Arc::clone(&local), Arc::new(DeadStore));
        assert_eq!(mirrored.hydrate(&["ad_links", "images"]), 0);
        assert!(local.get("ad_links").unwrap().is_none());
    }
}
