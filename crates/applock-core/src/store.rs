//! Key-value persistence seam.
//!
//! Everything the core persists (the security settings record, one record
//! per known application, the locker configuration) goes through a
//! [`RecordStore`]. Implementations must be safe to share across threads;
//! every call is expected to be durable by the time it returns.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{LockError, Result};

pub trait RecordStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Remove several keys. Stores that can persist a batch in one write
    /// should override this.
    fn delete_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()>;

    /// All entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

/// In-memory store. Not durable; used for tests and for embedding the core
/// where the host already owns persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail with [`LockError::Store`] until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check_readable(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LockError::Store("injected read failure".into()));
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_readable()?;
        Ok(self.records.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.records.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.records.write().remove(key);
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut guard = self.records.write();
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.check_readable()?;
        Ok(self
            .records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put("app.b", b"2").unwrap();
        store.put("app.a", b"1").unwrap();
        store.put("apps", b"x").unwrap();
        store.put("security.settings", b"{}").unwrap();

        let keys: Vec<String> = store
            .scan_prefix("app.")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["app.a".to_string(), "app.b".to_string()]);
    }

    #[test]
    fn injected_failure_only_affects_reads() {
        let store = MemoryStore::new();
        store.fail_reads(true);
        assert!(store.get("k").is_err());
        store.put("k", b"v").unwrap();
        store.fail_reads(false);
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
