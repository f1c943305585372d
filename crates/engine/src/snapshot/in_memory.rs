use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;

use super::{CartSnapshot, SnapshotStorage};

/// In-memory snapshot storage.
///
/// Intended for tests/dev; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStorage {
    records: RwLock<HashMap<String, CartSnapshot>>,
    fail_writes: AtomicBool,
}

impl InMemorySnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write` fail (simulates a full or locked disk).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl SnapshotStorage for InMemorySnapshotStorage {
    async fn read(&self, key: &str) -> anyhow::Result<Option<CartSnapshot>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("snapshot storage lock poisoned"))?;
        Ok(records.get(key).cloned())
    }

    async fn write(&self, key: &str, snapshot: &CartSnapshot) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("snapshot storage is not writable"));
        }
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("snapshot storage lock poisoned"))?;
        records.insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("snapshot storage lock poisoned"))?;
        records.remove(key);
        Ok(())
    }
}
