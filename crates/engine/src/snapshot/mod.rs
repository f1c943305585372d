//! Local snapshot of the anonymous cart.
//!
//! The snapshot is a single namespaced record holding the last known cart and
//! the time it was saved. It carries no business logic:
//!
//! - `save` is best-effort. Failures are logged and swallowed, the in-memory
//!   cart stays correct for the current session either way.
//! - `load` treats records older than the staleness horizon as absent. Expiry
//!   is evaluated at load time; stale records are not purged proactively.
//! - Storage backends are pluggable through [`SnapshotStorage`].

mod in_memory;
mod sqlite;

pub use in_memory::InMemorySnapshotStorage;
pub use sqlite::SqliteSnapshotStorage;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cartsync_cart::{CartItem, CartState};

/// Persisted form of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub items: Vec<CartItem>,
    pub item_count: u64,
    pub total: u64,
    pub saved_at: DateTime<Utc>,
}

impl CartSnapshot {
    pub fn capture(state: &CartState, saved_at: DateTime<Utc>) -> Self {
        Self {
            items: state.items().to_vec(),
            item_count: state.item_count(),
            total: state.total(),
            saved_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.saved_at) > ttl
    }
}

/// Raw key-value persistence for snapshots.
#[async_trait::async_trait]
pub trait SnapshotStorage: Send + Sync {
    async fn read(&self, key: &str) -> anyhow::Result<Option<CartSnapshot>>;

    async fn write(&self, key: &str, snapshot: &CartSnapshot) -> anyhow::Result<()>;

    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Namespaced, expiring snapshot record for the logged-out cart.
///
/// All anonymous sessions share one slot (`{namespace}:guest`).
#[derive(Clone)]
pub struct SnapshotStore {
    storage: Arc<dyn SnapshotStorage>,
    key: String,
    ttl: chrono::Duration,
}

impl core::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SnapshotStore {
    pub fn new(storage: Arc<dyn SnapshotStorage>, namespace: &str, ttl: chrono::Duration) -> Self {
        Self {
            storage,
            key: format!("{namespace}:guest"),
            ttl,
        }
    }

    /// Store backed by process memory with the default 7 day horizon.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemorySnapshotStorage::new()),
            "cart",
            chrono::Duration::days(7),
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub async fn save(&self, snapshot: &CartSnapshot) {
        if let Err(err) = self.storage.write(&self.key, snapshot).await {
            tracing::warn!(key = %self.key, "failed to persist cart snapshot: {err:#}");
        }
    }

    pub async fn load(&self) -> Option<CartSnapshot> {
        self.load_at(Utc::now()).await
    }

    /// `load` evaluated against an explicit clock reading.
    pub async fn load_at(&self, now: DateTime<Utc>) -> Option<CartSnapshot> {
        let snapshot = match self.storage.read(&self.key).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key = %self.key, "failed to read cart snapshot: {err:#}");
                return None;
            }
        };

        if snapshot.is_expired(now, self.ttl) {
            tracing::debug!(
                key = %self.key,
                saved_at = %snapshot.saved_at,
                "ignoring expired cart snapshot"
            );
            return None;
        }

        Some(snapshot)
    }

    pub async fn clear(&self) {
        if let Err(err) = self.storage.remove(&self.key).await {
            tracing::warn!(key = %self.key, "failed to clear cart snapshot: {err:#}");
        }
    }
}
