use std::sync::Arc;

use cartsync_cart::CartState;

use crate::backend::{CartBackend, PricingBackend};
use crate::checkout::CheckoutOrchestrator;
use crate::config::EngineConfig;
use crate::reconcile::{AuthChange, ReconcileOutcome, Reconciler};
use crate::snapshot::{SnapshotStorage, SnapshotStore};
use crate::store::CartStore;

/// The wired-up engine: one store, one reconciler and one checkout
/// orchestrator sharing the same cart.
#[derive(Debug, Clone)]
pub struct CartEngine {
    store: Arc<CartStore>,
    reconciler: Arc<Reconciler>,
    checkout: Arc<CheckoutOrchestrator>,
}

impl CartEngine {
    pub fn new(
        config: &EngineConfig,
        storage: Arc<dyn SnapshotStorage>,
        cart_backend: Arc<dyn CartBackend>,
        pricing_backend: Arc<dyn PricingBackend>,
    ) -> Self {
        let snapshots = SnapshotStore::new(storage, &config.snapshot_namespace, config.snapshot_ttl);
        let store = Arc::new(CartStore::new(snapshots, cart_backend.clone()));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            cart_backend.clone(),
            config.merge_policy,
        ));
        let checkout = Arc::new(CheckoutOrchestrator::new(
            store.clone(),
            cart_backend,
            pricing_backend,
            config.pricing.clone(),
        ));

        Self {
            store,
            reconciler,
            checkout,
        }
    }

    /// Build an engine against the HTTP services named in `config`.
    ///
    /// The snapshot lives in SQLite when `snapshot_db` is set, in memory otherwise.
    #[cfg(feature = "http")]
    pub async fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        use crate::backend::{HttpCartBackend, HttpPricingBackend};
        use crate::snapshot::{InMemorySnapshotStorage, SqliteSnapshotStorage};

        let storage: Arc<dyn SnapshotStorage> = match &config.snapshot_db {
            Some(path) => {
                tracing::info!(path = %path.display(), "using sqlite cart snapshot");
                Arc::new(SqliteSnapshotStorage::open(path).await?)
            }
            None => {
                tracing::info!("CART_SNAPSHOT_DB not set; cart snapshot is kept in memory");
                Arc::new(InMemorySnapshotStorage::new())
            }
        };

        let token = config.auth_token.clone();
        let cart_backend = Arc::new(HttpCartBackend::new(&config.api_url, token.clone()));
        let pricing_backend = Arc::new(HttpPricingBackend::new(&config.api_url, token));

        Ok(Self::new(config, storage, cart_backend, pricing_backend))
    }

    pub fn store(&self) -> &Arc<CartStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn checkout(&self) -> &Arc<CheckoutOrchestrator> {
        &self.checkout
    }

    pub fn state(&self) -> CartState {
        self.store.state()
    }

    pub async fn on_auth_changed(&self, change: AuthChange) -> ReconcileOutcome {
        self.reconciler.on_auth_changed(change).await
    }
}
