//! Cart reconciliation on authentication edges.
//!
//! On login (or session restore) the anonymous snapshot is merged into the
//! server cart one line at a time, in snapshot order, and then the server cart
//! is adopted as ground truth. On logout the local cart and its snapshot are
//! discarded so the next anonymous session starts empty.
//!
//! Reconciliation runs at most once per edge. A trigger that arrives while a
//! reconciliation is running is ignored, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cartsync_cart::{CartAction, CartItem, LineKey};
use cartsync_core::UserId;

use crate::backend::{BackendError, CartBackend};
use crate::store::{CartStore, Session};

/// Signal from the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChange {
    Authenticated(UserId),
    Anonymous,
}

/// What to do when the server refuses one snapshot line during login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeFailurePolicy {
    /// Log the line and move on.
    #[default]
    Drop,
    /// Retry transient failures up to `attempts` more times with exponential
    /// backoff, then drop.
    Retry { attempts: u32, backoff: Duration },
}

/// A snapshot line the server did not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFailure {
    pub line: LineKey,
    pub quantity: u32,
    pub error: BackendError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub user_id: UserId,
    pub merged: usize,
    pub dropped: Vec<MergeFailure>,
    /// Whether the final server fetch succeeded.
    pub hydrated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another reconciliation is still running.
    InFlight,
    /// Same authentication state as the last one handled.
    NoEdge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    /// First signal was anonymous: the local snapshot was restored.
    Restored,
    LoggedIn(MergeReport),
    LoggedOut,
}

/// Resets the in-flight flag when reconciliation ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Reconciler {
    store: Arc<CartStore>,
    backend: Arc<dyn CartBackend>,
    policy: MergeFailurePolicy,
    in_flight: AtomicBool,
    last_change: Mutex<Option<AuthChange>>,
}

impl core::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reconciler")
            .field("policy", &self.policy)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<CartStore>,
        backend: Arc<dyn CartBackend>,
        policy: MergeFailurePolicy,
    ) -> Self {
        Self {
            store,
            backend,
            policy,
            in_flight: AtomicBool::new(false),
            last_change: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Entry point for the authentication collaborator.
    pub async fn on_auth_changed(&self, change: AuthChange) -> ReconcileOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!(?change, "reconciliation already running; ignoring trigger");
            return ReconcileOutcome::Skipped(SkipReason::InFlight);
        }
        let _in_flight = InFlight(&self.in_flight);

        let previous = self.last_change.lock().map(|g| *g).unwrap_or(None);
        if previous == Some(change) {
            tracing::debug!(?change, "authentication state unchanged; nothing to reconcile");
            return ReconcileOutcome::Skipped(SkipReason::NoEdge);
        }

        let outcome = match change {
            AuthChange::Authenticated(user_id) => {
                if let Some(AuthChange::Authenticated(previous_user)) = previous {
                    // Another account's items must not show through if the
                    // server fetch below fails.
                    tracing::info!(%previous_user, %user_id, "account switched; discarding previous cart");
                    self.store.dispatch(CartAction::Clear).await;
                }
                ReconcileOutcome::LoggedIn(self.login(user_id).await)
            }
            AuthChange::Anonymous if previous.is_none() => {
                self.store.hydrate_local().await;
                ReconcileOutcome::Restored
            }
            AuthChange::Anonymous => {
                self.logout().await;
                ReconcileOutcome::LoggedOut
            }
        };

        if let Ok(mut last) = self.last_change.lock() {
            *last = Some(change);
        }

        outcome
    }

    async fn login(&self, user_id: UserId) -> MergeReport {
        tracing::info!(%user_id, "reconciling cart after login");

        // From here on mutations go to the server, not the snapshot.
        self.store.set_session(Session::Authenticated(user_id));
        self.store.dispatch(CartAction::SetLoading(true)).await;

        let pending = self
            .store
            .snapshots()
            .load()
            .await
            .map(|snapshot| snapshot.items)
            .unwrap_or_default();

        let mut merged = 0;
        let mut dropped = Vec::new();

        for item in pending {
            match self.merge_line(&item).await {
                Ok(()) => merged += 1,
                Err(error) => {
                    tracing::warn!(
                        line = %item.key(),
                        quantity = item.quantity,
                        "dropping cart line the server refused during login merge: {error}"
                    );
                    dropped.push(MergeFailure {
                        line: item.key(),
                        quantity: item.quantity,
                        error,
                    });
                }
            }
        }

        // The snapshot is consumed even if some lines were dropped.
        self.store.snapshots().clear().await;

        let hydrated = match self.store.fetch_server_cart().await {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(%user_id, "failed to load server cart after login: {err}");
                false
            }
        };

        tracing::info!(
            %user_id,
            merged,
            dropped = dropped.len(),
            hydrated,
            "login reconciliation finished"
        );

        MergeReport {
            user_id,
            merged,
            dropped,
            hydrated,
        }
    }

    async fn merge_line(&self, item: &CartItem) -> Result<(), BackendError> {
        let (max_retries, mut delay) = match self.policy {
            MergeFailurePolicy::Drop => (0, Duration::ZERO),
            MergeFailurePolicy::Retry { attempts, backoff } => (attempts, backoff),
        };

        let mut attempt = 0;
        loop {
            match self
                .backend
                .add_item(&item.product_id, item.quantity, &item.variant_selector)
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) if err.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        line = %item.key(),
                        attempt,
                        "merge failed: {err}, retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_backoff(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn logout(&self) {
        tracing::info!("discarding cart after logout");
        self.store.set_session(Session::Anonymous);
        self.store.dispatch(CartAction::Clear).await;
        self.store.snapshots().clear().await;
    }
}

fn next_backoff(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryCartBackend;
    use crate::snapshot::{CartSnapshot, SnapshotStore};
    use chrono::Utc;

    fn setup() -> (Arc<InMemoryCartBackend>, Arc<CartStore>, Reconciler) {
        let backend = Arc::new(
            InMemoryCartBackend::new()
                .with_product("a", 100, "Alpha")
                .with_product("b", 200, "Beta")
                .with_product("c", 300, "Gamma"),
        );
        let store = Arc::new(CartStore::new(SnapshotStore::in_memory(), backend.clone()));
        let reconciler = Reconciler::new(store.clone(), backend.clone(), MergeFailurePolicy::Drop);
        (backend, store, reconciler)
    }

    #[tokio::test]
    async fn first_anonymous_signal_restores_snapshot() {
        let (_, store, reconciler) = setup();
        store
            .snapshots()
            .save(&CartSnapshot {
                items: vec![CartItem::new("b", 1, 200)],
                item_count: 1,
                total: 200,
                saved_at: Utc::now(),
            })
            .await;

        let outcome = reconciler.on_auth_changed(AuthChange::Anonymous).await;

        assert_eq!(outcome, ReconcileOutcome::Restored);
        assert_eq!(store.state().item_count(), 1);
        assert_eq!(store.state().total(), 200);
    }

    #[tokio::test]
    async fn login_merges_snapshot_and_hydrates_from_server() {
        let (backend, store, reconciler) = setup();
        store.add_item(CartItem::new("a", 2, 100)).await.unwrap();
        store.add_item(CartItem::new("b", 1, 200)).await.unwrap();

        let user = UserId::new();
        let outcome = reconciler.on_auth_changed(AuthChange::Authenticated(user)).await;

        let report = match outcome {
            ReconcileOutcome::LoggedIn(report) => report,
            other => panic!("expected login outcome, got {other:?}"),
        };
        assert_eq!(report.merged, 2);
        assert!(report.dropped.is_empty());
        assert!(report.hydrated);
        assert_eq!(backend.items().len(), 2);
        assert_eq!(store.state().total(), 400);
        assert_eq!(store.session(), Session::Authenticated(user));
        assert!(store.snapshots().load().await.is_none());
    }

    #[tokio::test]
    async fn repeated_signal_for_same_state_is_ignored() {
        let (backend, store, reconciler) = setup();
        store.add_item(CartItem::new("a", 1, 100)).await.unwrap();
        let user = UserId::new();

        reconciler.on_auth_changed(AuthChange::Authenticated(user)).await;
        let second = reconciler.on_auth_changed(AuthChange::Authenticated(user)).await;

        assert_eq!(second, ReconcileOutcome::Skipped(SkipReason::NoEdge));
        assert_eq!(backend.add_calls(), 1);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(next_backoff(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(next_backoff(Duration::MAX), Duration::MAX);
    }

    #[tokio::test]
    async fn overlapping_triggers_merge_once() {
        let (backend, store, reconciler) = setup();
        store.add_item(CartItem::new("a", 1, 100)).await.unwrap();
        store.add_item(CartItem::new("b", 2, 200)).await.unwrap();
        let user = AuthChange::Authenticated(UserId::new());

        let (first, second) = tokio::join!(
            reconciler.on_auth_changed(user),
            reconciler.on_auth_changed(user),
        );

        assert!(matches!(first, ReconcileOutcome::LoggedIn(_)));
        assert_eq!(second, ReconcileOutcome::Skipped(SkipReason::InFlight));
        assert_eq!(backend.add_calls(), 2);
        assert_eq!(store.state().item_count(), 3);
        assert!(!reconciler.is_running());
    }

    #[tokio::test]
    async fn switching_accounts_drops_previous_users_items() {
        let (backend, store, reconciler) = setup();
        reconciler
            .on_auth_changed(AuthChange::Authenticated(UserId::new()))
            .await;
        store.add_item(CartItem::new("c", 1, 300)).await.unwrap();
        assert_eq!(store.state().item_count(), 1);
        backend.set_offline(true);

        let outcome = reconciler
            .on_auth_changed(AuthChange::Authenticated(UserId::new()))
            .await;

        let report = match outcome {
            ReconcileOutcome::LoggedIn(report) => report,
            other => panic!("expected login outcome, got {other:?}"),
        };
        assert!(!report.hydrated);
        assert!(store.state().is_empty());
    }

    #[tokio::test]
    async fn logout_clears_cart_and_snapshot() {
        let (_, store, reconciler) = setup();
        let user = UserId::new();
        reconciler.on_auth_changed(AuthChange::Authenticated(user)).await;
        store.add_item(CartItem::new("a", 1, 100)).await.unwrap();

        let outcome = reconciler.on_auth_changed(AuthChange::Anonymous).await;

        assert_eq!(outcome, ReconcileOutcome::LoggedOut);
        assert!(store.state().is_empty());
        assert_eq!(store.session(), Session::Anonymous);
        assert!(store.snapshots().load().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_policy_retries_transient_failures_then_drops() {
        let (backend, store, _) = setup();
        store.add_item(CartItem::new("a", 1, 100)).await.unwrap();
        backend.set_offline(true);

        let reconciler = Reconciler::new(
            store.clone(),
            backend.clone(),
            MergeFailurePolicy::Retry {
                attempts: 2,
                backoff: Duration::from_millis(100),
            },
        );

        let outcome = reconciler
            .on_auth_changed(AuthChange::Authenticated(UserId::new()))
            .await;

        let report = match outcome {
            ReconcileOutcome::LoggedIn(report) => report,
            other => panic!("expected login outcome, got {other:?}"),
        };
        assert_eq!(report.merged, 0);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].error, BackendError::Offline);
        assert!(!report.hydrated);
        assert!(store.snapshots().load().await.is_none());
        // last-known-good items survive the failed fetch
        assert_eq!(store.state().item_count(), 1);
    }
}
