//! The single owner of the live [`CartState`].
//!
//! `CartStore` wraps the pure transition function with the impure parts:
//!
//! - **Ordering**: dispatches are applied strictly in the order issued (a FIFO
//!   lock around apply + persist), each one numbered by a monotonic revision.
//! - **Persistence**: while the session is anonymous, every transition that can
//!   touch items is written to the local snapshot (best-effort).
//! - **Server-backed mutations**: while authenticated, mutations go to the cart
//!   backend and the returned cart is applied as `HydrateFromServer`. Backend
//!   failures become `SetError`, leaving the last-known-good items untouched.
//!
//! Readers get cloned snapshots (`state()`) or a `watch` subscription; nothing
//! outside this module can assign to the state directly.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::{Mutex, watch};

use cartsync_cart::{CartAction, CartItem, CartState, ProductId, ServerCart, VariantSelector, apply};
use cartsync_core::UserId;

use crate::backend::{BackendError, CartBackend};
use crate::snapshot::{CartSnapshot, SnapshotStore};

/// Who the cart currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Anonymous,
    Authenticated(UserId),
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }
}

pub struct CartStore {
    state: watch::Sender<CartState>,
    revision: AtomicU64,
    dispatch_lock: Mutex<()>,
    session: RwLock<Session>,
    snapshots: SnapshotStore,
    backend: Arc<dyn CartBackend>,
}

impl core::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CartStore")
            .field("revision", &self.revision())
            .field("session", &self.session())
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}

impl CartStore {
    /// Create a store holding an empty cart in an anonymous session.
    pub fn new(snapshots: SnapshotStore, backend: Arc<dyn CartBackend>) -> Self {
        let (state, _) = watch::channel(CartState::empty());
        Self {
            state,
            revision: AtomicU64::new(0),
            dispatch_lock: Mutex::new(()),
            session: RwLock::new(Session::Anonymous),
            snapshots,
            backend,
        }
    }

    /// Current cart (read-only copy).
    pub fn state(&self) -> CartState {
        self.state.borrow().clone()
    }

    /// Number of transitions applied so far.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Receive every new state as it is applied.
    pub fn subscribe(&self) -> watch::Receiver<CartState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Session {
        self.session
            .read()
            .map(|s| *s)
            .unwrap_or(Session::Anonymous)
    }

    pub(crate) fn set_session(&self, session: Session) {
        match self.session.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Apply one action and persist the result when anonymous.
    ///
    /// Returns the new state.
    pub async fn dispatch(&self, action: CartAction) -> CartState {
        let _ordered = self.dispatch_lock.lock().await;

        if let CartAction::HydrateFromServer(cart) = &action {
            if !cart.is_consistent() {
                tracing::warn!(
                    reported_count = cart.item_count,
                    reported_total = cart.total,
                    "server cart totals disagree with its items; recomputing"
                );
            }
        }

        let kind = action.kind();
        let persist = action.touches_items() && !self.session().is_authenticated();

        let next = apply(self.state(), action);
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(next.clone());

        tracing::debug!(
            action = kind,
            revision,
            item_count = next.item_count(),
            total = next.total(),
            "cart transition applied"
        );

        if persist {
            self.snapshots
                .save(&CartSnapshot::capture(&next, Utc::now()))
                .await;
        }

        next
    }

    /// Bootstrap an anonymous cart from the local snapshot, if one is fresh.
    pub async fn hydrate_local(&self) -> CartState {
        match self.snapshots.load().await {
            Some(snapshot) => {
                tracing::info!(lines = snapshot.items.len(), "restoring cart from local snapshot");
                self.dispatch(CartAction::HydrateFromLocal(snapshot.items)).await
            }
            None => self.state(),
        }
    }

    /// Replace the cart with the server's copy.
    ///
    /// On failure the cart keeps its items and moves to `Error`.
    pub async fn fetch_server_cart(&self) -> Result<CartState, BackendError> {
        self.remote("get_cart", self.backend.get_cart()).await
    }

    /// Explicit reload from whichever source is authoritative for the session.
    pub async fn reload(&self) -> Result<CartState, BackendError> {
        if self.session().is_authenticated() {
            self.fetch_server_cart().await
        } else {
            Ok(self.hydrate_local().await)
        }
    }

    pub async fn add_item(&self, item: CartItem) -> Result<CartState, BackendError> {
        if !self.session().is_authenticated() {
            return Ok(self.dispatch(CartAction::AddItem(item)).await);
        }
        self.remote(
            "add_item",
            self.backend
                .add_item(&item.product_id, item.quantity, &item.variant_selector),
        )
        .await
    }

    /// Set a line's quantity; `quantity <= 0` removes the line.
    pub async fn update_quantity(
        &self,
        product_id: ProductId,
        variant_selector: VariantSelector,
        quantity: i64,
    ) -> Result<CartState, BackendError> {
        if !self.session().is_authenticated() {
            return Ok(self
                .dispatch(CartAction::UpdateQuantity {
                    product_id,
                    variant_selector,
                    quantity,
                })
                .await);
        }

        if quantity <= 0 {
            return self.remove_item(product_id, variant_selector).await;
        }

        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        self.remote(
            "update_item",
            self.backend
                .update_item(&product_id, quantity, &variant_selector),
        )
        .await
    }

    pub async fn remove_item(
        &self,
        product_id: ProductId,
        variant_selector: VariantSelector,
    ) -> Result<CartState, BackendError> {
        if !self.session().is_authenticated() {
            return Ok(self
                .dispatch(CartAction::RemoveItem {
                    product_id,
                    variant_selector,
                })
                .await);
        }
        self.remote(
            "remove_item",
            self.backend.remove_item(&product_id, &variant_selector),
        )
        .await
    }

    /// Empty the cart (server copy too when authenticated).
    pub async fn clear(&self) -> Result<CartState, BackendError> {
        if self.session().is_authenticated() {
            self.dispatch(CartAction::SetLoading(true)).await;
            if let Err(err) = self.backend.clear_cart().await {
                tracing::warn!("clear_cart failed: {err}");
                self.dispatch(CartAction::SetError(err.user_message())).await;
                return Err(err);
            }
            self.dispatch(CartAction::SetLoading(false)).await;
        }
        Ok(self.dispatch(CartAction::Clear).await)
    }

    /// Run a server call bracketed by loading/error transitions.
    async fn remote<F>(&self, op: &'static str, call: F) -> Result<CartState, BackendError>
    where
        F: Future<Output = Result<ServerCart, BackendError>>,
    {
        self.dispatch(CartAction::SetLoading(true)).await;

        match call.await {
            Ok(cart) => Ok(self.dispatch(CartAction::HydrateFromServer(cart)).await),
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(op, "transient cart backend failure: {err}");
                } else {
                    tracing::error!(op, "cart backend failure: {err}");
                }
                self.dispatch(CartAction::SetError(err.user_message())).await;
                Err(err)
            }
        }
    }
}
