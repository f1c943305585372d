//! Client-side cart consistency engine.
//!
//! - [`store::CartStore`] owns the cart and applies every change through the
//!   pure transition function in `cartsync-cart`.
//! - [`snapshot`] keeps a short-lived local copy of the anonymous cart.
//! - [`reconcile::Reconciler`] merges the anonymous cart into the account cart
//!   on login and clears it on logout.
//! - [`checkout::CheckoutOrchestrator`] drives validation, coupon pricing and
//!   the payment handoff.
//!
//! [`CartEngine`] wires all of them together.

pub mod backend;
pub mod checkout;
pub mod config;
mod engine;
pub mod reconcile;
pub mod snapshot;
pub mod store;

pub use backend::{BackendError, BackendResult, CartBackend, PricingBackend};
pub use checkout::{
    CheckoutError, CheckoutOrchestrator, CheckoutStep, CheckoutView, PaymentOutcome, SubmitRequest,
};
pub use config::EngineConfig;
pub use engine::CartEngine;
pub use reconcile::{AuthChange, MergeFailurePolicy, MergeReport, ReconcileOutcome, Reconciler};
pub use snapshot::{CartSnapshot, SnapshotStorage, SnapshotStore};
pub use store::{CartStore, Session};
