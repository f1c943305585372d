//! Cart domain module.
//!
//! This crate contains the cart state machine and checkout pricing, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).
//!
//! Every change to a [`CartState`] goes through [`apply`]; `item_count` and
//! `total` are recomputed from the item list at the end of every transition and
//! can never be set directly.

pub mod address;
pub mod item;
pub mod pricing;
pub mod state;

pub use address::Address;
pub use item::{CartItem, LineKey, ProductId, VariantSelector};
pub use pricing::{
    AppliedCoupon, CouponKind, CouponMetadata, PriceBreakdown, PricingConfig, compute_totals,
    subtotal,
};
pub use state::{CartAction, CartState, CartStatus, ServerCart, apply};
