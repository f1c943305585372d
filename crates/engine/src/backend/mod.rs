//! Contracts of the server-side collaborators the engine consumes.
//!
//! The engine never talks to a transport directly. It depends on these traits;
//! the in-memory implementations back tests and local development, the HTTP
//! implementations (feature `http`) talk to the real services.

#[cfg(feature = "http")]
mod http;
mod in_memory;

#[cfg(feature = "http")]
pub use http::{HttpCartBackend, HttpPricingBackend};
pub use in_memory::{CouponRule, InMemoryCartBackend, InMemoryPricingBackend};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cartsync_cart::{Address, CartItem, CouponMetadata, ProductId, ServerCart, VariantSelector};
use cartsync_core::OrderId;

/// Failure talking to a backend, already classified for the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend is unreachable")]
    Offline,
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    /// Whether retrying the same request may succeed (network trouble or 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Offline | BackendError::Network(_) => true,
            BackendError::Api(status, _) => *status >= 500,
            BackendError::Parse(_) | BackendError::Rejected(_) => false,
        }
    }

    /// Message stored in `CartState::last_error`.
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Offline | BackendError::Network(_) => {
                "could not reach the cart service; please retry".to_string()
            }
            BackendError::Api(status, _) if *status >= 500 => {
                "the cart service is unavailable; please retry".to_string()
            }
            BackendError::Api(_, body) if !body.trim().is_empty() => body.clone(),
            BackendError::Api(status, _) => format!("request failed ({status})"),
            BackendError::Parse(_) => "unexpected response from the cart service".to_string(),
            BackendError::Rejected(reason) => reason.clone(),
        }
    }
}

/// Payload of the backend checkout operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub coupon_code: Option<String>,
    pub items: Vec<CartItem>,
}

/// Order created by the backend at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: OrderId,
    pub total: u64,
    pub currency: String,
}

/// What the external payment flow needs to take over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHandoff {
    pub gateway: String,
    pub gateway_order_id: String,
    pub amount: u64,
    pub currency: String,
    /// Redirect/launch parameters passed through to the payment UI.
    #[serde(default)]
    pub launch_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order: OrderSummary,
    pub payment_handoff: PaymentHandoff,
}

/// Payload of coupon validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponRequest {
    pub code: String,
    pub order_amount: u64,
    pub items: Vec<CartItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponValidation {
    Accepted {
        discount: u64,
        metadata: CouponMetadata,
    },
    Rejected {
        reason: String,
    },
}

/// Server-authoritative cart.
///
/// Mutations merge by `(product_id, variant_selector)` the same way the local
/// state machine does, and return the resulting cart.
#[async_trait::async_trait]
pub trait CartBackend: Send + Sync {
    async fn get_cart(&self) -> BackendResult<ServerCart>;

    async fn add_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart>;

    async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart>;

    async fn remove_item(
        &self,
        product_id: &ProductId,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart>;

    async fn clear_cart(&self) -> BackendResult<()>;

    async fn checkout(&self, request: &CheckoutRequest) -> BackendResult<CheckoutResponse>;
}

/// Coupon service.
#[async_trait::async_trait]
pub trait PricingBackend: Send + Sync {
    async fn validate_coupon(&self, request: &CouponRequest) -> BackendResult<CouponValidation>;
}
