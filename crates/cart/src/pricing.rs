//! Checkout pricing: subtotal, shipping, tax and coupon discount.
//!
//! Amounts are whole currency units (`u64`). The tax rate is expressed in
//! basis points so the computation stays in integers; rounding is
//! round-half-up and happens exactly once, at the tax step.

use serde::{Deserialize, Serialize};

use crate::item::CartItem;

const BPS_DENOMINATOR: u128 = 10_000;

/// Store-wide pricing rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Subtotal at or above which shipping is free.
    pub free_shipping_threshold: u64,
    pub flat_shipping_fee: u64,
    /// Tax rate in basis points (1800 = 18%).
    pub tax_rate_bps: u32,
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: 500,
            flat_shipping_fee: 50,
            tax_rate_bps: 1_800,
            currency: "INR".to_string(),
        }
    }
}

/// How a coupon affects the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponKind {
    Flat,
    Percentage,
    FreeShipping,
}

/// Advisory description of an accepted coupon, as reported by the pricing backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponMetadata {
    pub code: String,
    pub kind: CouponKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A coupon accepted by the pricing backend for the current cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub code: String,
    /// Discount amount computed by the pricing backend.
    pub discount: u64,
    pub metadata: CouponMetadata,
}

impl AppliedCoupon {
    pub fn waives_shipping(&self) -> bool {
        self.metadata.kind == CouponKind::FreeShipping
    }
}

/// Result of [`compute_totals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub subtotal: u64,
    pub shipping: u64,
    pub tax: u64,
    pub discount: u64,
    pub total: u64,
    pub currency: String,
}

/// `Σ(unit_price × quantity)`.
pub fn subtotal(items: &[CartItem]) -> u64 {
    items
        .iter()
        .fold(0u64, |acc, item| acc.saturating_add(item.line_total()))
}

/// Deterministic payable total for a cart.
///
/// `total = max(0, subtotal + shipping + tax - discount)`.
pub fn compute_totals(
    items: &[CartItem],
    coupon: Option<&AppliedCoupon>,
    config: &PricingConfig,
) -> PriceBreakdown {
    let subtotal = subtotal(items);

    let shipping = if subtotal == 0
        || subtotal >= config.free_shipping_threshold
        || coupon.is_some_and(AppliedCoupon::waives_shipping)
    {
        0
    } else {
        config.flat_shipping_fee
    };

    let tax = round_half_up_bps(subtotal, config.tax_rate_bps);
    let discount = coupon.map(|c| c.discount).unwrap_or(0);

    let total = subtotal
        .saturating_add(shipping)
        .saturating_add(tax)
        .saturating_sub(discount);

    PriceBreakdown {
        subtotal,
        shipping,
        tax,
        discount,
        total,
        currency: config.currency.clone(),
    }
}

fn round_half_up_bps(amount: u64, bps: u32) -> u64 {
    let scaled = u128::from(amount) * u128::from(bps);
    let rounded = (scaled + BPS_DENOMINATOR / 2) / BPS_DENOMINATOR;
    u64::try_from(rounded).unwrap_or(u64::MAX)
}
