use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use cartsync_cart::{
    AppliedCoupon, CartAction, CartItem, CartState, CouponKind, CouponMetadata, PricingConfig,
    ProductId, ServerCart, VariantSelector, apply, compute_totals, subtotal,
};
use cartsync_core::OrderId;

use super::{
    BackendError, BackendResult, CartBackend, CheckoutRequest, CheckoutResponse, CouponRequest,
    CouponValidation, OrderSummary, PaymentHandoff, PricingBackend,
};

#[derive(Debug, Default)]
struct CartInner {
    cart: CartState,
    catalog: HashMap<ProductId, CatalogEntry>,
    rejected: HashSet<ProductId>,
    offline: bool,
    add_calls: usize,
    checkout_calls: usize,
    checkouts: Vec<CheckoutRequest>,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    unit_price: u64,
    display_name: String,
}

/// In-memory cart service.
///
/// Intended for tests/dev. Prices come from a small catalog so the server,
/// not the client, decides the unit price of each line.
#[derive(Debug, Default)]
pub struct InMemoryCartBackend {
    inner: Mutex<CartInner>,
    pricing: PricingConfig,
    coupons: Option<Arc<InMemoryPricingBackend>>,
}

impl InMemoryCartBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a product the backend will accept.
    pub fn with_product(self, product_id: impl Into<ProductId>, unit_price: u64, name: &str) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.catalog.insert(
                product_id.into(),
                CatalogEntry {
                    unit_price,
                    display_name: name.to_string(),
                },
            );
        }
        self
    }

    /// Honour the coupons of `coupons` when pricing an order at checkout.
    pub fn with_coupons(mut self, coupons: Arc<InMemoryPricingBackend>) -> Self {
        self.coupons = Some(coupons);
        self
    }

    /// Make every `add_item` for `product_id` fail with a 422.
    pub fn reject_product(&self, product_id: impl Into<ProductId>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.rejected.insert(product_id.into());
        }
    }

    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.offline = offline;
        }
    }

    pub fn items(&self) -> Vec<CartItem> {
        self.inner
            .lock()
            .map(|inner| inner.cart.items().to_vec())
            .unwrap_or_default()
    }

    pub fn add_calls(&self) -> usize {
        self.inner.lock().map(|inner| inner.add_calls).unwrap_or(0)
    }

    pub fn checkout_calls(&self) -> usize {
        self.inner.lock().map(|inner| inner.checkout_calls).unwrap_or(0)
    }

    pub fn last_checkout(&self) -> Option<CheckoutRequest> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.checkouts.last().cloned())
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut CartInner) -> BackendResult<T>) -> BackendResult<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| BackendError::Network("cart backend lock poisoned".to_string()))?;
        if inner.offline {
            return Err(BackendError::Offline);
        }
        f(&mut inner)
    }

    /// Re-check a coupon against the order being placed; the server never
    /// trusts a discount computed for an earlier cart.
    fn redeem(&self, code: &str, items: &[CartItem]) -> BackendResult<AppliedCoupon> {
        let validation = match &self.coupons {
            Some(coupons) => coupons.evaluate(code, subtotal(items)),
            None => CouponValidation::Rejected {
                reason: format!("coupon {code} does not exist"),
            },
        };
        match validation {
            CouponValidation::Accepted { discount, metadata } => Ok(AppliedCoupon {
                code: code.to_string(),
                discount,
                metadata,
            }),
            CouponValidation::Rejected { reason } => Err(BackendError::Api(422, reason)),
        }
    }
}

fn server_cart(inner: &CartInner) -> ServerCart {
    ServerCart::new(inner.cart.items().to_vec())
}

fn mutate(inner: &mut CartInner, action: CartAction) -> ServerCart {
    let current = std::mem::take(&mut inner.cart);
    inner.cart = apply(current, action);
    server_cart(inner)
}

#[async_trait::async_trait]
impl CartBackend for InMemoryCartBackend {
    async fn get_cart(&self) -> BackendResult<ServerCart> {
        self.with_inner(|inner| Ok(server_cart(inner)))
    }

    async fn add_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart> {
        tokio::task::yield_now().await;

        self.with_inner(|inner| {
            inner.add_calls += 1;
            if inner.rejected.contains(product_id) {
                return Err(BackendError::Api(422, format!("{product_id} is unavailable")));
            }
            if quantity == 0 {
                return Err(BackendError::Api(400, "quantity must be positive".to_string()));
            }
            let entry = inner
                .catalog
                .get(product_id)
                .cloned()
                .ok_or_else(|| BackendError::Api(404, format!("unknown product {product_id}")))?;

            let item = CartItem::new(product_id.clone(), quantity, entry.unit_price)
                .with_variant(variant_selector.clone())
                .with_display_name(entry.display_name);
            Ok(mutate(inner, CartAction::AddItem(item)))
        })
    }

    async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart> {
        self.with_inner(|inner| {
            if inner.cart.line(product_id, variant_selector).is_none() {
                return Err(BackendError::Api(404, "item not in cart".to_string()));
            }
            Ok(mutate(
                inner,
                CartAction::UpdateQuantity {
                    product_id: product_id.clone(),
                    variant_selector: variant_selector.clone(),
                    quantity: i64::from(quantity),
                },
            ))
        })
    }

    async fn remove_item(
        &self,
        product_id: &ProductId,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart> {
        self.with_inner(|inner| {
            Ok(mutate(
                inner,
                CartAction::RemoveItem {
                    product_id: product_id.clone(),
                    variant_selector: variant_selector.clone(),
                },
            ))
        })
    }

    async fn clear_cart(&self) -> BackendResult<()> {
        self.with_inner(|inner| {
            mutate(inner, CartAction::Clear);
            Ok(())
        })
    }

    async fn checkout(&self, request: &CheckoutRequest) -> BackendResult<CheckoutResponse> {
        self.with_inner(|inner| {
            inner.checkout_calls += 1;
            inner.checkouts.push(request.clone());
            Ok(())
        })?;

        // Order creation is a network round trip; give other tasks a chance to run.
        tokio::task::yield_now().await;

        if request.items.is_empty() {
            return Err(BackendError::Api(400, "cart is empty".to_string()));
        }

        let coupon = match &request.coupon_code {
            Some(code) => Some(self.redeem(code, &request.items)?),
            None => None,
        };

        let breakdown = compute_totals(&request.items, coupon.as_ref(), &self.pricing);
        let order_id = OrderId::new();
        let gateway_order_id = format!("gw_{}", order_id.as_uuid().simple());

        let mut launch_params = BTreeMap::new();
        launch_params.insert("orderId".to_string(), order_id.to_string());

        Ok(CheckoutResponse {
            order: OrderSummary {
                id: order_id,
                total: breakdown.total,
                currency: breakdown.currency.clone(),
            },
            payment_handoff: PaymentHandoff {
                gateway: "in-memory".to_string(),
                gateway_order_id,
                amount: breakdown.total,
                currency: breakdown.currency,
                launch_params,
            },
        })
    }
}

/// Coupon definition for [`InMemoryPricingBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponRule {
    pub kind: CouponKind,
    /// Flat amount, or percent for [`CouponKind::Percentage`].
    pub value: u64,
    pub min_order_amount: u64,
}

impl CouponRule {
    pub fn flat(amount: u64) -> Self {
        Self {
            kind: CouponKind::Flat,
            value: amount,
            min_order_amount: 0,
        }
    }

    pub fn percentage(percent: u64) -> Self {
        Self {
            kind: CouponKind::Percentage,
            value: percent,
            min_order_amount: 0,
        }
    }

    pub fn free_shipping() -> Self {
        Self {
            kind: CouponKind::FreeShipping,
            value: 0,
            min_order_amount: 0,
        }
    }

    pub fn with_min_order(mut self, amount: u64) -> Self {
        self.min_order_amount = amount;
        self
    }
}

/// In-memory coupon service keyed by upper-cased code.
#[derive(Debug, Default)]
pub struct InMemoryPricingBackend {
    coupons: HashMap<String, CouponRule>,
    calls: Mutex<usize>,
}

impl InMemoryPricingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coupon(mut self, code: &str, rule: CouponRule) -> Self {
        self.coupons.insert(code.to_uppercase(), rule);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }

    fn evaluate(&self, code: &str, order_amount: u64) -> CouponValidation {
        let code = code.trim().to_uppercase();
        let Some(rule) = self.coupons.get(&code) else {
            return CouponValidation::Rejected {
                reason: format!("coupon {code} does not exist"),
            };
        };

        if order_amount < rule.min_order_amount {
            return CouponValidation::Rejected {
                reason: format!(
                    "coupon {code} requires a minimum order of {}",
                    rule.min_order_amount
                ),
            };
        }

        let discount = match rule.kind {
            CouponKind::Flat => rule.value.min(order_amount),
            CouponKind::Percentage => order_amount.saturating_mul(rule.value) / 100,
            CouponKind::FreeShipping => 0,
        };

        CouponValidation::Accepted {
            discount,
            metadata: CouponMetadata {
                code,
                kind: rule.kind,
                description: None,
            },
        }
    }
}

#[async_trait::async_trait]
impl PricingBackend for InMemoryPricingBackend {
    async fn validate_coupon(&self, request: &CouponRequest) -> BackendResult<CouponValidation> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }

        tokio::task::yield_now().await;

        Ok(self.evaluate(&request.code, request.order_amount))
    }
}
