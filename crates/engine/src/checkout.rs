//! Checkout orchestration.
//!
//! ```text
//! Idle -> Validating -> PricingApplied -> Submitting -> HandedOff
//!   \________\_____________\______________> Error
//! ```
//!
//! The orchestrator reads the cart through [`CartStore`] snapshots and never
//! edits it, except for clearing it once the payment collaborator reports a
//! successful payment through [`CheckoutOrchestrator::complete_payment`].
//!
//! Pricing is tied to the items it was computed from. A coupon priced for an
//! earlier cart is ignored by [`CheckoutOrchestrator::quote`], and submitting a
//! cart that changed since it was priced sends the shopper back to
//! `Validating` instead of creating an order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use cartsync_cart::{
    Address, AppliedCoupon, CartAction, CartItem, CartState, PriceBreakdown, PricingConfig,
    compute_totals, subtotal,
};

use crate::backend::{
    BackendError, CartBackend, CheckoutRequest, CheckoutResponse, CouponRequest, CouponValidation,
    PricingBackend,
};
use crate::store::CartStore;

const INVALID_CART: &str = "cart is invalid";
const CART_CHANGED: &str = "your cart changed; review the new total before paying";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    #[default]
    Idle,
    Validating,
    PricingApplied,
    Submitting,
    HandedOff,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("cart is invalid: {0}")]
    InvalidCart(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("coupon rejected: {0}")]
    CouponRejected(String),
    #[error("cart changed since it was priced")]
    CartChanged,
    #[error("checkout is already being submitted")]
    AlreadySubmitting,
    #[error("cannot {action} while checkout is {step:?}")]
    InvalidStep {
        action: &'static str,
        step: CheckoutStep,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What the payment collaborator reports back after the handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded { payment_reference: String },
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
}

/// Read-only view of the orchestrator for the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    pub step: CheckoutStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<AppliedCoupon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<CheckoutResponse>,
    /// Cart revision the current submission/handoff was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_revision: Option<u64>,
}

#[derive(Debug, Default)]
struct Flow {
    view: CheckoutView,
    /// Bumped on validate, submit and reset; a coupon reply carrying an older
    /// generation is discarded.
    generation: u64,
    /// Items the current validation or coupon was priced against.
    priced_items: Option<Vec<CartItem>>,
}

impl Flow {
    fn is_priced_for(&self, items: &[CartItem]) -> bool {
        self.priced_items.as_deref() == Some(items)
    }

    fn restart(&mut self) {
        let generation = self.generation + 1;
        *self = Flow {
            generation,
            ..Flow::default()
        };
    }
}

/// Resets the submission flag when `submit` returns.
struct Submission<'a>(&'a AtomicBool);

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CheckoutOrchestrator {
    store: Arc<CartStore>,
    cart_backend: Arc<dyn CartBackend>,
    pricing_backend: Arc<dyn PricingBackend>,
    config: PricingConfig,
    flow: Mutex<Flow>,
    submitting: AtomicBool,
}

impl core::fmt::Debug for CheckoutOrchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CheckoutOrchestrator")
            .field("view", &self.view())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CheckoutOrchestrator {
    pub fn new(
        store: Arc<CartStore>,
        cart_backend: Arc<dyn CartBackend>,
        pricing_backend: Arc<dyn PricingBackend>,
        config: PricingConfig,
    ) -> Self {
        Self {
            store,
            cart_backend,
            pricing_backend,
            config,
            flow: Mutex::new(Flow::default()),
            submitting: AtomicBool::new(false),
        }
    }

    pub fn view(&self) -> CheckoutView {
        self.lock().view.clone()
    }

    pub fn step(&self) -> CheckoutStep {
        self.lock().view.step
    }

    /// Totals for the current cart.
    ///
    /// The applied coupon only counts while the cart still holds the items it
    /// was priced for.
    pub fn quote(&self) -> PriceBreakdown {
        let cart = self.store.state();
        let flow = self.lock();
        let coupon = flow
            .view
            .coupon
            .as_ref()
            .filter(|_| flow.is_priced_for(cart.items()));
        compute_totals(cart.items(), coupon, &self.config)
    }

    /// Check the cart is ready for checkout and enter `Validating`.
    ///
    /// A previously applied coupon is dropped; it was priced against the cart
    /// as it was then.
    pub fn validate(&self) -> Result<(), CheckoutError> {
        let mut flow = self.lock();
        match flow.view.step {
            CheckoutStep::Submitting | CheckoutStep::HandedOff => {
                return Err(CheckoutError::InvalidStep {
                    action: "validate",
                    step: flow.view.step,
                });
            }
            _ => {}
        }

        let cart = self.store.state();
        flow.restart();

        if let Err(err) = check_cart(&cart) {
            tracing::info!("checkout validation failed: {err}");
            enter(&mut flow.view, CheckoutStep::Error);
            flow.view.error = Some(INVALID_CART.to_string());
            return Err(err);
        }

        enter(&mut flow.view, CheckoutStep::Validating);
        flow.priced_items = Some(cart.items().to_vec());
        Ok(())
    }

    /// Ask the pricing backend to accept `code` for the current cart.
    ///
    /// The reply is discarded if, while it was pending, a submission started,
    /// the flow was reset or re-validated, or the cart changed.
    pub async fn apply_coupon(&self, code: &str) -> Result<AppliedCoupon, CheckoutError> {
        if self.submitting.load(Ordering::SeqCst) {
            return Err(CheckoutError::AlreadySubmitting);
        }

        let generation = {
            let flow = self.lock();
            if !accepts_pricing(flow.view.step) {
                return Err(CheckoutError::InvalidStep {
                    action: "apply a coupon",
                    step: flow.view.step,
                });
            }
            flow.generation
        };

        let code = code.trim();
        if code.is_empty() {
            let reason = "enter a coupon code".to_string();
            self.lock().view.error = Some(reason.clone());
            return Err(CheckoutError::CouponRejected(reason));
        }

        let cart = self.store.state();
        if let Err(err) = check_cart(&cart) {
            let mut flow = self.lock();
            enter(&mut flow.view, CheckoutStep::Error);
            flow.view.error = Some(INVALID_CART.to_string());
            flow.view.coupon = None;
            return Err(err);
        }

        let request = CouponRequest {
            code: code.to_string(),
            order_amount: subtotal(cart.items()),
            items: cart.items().to_vec(),
        };

        let result = self.pricing_backend.validate_coupon(&request).await;

        let mut flow = self.lock();
        if flow.generation != generation
            || !accepts_pricing(flow.view.step)
            || self.submitting.load(Ordering::SeqCst)
        {
            tracing::info!(code, step = ?flow.view.step, "discarding coupon reply for a superseded checkout");
            return Err(CheckoutError::InvalidStep {
                action: "apply a coupon",
                step: flow.view.step,
            });
        }
        if self.store.state().items() != cart.items() {
            tracing::info!(code, "discarding coupon reply priced for an earlier cart");
            flow.view.error = Some(CART_CHANGED.to_string());
            return Err(CheckoutError::CartChanged);
        }

        match result {
            Ok(CouponValidation::Accepted { discount, metadata }) => {
                let coupon = AppliedCoupon {
                    code: code.to_string(),
                    discount,
                    metadata,
                };
                tracing::info!(code, discount, "coupon applied");
                enter(&mut flow.view, CheckoutStep::PricingApplied);
                flow.view.error = None;
                flow.view.coupon = Some(coupon.clone());
                flow.priced_items = Some(request.items);
                Ok(coupon)
            }
            Ok(CouponValidation::Rejected { reason }) => {
                tracing::info!(code, "coupon rejected: {reason}");
                enter(&mut flow.view, CheckoutStep::Validating);
                flow.view.coupon = None;
                flow.view.error = Some(reason.clone());
                Err(CheckoutError::CouponRejected(reason))
            }
            Err(err) => {
                tracing::warn!(code, "coupon validation failed: {err}");
                flow.view.error = Some(err.user_message());
                Err(CheckoutError::Backend(err))
            }
        }
    }

    /// Drop the applied coupon and go back to `Validating`.
    pub fn remove_coupon(&self) -> Result<(), CheckoutError> {
        let mut flow = self.lock();
        if flow.view.step != CheckoutStep::PricingApplied {
            return Err(CheckoutError::InvalidStep {
                action: "remove the coupon",
                step: flow.view.step,
            });
        }
        flow.view.coupon = None;
        flow.view.error = None;
        enter(&mut flow.view, CheckoutStep::Validating);
        Ok(())
    }

    /// Create the order and hand off to the payment flow.
    ///
    /// A second call while one is in flight fails immediately with
    /// [`CheckoutError::AlreadySubmitting`] and makes no backend call. A cart
    /// that changed since it was priced is not submitted: the flow returns to
    /// `Validating` with [`CheckoutError::CartChanged`] and the coupon dropped.
    /// The cart is left as is; it is cleared only by [`Self::complete_payment`].
    pub async fn submit(&self, request: SubmitRequest) -> Result<CheckoutResponse, CheckoutError> {
        if self
            .submitting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("checkout submit ignored: a submission is already in flight");
            return Err(CheckoutError::AlreadySubmitting);
        }
        let _submission = Submission(&self.submitting);

        let cart = self.store.state();
        let revision = self.store.revision();

        let checkout_request = {
            let mut flow = self.lock();
            if !accepts_pricing(flow.view.step) {
                return Err(CheckoutError::InvalidStep {
                    action: "submit",
                    step: flow.view.step,
                });
            }

            if let Err(err) = check_cart(&cart) {
                enter(&mut flow.view, CheckoutStep::Error);
                flow.view.error = Some(INVALID_CART.to_string());
                return Err(err);
            }

            if !flow.is_priced_for(cart.items()) {
                tracing::info!(
                    revision,
                    had_coupon = flow.view.coupon.is_some(),
                    "cart changed since it was priced; returning to validation"
                );
                flow.generation += 1;
                flow.priced_items = Some(cart.items().to_vec());
                flow.view.coupon = None;
                flow.view.error = Some(CART_CHANGED.to_string());
                enter(&mut flow.view, CheckoutStep::Validating);
                return Err(CheckoutError::CartChanged);
            }

            let addresses = request.shipping_address.validate().and_then(|_| {
                request
                    .billing_address
                    .as_ref()
                    .map(Address::validate)
                    .unwrap_or(Ok(()))
            });
            if let Err(err) = addresses {
                let message = err.user_message();
                flow.view.error = Some(message.clone());
                return Err(CheckoutError::InvalidAddress(message));
            }

            flow.generation += 1;
            enter(&mut flow.view, CheckoutStep::Submitting);
            flow.view.error = None;
            flow.view.submitted_revision = Some(revision);

            CheckoutRequest {
                shipping_address: request.shipping_address,
                billing_address: request.billing_address,
                coupon_code: flow.view.coupon.as_ref().map(|c| c.code.clone()),
                items: cart.items().to_vec(),
            }
        };

        let result = self.cart_backend.checkout(&checkout_request).await;

        let mut flow = self.lock();
        match result {
            Ok(response) => {
                tracing::info!(
                    order_id = %response.order.id,
                    gateway = %response.payment_handoff.gateway,
                    amount = response.payment_handoff.amount,
                    revision,
                    "order created; handing off to payment"
                );
                enter(&mut flow.view, CheckoutStep::HandedOff);
                flow.view.handoff = Some(response.clone());
                Ok(response)
            }
            Err(err) => {
                tracing::error!(revision, "checkout submission failed: {err}");
                enter(&mut flow.view, CheckoutStep::Error);
                flow.view.error = Some(err.user_message());
                Err(CheckoutError::Backend(err))
            }
        }
    }

    /// Completion signal from the payment collaborator.
    ///
    /// Only a successful payment clears the cart; failures leave it intact so
    /// the shopper can retry.
    pub async fn complete_payment(&self, outcome: PaymentOutcome) -> Result<(), CheckoutError> {
        {
            let flow = self.lock();
            if flow.view.step != CheckoutStep::HandedOff {
                return Err(CheckoutError::InvalidStep {
                    action: "complete payment",
                    step: flow.view.step,
                });
            }
        }

        match outcome {
            PaymentOutcome::Succeeded { payment_reference } => {
                tracing::info!(%payment_reference, "payment completed; clearing cart");
                if let Err(err) = self.store.clear().await {
                    // The order is paid; the visible cart must not linger.
                    tracing::warn!("server cart clear failed after payment: {err}");
                    self.store.dispatch(CartAction::Clear).await;
                    self.store.dispatch(CartAction::ClearError).await;
                }
                self.lock().restart();
            }
            PaymentOutcome::Failed { reason } => {
                tracing::warn!("payment failed: {reason}");
                let mut flow = self.lock();
                enter(&mut flow.view, CheckoutStep::Error);
                flow.view.error = Some(reason);
            }
            PaymentOutcome::Cancelled => {
                tracing::info!("payment cancelled by shopper");
                let mut flow = self.lock();
                enter(&mut flow.view, CheckoutStep::Error);
                flow.view.error = Some("payment was cancelled".to_string());
            }
        }
        Ok(())
    }

    /// Abandon checkout and return to `Idle`.
    pub fn reset(&self) -> Result<(), CheckoutError> {
        let mut flow = self.lock();
        if flow.view.step == CheckoutStep::Submitting {
            return Err(CheckoutError::InvalidStep {
                action: "reset",
                step: flow.view.step,
            });
        }
        flow.restart();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Flow> {
        self.flow.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn accepts_pricing(step: CheckoutStep) -> bool {
    matches!(step, CheckoutStep::Validating | CheckoutStep::PricingApplied)
}

fn enter(view: &mut CheckoutView, step: CheckoutStep) {
    if view.step != step {
        tracing::debug!(from = ?view.step, to = ?step, "checkout step");
    }
    view.step = step;
}

/// Non-empty, and every line has a product and a positive quantity.
fn check_cart(cart: &CartState) -> Result<(), CheckoutError> {
    if cart.is_empty() {
        return Err(CheckoutError::InvalidCart("cart is empty".to_string()));
    }
    if let Some(line) = cart
        .items()
        .iter()
        .find(|item| item.product_id.is_blank() || item.quantity == 0)
    {
        return Err(CheckoutError::InvalidCart(format!(
            "line {:?} is incomplete",
            line.display_name
        )));
    }
    Ok(())
}
