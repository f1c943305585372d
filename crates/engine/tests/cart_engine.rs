use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use cartsync_cart::{Address, CartAction, CartItem, CartStatus, ProductId, VariantSelector};
use cartsync_core::UserId;
use cartsync_engine::backend::{CouponRule, InMemoryCartBackend, InMemoryPricingBackend};
use cartsync_engine::snapshot::InMemorySnapshotStorage;
use cartsync_engine::{
    AuthChange, CartEngine, CartSnapshot, CheckoutError, CheckoutStep, EngineConfig,
    PaymentOutcome, ReconcileOutcome, SubmitRequest,
};

struct TestEngine {
    engine: CartEngine,
    backend: Arc<InMemoryCartBackend>,
    storage: Arc<InMemorySnapshotStorage>,
}

impl TestEngine {
    fn new() -> Self {
        cartsync_observability::init_for_tests();

        let pricing = Arc::new(InMemoryPricingBackend::new().with_coupon("FLAT50", CouponRule::flat(50)));
        let backend = Arc::new(
            InMemoryCartBackend::new()
                .with_product("shirt", 200, "Linen shirt")
                .with_product("scarf", 150, "Silk scarf")
                .with_product("socks", 50, "Wool socks")
                .with_product("kurta", 300, "Cotton kurta")
                .with_coupons(pricing.clone()),
        );
        let storage = Arc::new(InMemorySnapshotStorage::new());

        let engine = CartEngine::new(
            &EngineConfig::default(),
            storage.clone(),
            backend.clone(),
            pricing,
        );

        Self {
            engine,
            backend,
            storage,
        }
    }
}

fn address() -> Address {
    Address {
        full_name: "Meera Iyer".into(),
        line1: "4 Lake View".into(),
        line2: Some("Flat 2B".into()),
        city: "Chennai".into(),
        region: Some("TN".into()),
        postal_code: "600001".into(),
        country: "IN".into(),
        phone: "9884000000".into(),
    }
}

fn submit_request() -> SubmitRequest {
    SubmitRequest {
        shipping_address: address(),
        billing_address: None,
    }
}

#[tokio::test]
async fn invariant_holds_after_every_transition() {
    let t = TestEngine::new();
    let store = t.engine.store();
    let mut updates = store.subscribe();

    let actions = vec![
        CartAction::AddItem(CartItem::new("shirt", 2, 200)),
        CartAction::AddItem(CartItem::new("socks", 3, 50)),
        CartAction::SetLoading(true),
        CartAction::UpdateQuantity {
            product_id: ProductId::new("shirt"),
            variant_selector: VariantSelector::new(),
            quantity: 5,
        },
        CartAction::SetError("offline".into()),
        CartAction::RemoveItem {
            product_id: ProductId::new("socks"),
            variant_selector: VariantSelector::new(),
        },
        CartAction::HydrateFromLocal(vec![CartItem::new("scarf", 1, 150)]),
        CartAction::Clear,
    ];

    for action in actions {
        let state = store.dispatch(action).await;
        assert!(state.is_consistent(), "inconsistent state: {state:?}");
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), state);
    }
    assert_eq!(store.revision(), 8);
}

#[tokio::test]
async fn adding_same_line_twice_merges_quantities() {
    let t = TestEngine::new();
    let store = t.engine.store();

    store.add_item(CartItem::new("shirt", 1, 200)).await.unwrap();
    let state = store.add_item(CartItem::new("shirt", 1, 200)).await.unwrap();

    assert_eq!(state.items().len(), 1);
    assert_eq!(state.items()[0].quantity, 2);
    assert_eq!(state.total(), 400);
}

#[tokio::test]
async fn removing_missing_line_is_a_no_op() {
    let t = TestEngine::new();
    let store = t.engine.store();
    let before = store.add_item(CartItem::new("shirt", 1, 200)).await.unwrap();

    let after = store
        .remove_item(ProductId::new("scarf"), VariantSelector::new())
        .await
        .unwrap();

    assert_eq!(after, before);
}

#[tokio::test]
async fn hydrate_replaces_instead_of_merging() {
    let t = TestEngine::new();
    let store = t.engine.store();
    store.add_item(CartItem::new("shirt", 4, 200)).await.unwrap();

    let state = store
        .dispatch(CartAction::HydrateFromLocal(vec![CartItem::new("socks", 1, 50)]))
        .await;

    assert_eq!(state.items().len(), 1);
    assert_eq!(state.items()[0].product_id, ProductId::new("socks"));
    assert_eq!(state.item_count(), 1);
    assert_eq!(state.total(), 50);
}

#[tokio::test]
async fn anonymous_cart_survives_restart_through_snapshot() {
    let t = TestEngine::new();
    t.engine
        .store()
        .add_item(CartItem::new("scarf", 2, 150))
        .await
        .unwrap();

    // Same storage, fresh engine.
    let restarted = CartEngine::new(
        &EngineConfig::default(),
        t.storage.clone(),
        t.backend.clone(),
        Arc::new(InMemoryPricingBackend::new()),
    );
    let outcome = restarted.on_auth_changed(AuthChange::Anonymous).await;

    assert_eq!(outcome, ReconcileOutcome::Restored);
    assert_eq!(restarted.state().item_count(), 2);
    assert_eq!(restarted.state().total(), 300);
}

#[tokio::test]
async fn snapshot_older_than_seven_days_is_ignored() {
    let t = TestEngine::new();
    let snapshots = t.engine.store().snapshots();
    snapshots
        .save(&CartSnapshot {
            items: vec![CartItem::new("shirt", 1, 200)],
            item_count: 1,
            total: 200,
            saved_at: Utc::now() - ChronoDuration::days(8),
        })
        .await;

    assert!(snapshots.load().await.is_none());

    t.engine.on_auth_changed(AuthChange::Anonymous).await;
    assert!(t.engine.state().is_empty());
}

#[tokio::test]
async fn login_merge_drops_rejected_line_and_clears_snapshot() {
    let t = TestEngine::new();
    let store = t.engine.store();
    store.add_item(CartItem::new("shirt", 1, 200)).await.unwrap();
    store.add_item(CartItem::new("scarf", 1, 150)).await.unwrap();
    store.add_item(CartItem::new("socks", 2, 50)).await.unwrap();
    t.backend.reject_product("scarf");

    let user_id = UserId::new();
    let outcome = t.engine.on_auth_changed(AuthChange::Authenticated(user_id)).await;

    let report = match outcome {
        ReconcileOutcome::LoggedIn(report) => report,
        other => panic!("expected a login merge, got {other:?}"),
    };
    assert_eq!(report.user_id, user_id);
    assert_eq!(report.merged, 2);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].line.product_id, ProductId::new("scarf"));
    assert!(report.hydrated);

    let state = t.engine.state();
    let products: Vec<&str> = state.items().iter().map(|i| i.product_id.as_str()).collect();
    assert_eq!(products, vec!["shirt", "socks"]);
    assert_eq!(state.total(), 300);
    assert_eq!(state.status(), CartStatus::Idle);
    assert!(store.snapshots().load().await.is_none());
    assert!(t.storage.is_empty());
}

#[tokio::test]
async fn repeated_login_signal_does_not_merge_twice() {
    let t = TestEngine::new();
    t.engine
        .store()
        .add_item(CartItem::new("shirt", 1, 200))
        .await
        .unwrap();
    let user = AuthChange::Authenticated(UserId::new());

    t.engine.on_auth_changed(user).await;
    let second = t.engine.on_auth_changed(user).await;

    assert!(matches!(second, ReconcileOutcome::Skipped(_)));
    assert_eq!(t.backend.add_calls(), 1);
    assert_eq!(t.engine.state().items()[0].quantity, 1);
}

#[tokio::test]
async fn logout_clears_cart_and_snapshot() {
    let t = TestEngine::new();
    t.engine
        .store()
        .add_item(CartItem::new("shirt", 1, 200))
        .await
        .unwrap();
    t.engine
        .on_auth_changed(AuthChange::Authenticated(UserId::new()))
        .await;

    let outcome = t.engine.on_auth_changed(AuthChange::Anonymous).await;

    assert_eq!(outcome, ReconcileOutcome::LoggedOut);
    assert!(t.engine.state().is_empty());
    assert!(t.storage.is_empty());
}

#[tokio::test]
async fn checkout_totals_with_and_without_coupon() {
    let t = TestEngine::new();
    t.engine
        .store()
        .add_item(CartItem::new("kurta", 2, 300))
        .await
        .unwrap();
    let checkout = t.engine.checkout();

    checkout.validate().unwrap();
    let quote = checkout.quote();
    assert_eq!(quote.subtotal, 600);
    assert_eq!(quote.shipping, 0);
    assert_eq!(quote.tax, 108);
    assert_eq!(quote.total, 708);

    checkout.apply_coupon("FLAT50").await.unwrap();
    assert_eq!(checkout.step(), CheckoutStep::PricingApplied);
    assert_eq!(checkout.quote().total, 658);

    let response = checkout.submit(submit_request()).await.unwrap();
    assert_eq!(response.payment_handoff.amount, 658);
    assert_eq!(response.order.total, 658);
}

#[tokio::test]
async fn concurrent_submits_create_one_order() {
    let t = TestEngine::new();
    t.engine
        .store()
        .add_item(CartItem::new("kurta", 2, 300))
        .await
        .unwrap();
    let checkout = t.engine.checkout();
    checkout.validate().unwrap();

    let (first, second) = tokio::join!(
        checkout.submit(submit_request()),
        checkout.submit(submit_request()),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|r| matches!(r, Err(CheckoutError::AlreadySubmitting)))
    );
    assert_eq!(t.backend.checkout_calls(), 1);
    assert_eq!(checkout.step(), CheckoutStep::HandedOff);
}

#[tokio::test]
async fn cart_is_cleared_only_after_successful_payment() {
    let t = TestEngine::new();
    t.engine
        .store()
        .add_item(CartItem::new("kurta", 2, 300))
        .await
        .unwrap();
    let checkout = t.engine.checkout();
    checkout.validate().unwrap();

    let response = checkout.submit(submit_request()).await.unwrap();
    assert_eq!(response.payment_handoff.amount, 708);
    assert_eq!(t.engine.state().item_count(), 2);

    checkout
        .complete_payment(PaymentOutcome::Succeeded {
            payment_reference: "pay_42".into(),
        })
        .await
        .unwrap();

    assert!(t.engine.state().is_empty());
    assert_eq!(checkout.step(), CheckoutStep::Idle);
}

#[tokio::test]
async fn stale_coupon_is_not_submitted_after_cart_shrinks() {
    let t = TestEngine::new();
    let store = t.engine.store();
    store.add_item(CartItem::new("kurta", 2, 300)).await.unwrap();
    let checkout = t.engine.checkout();
    checkout.validate().unwrap();
    checkout.apply_coupon("FLAT50").await.unwrap();

    store
        .remove_item(ProductId::new("kurta"), VariantSelector::new())
        .await
        .unwrap();
    store.add_item(CartItem::new("socks", 1, 50)).await.unwrap();

    assert_eq!(checkout.quote().discount, 0);
    let err = checkout.submit(submit_request()).await.unwrap_err();
    assert_eq!(err, CheckoutError::CartChanged);
    assert_eq!(checkout.step(), CheckoutStep::Validating);
    assert_eq!(t.backend.checkout_calls(), 0);
}
