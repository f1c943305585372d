use serde::{Deserialize, Serialize};

use crate::item::{CartItem, LineKey, ProductId, VariantSelector};

/// Request lifecycle of the cart as seen by the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartStatus {
    #[default]
    Idle,
    Loading,
    Error,
}

/// Cart document as returned by the cart backend.
///
/// `item_count` and `total` are what the server *claims*; they are never
/// trusted by [`apply`], which derives both from `items`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCart {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub item_count: u64,
    #[serde(default)]
    pub total: u64,
}

impl ServerCart {
    pub fn new(items: Vec<CartItem>) -> Self {
        let item_count = items.iter().map(|i| u64::from(i.quantity)).sum();
        let total = items.iter().map(CartItem::line_total).sum();
        Self {
            items,
            item_count,
            total,
        }
    }

    /// Whether the reported count/total agree with the item list.
    pub fn is_consistent(&self) -> bool {
        let expected = ServerCart::new(self.items.clone());
        expected.item_count == self.item_count && expected.total == self.total
    }
}

/// Aggregate exposed to the rest of the application.
///
/// Fields are private: the only way to obtain a non-empty state is through
/// [`apply`], so `item_count`/`total` always match `items`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartState {
    items: Vec<CartItem>,
    item_count: u64,
    total: u64,
    status: CartStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl CartState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn status(&self) -> CartStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.status == CartStatus::Loading
    }

    pub fn line(&self, product_id: &ProductId, variant_selector: &VariantSelector) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|item| item.is_line(product_id, variant_selector))
    }

    /// Re-derives count/total and checks them against the stored values, and
    /// checks line uniqueness and the `quantity >= 1` rule.
    pub fn is_consistent(&self) -> bool {
        let recomputed = derive(self.items.clone(), self.status, self.last_error.clone());
        let mut keys: Vec<LineKey> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let key = item.key();
            if item.quantity == 0 || keys.contains(&key) {
                return false;
            }
            keys.push(key);
        }
        recomputed.item_count == self.item_count
            && recomputed.total == self.total
            && (self.status == CartStatus::Error) == self.last_error.is_some()
    }

    /// Convenience for `apply(self, action)`.
    pub fn apply(self, action: CartAction) -> Self {
        apply(self, action)
    }
}

/// Every transition the cart state machine accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartAction {
    HydrateFromServer(ServerCart),
    HydrateFromLocal(Vec<CartItem>),
    AddItem(CartItem),
    UpdateQuantity {
        product_id: ProductId,
        variant_selector: VariantSelector,
        quantity: i64,
    },
    RemoveItem {
        product_id: ProductId,
        variant_selector: VariantSelector,
    },
    Clear,
    SetLoading(bool),
    SetError(String),
    ClearError,
}

impl CartAction {
    /// Stable name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CartAction::HydrateFromServer(_) => "cart.hydrate_from_server",
            CartAction::HydrateFromLocal(_) => "cart.hydrate_from_local",
            CartAction::AddItem(_) => "cart.add_item",
            CartAction::UpdateQuantity { .. } => "cart.update_quantity",
            CartAction::RemoveItem { .. } => "cart.remove_item",
            CartAction::Clear => "cart.clear",
            CartAction::SetLoading(_) => "cart.set_loading",
            CartAction::SetError(_) => "cart.set_error",
            CartAction::ClearError => "cart.clear_error",
        }
    }

    /// Whether the action can change the item list (and therefore needs persisting).
    pub fn touches_items(&self) -> bool {
        !matches!(
            self,
            CartAction::SetLoading(_) | CartAction::SetError(_) | CartAction::ClearError
        )
    }
}

/// The cart transition function.
///
/// Pure and total: it never fails and never performs IO. Each branch only
/// edits `items`/`status`/`last_error`; the derived fields are rebuilt once,
/// after the match.
pub fn apply(state: CartState, action: CartAction) -> CartState {
    let CartState {
        mut items,
        mut status,
        mut last_error,
        ..
    } = state;

    match action {
        CartAction::HydrateFromServer(cart) => {
            items = normalize(cart.items);
            status = CartStatus::Idle;
            last_error = None;
        }
        CartAction::HydrateFromLocal(local) => {
            items = normalize(local);
            status = CartStatus::Idle;
            last_error = None;
        }
        CartAction::AddItem(item) => merge_line(&mut items, item),
        CartAction::UpdateQuantity {
            product_id,
            variant_selector,
            quantity,
        } => {
            if quantity <= 0 {
                items.retain(|item| !item.is_line(&product_id, &variant_selector));
            } else if let Some(line) = items
                .iter_mut()
                .find(|item| item.is_line(&product_id, &variant_selector))
            {
                line.quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
            }
        }
        CartAction::RemoveItem {
            product_id,
            variant_selector,
        } => items.retain(|item| !item.is_line(&product_id, &variant_selector)),
        CartAction::Clear => items.clear(),
        CartAction::SetLoading(true) => {
            status = CartStatus::Loading;
            last_error = None;
        }
        CartAction::SetLoading(false) => {
            if status == CartStatus::Loading {
                status = CartStatus::Idle;
            }
        }
        CartAction::SetError(message) => {
            status = CartStatus::Error;
            last_error = Some(message);
        }
        CartAction::ClearError => {
            if status == CartStatus::Error {
                status = CartStatus::Idle;
                last_error = None;
            }
        }
    }

    derive(items, status, last_error)
}

/// The single place where derived fields are computed.
fn derive(items: Vec<CartItem>, status: CartStatus, last_error: Option<String>) -> CartState {
    let item_count = items.iter().map(|item| u64::from(item.quantity)).sum();
    let total = items
        .iter()
        .fold(0u64, |acc, item| acc.saturating_add(item.line_total()));

    CartState {
        items,
        item_count,
        total,
        status,
        last_error,
    }
}

/// Merge-by-identity: bump an existing line or append a new one.
fn merge_line(items: &mut Vec<CartItem>, item: CartItem) {
    if item.quantity == 0 {
        return;
    }
    match items
        .iter_mut()
        .find(|line| line.is_line(&item.product_id, &item.variant_selector))
    {
        Some(line) => line.quantity = line.quantity.saturating_add(item.quantity),
        None => items.push(item),
    }
}

/// Hydrate input may come from an older snapshot or a sloppy server: drop
/// zero-quantity lines and fold duplicates into one line.
fn normalize(source: Vec<CartItem>) -> Vec<CartItem> {
    let mut items = Vec::with_capacity(source.len());
    for item in source {
        merge_line(&mut items, item);
    }
    items
}
