use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque product identifier assigned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An id made only of whitespace is treated as unset.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProductId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Selected value per variant axis (e.g. `size -> M`, `color -> red`).
///
/// Backed by an ordered map, so two selectors compare equal regardless of the
/// order in which their axes were chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantSelector(BTreeMap<String, String>);

impl VariantSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style axis selection.
    pub fn with(mut self, axis: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(axis.into(), value.into());
        self
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.0.get(axis).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for VariantSelector
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Identity of a cart line: product plus variant selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub product_id: ProductId,
    pub variant_selector: VariantSelector,
}

impl LineKey {
    pub fn new(product_id: ProductId, variant_selector: VariantSelector) -> Self {
        Self {
            product_id,
            variant_selector,
        }
    }
}

impl core::fmt::Display for LineKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.product_id)?;
        for (axis, value) in self.variant_selector.iter() {
            write!(f, " {axis}={value}")?;
        }
        Ok(())
    }
}

/// One distinct purchasable line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_selector: VariantSelector,
    pub quantity: u32,
    /// Price snapshot at the time of add, in whole currency units.
    pub unit_price: u64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl CartItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: u64) -> Self {
        Self {
            product_id: product_id.into(),
            variant_selector: VariantSelector::default(),
            quantity,
            unit_price,
            display_name: String::new(),
            image_ref: None,
        }
    }

    pub fn with_variant(mut self, variant_selector: VariantSelector) -> Self {
        self.variant_selector = variant_selector;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn key(&self) -> LineKey {
        LineKey::new(self.product_id.clone(), self.variant_selector.clone())
    }

    /// Same line iff product and variant selection are structurally equal.
    pub fn is_line(&self, product_id: &ProductId, variant_selector: &VariantSelector) -> bool {
        &self.product_id == product_id && &self.variant_selector == variant_selector
    }

    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(u64::from(self.quantity))
    }
}
