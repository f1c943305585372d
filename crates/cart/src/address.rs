use serde::{Deserialize, Serialize};

use cartsync_core::{DomainError, DomainResult};

/// Postal address used for shipping and billing at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub full_name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
}

impl Address {
    /// Check that every required field is filled in.
    ///
    /// The error names all missing fields at once so the form can highlight them together.
    pub fn validate(&self) -> DomainResult<()> {
        let required = [
            ("full name", &self.full_name),
            ("address line 1", &self.line1),
            ("city", &self.city),
            ("postal code", &self.postal_code),
            ("country", &self.country),
            ("phone", &self.phone),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DomainError::validation(format!(
                "missing address fields: {}",
                missing.join(", ")
            )))
        }
    }
}
