//! Engine configuration, read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cartsync_cart::PricingConfig;

use crate::reconcile::MergeFailurePolicy;

/// Runtime configuration for [`crate::CartEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Base URL of the cart/pricing HTTP API.
    pub api_url: String,
    pub auth_token: Option<String>,
    /// Namespace prefix of the local snapshot record.
    pub snapshot_namespace: String,
    /// Snapshots older than this are ignored on load.
    pub snapshot_ttl: chrono::Duration,
    /// SQLite file for the local snapshot; `None` keeps it in memory.
    pub snapshot_db: Option<PathBuf>,
    pub pricing: PricingConfig,
    pub merge_policy: MergeFailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            auth_token: None,
            snapshot_namespace: "cart".to_string(),
            snapshot_ttl: chrono::Duration::days(7),
            snapshot_db: None,
            pricing: PricingConfig::default(),
            merge_policy: MergeFailurePolicy::Drop,
        }
    }
}

impl EngineConfig {
    /// Build from process environment variables (`CART_*`).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys use defaults; unparsable
    /// values are logged and also fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ttl_days: i64 = parse_or(&lookup, "CART_SNAPSHOT_TTL_DAYS", 7);
        let retry_attempts: u32 = parse_or(&lookup, "CART_MERGE_RETRY_ATTEMPTS", 0);
        let retry_backoff_ms: u64 = parse_or(&lookup, "CART_MERGE_RETRY_BACKOFF_MS", 500);

        let merge_policy = if retry_attempts == 0 {
            MergeFailurePolicy::Drop
        } else {
            MergeFailurePolicy::Retry {
                attempts: retry_attempts,
                backoff: Duration::from_millis(retry_backoff_ms),
            }
        };

        Self {
            api_url: non_empty("CART_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            auth_token: non_empty("CART_AUTH_TOKEN"),
            snapshot_namespace: non_empty("CART_SNAPSHOT_NAMESPACE")
                .unwrap_or(defaults.snapshot_namespace),
            snapshot_ttl: chrono::Duration::days(ttl_days.max(0)),
            snapshot_db: non_empty("CART_SNAPSHOT_DB").map(PathBuf::from),
            pricing: PricingConfig {
                free_shipping_threshold: parse_or(
                    &lookup,
                    "CART_FREE_SHIPPING_THRESHOLD",
                    defaults.pricing.free_shipping_threshold,
                ),
                flat_shipping_fee: parse_or(
                    &lookup,
                    "CART_FLAT_SHIPPING_FEE",
                    defaults.pricing.flat_shipping_fee,
                ),
                tax_rate_bps: parse_or(&lookup, "CART_TAX_RATE_BPS", defaults.pricing.tax_rate_bps),
                currency: non_empty("CART_CURRENCY").unwrap_or(defaults.pricing.currency),
            },
            merge_policy,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + core::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{key}={raw:?} is not valid; using default {default:?}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.snapshot_ttl, chrono::Duration::days(7));
        assert_eq!(config.pricing.tax_rate_bps, 1_800);
    }

    #[test]
    fn values_are_read_from_lookup() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("CART_API_URL", "https://shop.example/api/"),
            ("CART_AUTH_TOKEN", "secret"),
            ("CART_SNAPSHOT_TTL_DAYS", "3"),
            ("CART_SNAPSHOT_DB", "/tmp/cart.db"),
            ("CART_FREE_SHIPPING_THRESHOLD", "999"),
            ("CART_TAX_RATE_BPS", "500"),
            ("CART_MERGE_RETRY_ATTEMPTS", "2"),
            ("CART_MERGE_RETRY_BACKOFF_MS", "10"),
        ]));

        assert_eq!(config.api_url, "https://shop.example/api");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.snapshot_ttl, chrono::Duration::days(3));
        assert_eq!(config.snapshot_db, Some(PathBuf::from("/tmp/cart.db")));
        assert_eq!(config.pricing.free_shipping_threshold, 999);
        assert_eq!(config.pricing.tax_rate_bps, 500);
        assert_eq!(
            config.merge_policy,
            MergeFailurePolicy::Retry {
                attempts: 2,
                backoff: Duration::from_millis(10),
            }
        );
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("CART_FLAT_SHIPPING_FEE", "fifty"),
            ("CART_SNAPSHOT_TTL_DAYS", "-4"),
            ("CART_AUTH_TOKEN", "   "),
        ]));

        assert_eq!(config.pricing.flat_shipping_fee, 50);
        assert_eq!(config.snapshot_ttl, chrono::Duration::zero());
        assert_eq!(config.auth_token, None);
    }
}
