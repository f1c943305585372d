//! `reqwest`-based cart and pricing backends.
//!
//! Both services speak JSON. Responses are accepted either bare or wrapped in
//! the `{ "success": .., "data": .., "message": .. }` envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cartsync_cart::{CouponMetadata, ProductId, ServerCart, VariantSelector};

use super::{
    BackendError, BackendResult, CartBackend, CheckoutRequest, CheckoutResponse, CouponRequest,
    CouponValidation, PricingBackend,
};

#[derive(Debug, Clone)]
struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpClient {
    fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send and return the (unwrapped) JSON body of a 2xx response.
    async fn send(&self, req: reqwest::RequestBuilder) -> BackendResult<Value> {
        let resp = req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                tracing::warn!("cart API unreachable: {e}");
                BackendError::Offline
            } else {
                BackendError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!("cart API returned {}: {}", status, body);
            return Err(BackendError::Api(status.as_u16(), error_message(&body)));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| BackendError::Parse(e.to_string()))?;
        unwrap_envelope(body)
    }

    async fn send_as<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> BackendResult<T> {
        let body = self.send(req).await?;
        serde_json::from_value(body).map_err(|e| BackendError::Parse(e.to_string()))
    }
}

/// Strip the `{success, data, message}` envelope if present.
fn unwrap_envelope(body: Value) -> BackendResult<Value> {
    let mut map = match body {
        Value::Object(map) => map,
        other => return Ok(other),
    };

    match map.get("success").and_then(Value::as_bool) {
        Some(false) => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request was not successful")
                .to_string();
            Err(BackendError::Rejected(message))
        }
        Some(true) if map.contains_key("data") => Ok(map.remove("data").unwrap_or(Value::Null)),
        _ => Ok(Value::Object(map)),
    }
}

/// Pull a readable message out of an error body (JSON `message` or raw text).
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemPayload<'a> {
    product_id: &'a ProductId,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<u32>,
    variant_selector: &'a VariantSelector,
}

/// Cart service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCartBackend {
    http: HttpClient,
}

impl HttpCartBackend {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: HttpClient::new(base_url, token),
        }
    }
}

#[async_trait::async_trait]
impl CartBackend for HttpCartBackend {
    async fn get_cart(&self) -> BackendResult<ServerCart> {
        let req = self.http.request(reqwest::Method::GET, "/cart");
        self.http.send_as(req).await
    }

    async fn add_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart> {
        let req = self
            .http
            .request(reqwest::Method::POST, "/cart/items")
            .json(&ItemPayload {
                product_id,
                quantity: Some(quantity),
                variant_selector,
            });
        self.http.send_as(req).await
    }

    async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart> {
        let req = self
            .http
            .request(reqwest::Method::PUT, "/cart/items")
            .json(&ItemPayload {
                product_id,
                quantity: Some(quantity),
                variant_selector,
            });
        self.http.send_as(req).await
    }

    async fn remove_item(
        &self,
        product_id: &ProductId,
        variant_selector: &VariantSelector,
    ) -> BackendResult<ServerCart> {
        let req = self
            .http
            .request(reqwest::Method::DELETE, "/cart/items")
            .json(&ItemPayload {
                product_id,
                quantity: None,
                variant_selector,
            });
        self.http.send_as(req).await
    }

    async fn clear_cart(&self) -> BackendResult<()> {
        let req = self.http.request(reqwest::Method::DELETE, "/cart");
        self.http.send(req).await.map(|_| ())
    }

    async fn checkout(&self, request: &CheckoutRequest) -> BackendResult<CheckoutResponse> {
        let req = self
            .http
            .request(reqwest::Method::POST, "/cart/checkout")
            .json(request);
        self.http.send_as(req).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CouponResponse {
    accepted: bool,
    #[serde(default)]
    discount: u64,
    coupon_metadata: Option<CouponMetadata>,
    #[serde(default)]
    reason: Option<String>,
}

/// Coupon service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPricingBackend {
    http: HttpClient,
}

impl HttpPricingBackend {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: HttpClient::new(base_url, token),
        }
    }
}

#[async_trait::async_trait]
impl PricingBackend for HttpPricingBackend {
    async fn validate_coupon(&self, request: &CouponRequest) -> BackendResult<CouponValidation> {
        let req = self
            .http
            .request(reqwest::Method::POST, "/coupons/validate")
            .json(request);

        let response: CouponResponse = match self.http.send_as(req).await {
            Ok(response) => response,
            // Coupon services answer "invalid code" with a client error.
            Err(BackendError::Api(status, message)) if (400..500).contains(&status) => {
                return Ok(CouponValidation::Rejected { reason: message });
            }
            Err(BackendError::Rejected(reason)) => {
                return Ok(CouponValidation::Rejected { reason });
            }
            Err(err) => return Err(err),
        };

        match (response.accepted, response.coupon_metadata) {
            (true, Some(metadata)) => Ok(CouponValidation::Accepted {
                discount: response.discount,
                metadata,
            }),
            (true, None) => Err(BackendError::Parse(
                "accepted coupon without couponMetadata".to_string(),
            )),
            (false, _) => Ok(CouponValidation::Rejected {
                reason: response
                    .reason
                    .unwrap_or_else(|| "coupon is not valid".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_data_is_unwrapped() {
        let body = json!({ "success": true, "data": { "items": [], "itemCount": 0, "total": 0 } });
        let value = unwrap_envelope(body).unwrap();
        let cart: ServerCart = serde_json::from_value(value).unwrap();
        assert!(cart.items.is_empty());
    }

    #[test]
    fn bare_body_passes_through() {
        let body = json!({ "items": [], "itemCount": 0, "total": 0 });
        assert_eq!(unwrap_envelope(body.clone()).unwrap(), body);
    }

    #[test]
    fn unsuccessful_envelope_is_rejection() {
        let body = json!({ "success": false, "message": "coupon expired" });
        assert_eq!(
            unwrap_envelope(body).unwrap_err(),
            BackendError::Rejected("coupon expired".into())
        );
    }

    #[test]
    fn error_message_reads_json_or_text() {
        assert_eq!(error_message(r#"{"message":"out of stock"}"#), "out of stock");
        assert_eq!(error_message(" bad gateway \n"), "bad gateway");
    }

    #[test]
    fn item_payload_omits_quantity_for_removal() {
        let product_id = ProductId::new("tee");
        let variant_selector = VariantSelector::new().with("size", "M");
        let json = serde_json::to_value(ItemPayload {
            product_id: &product_id,
            quantity: None,
            variant_selector: &variant_selector,
        })
        .unwrap();

        assert_eq!(json, json!({ "productId": "tee", "variantSelector": { "size": "M" } }));
    }
}
