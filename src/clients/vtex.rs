//! VTEX commerce platform client
//!
//! Read-only access to orders, inventory, catalog search, checkout order forms
//! and sessions, authenticated with the store's app key and token headers.

use crate::clients::{endpoint, parse_base_url, read_json, ClientError};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

const SERVICE: &str = "VTEX";

/// Summary of a shopper derived from their order history
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerProfile {
    pub email: String,
    pub is_first_time: bool,
    pub total_orders: usize,
    pub last_order_date: Option<String>,
}

pub struct VtexClient {
    base_url: Url,
    app_key: String,
    app_token: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl VtexClient {
    pub fn new(
        store_url: &str,
        app_key: impl Into<String>,
        app_token: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: parse_base_url(SERVICE, store_url)?,
            app_key: app_key.into(),
            app_token: app_token.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Value, ClientError> {
        let url = self.url(&["api", "oms", "pvt", "orders", order_id])?;
        self.get("get_order", url, &[]).await
    }

    pub async fn get_inventory(&self, sku_id: &str) -> Result<Value, ClientError> {
        let url = self.url(&["api", "logistics", "pvt", "inventory", "skus", sku_id])?;
        self.get("get_inventory", url, &[]).await
    }

    pub async fn search_products(&self, query: &str, limit: u32) -> Result<Value, ClientError> {
        let url = self.url(&["api", "catalog_system", "pub", "products", "search", query])?;
        let to = limit.to_string();
        self.get("search_products", url, &[("_from", "0"), ("_to", to.as_str())])
            .await
    }

    pub async fn get_order_form(&self, order_form_id: &str) -> Result<Value, ClientError> {
        let url = self.url(&["api", "checkout", "pub", "orderForm", order_form_id])?;
        self.get("get_order_form", url, &[]).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Value, ClientError> {
        let url = self.url(&["api", "sessions", session_id])?;
        self.get("get_session", url, &[]).await
    }

    /// Orders placed with `email`, newest first. Any failure reads as no orders.
    pub async fn get_customer_orders(&self, email: &str, limit: u32) -> Vec<Value> {
        let limit = limit.to_string();
        let result = match self.url(&["api", "oms", "pvt", "orders"]) {
            Ok(url) => {
                self.get("get_customer_orders", url, &[("q", email), ("_limit", limit.as_str())])
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(body) => body
                .get("list")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Treating customer order lookup failure as no orders");
                Vec::new()
            }
        }
    }

    /// Derive a profile from the customer's most recent order. Never fails.
    pub async fn get_customer_profile(&self, email: &str) -> CustomerProfile {
        let orders = self.get_customer_orders(email, 1).await;

        CustomerProfile {
            email: email.to_string(),
            is_first_time: orders.is_empty(),
            total_orders: orders.len(),
            last_order_date: orders
                .first()
                .and_then(|order| order.get("creationDate"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        endpoint(SERVICE, &self.base_url, segments)
    }

    async fn get(
        &self,
        operation: &'static str,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<Value, ClientError> {
        debug!(operation, "Calling VTEX");

        let request = self
            .client
            .get(url)
            .query(query)
            .header("X-VTEX-API-AppKey", &self.app_key)
            .header("X-VTEX-API-AppToken", &self.app_token)
            .timeout(self.timeout);

        let outcome = match request.send().await {
            Ok(response) => read_json(SERVICE, response).await,
            Err(source) => Err(ClientError::Http {
                service: SERVICE,
                source,
            }),
        };

        if let Err(e) = &outcome {
            error!(operation, error = %e, "VTEX call failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> VtexClient {
        VtexClient::new(&server.uri(), "key-1", "token-1").unwrap()
    }

    #[tokio::test]
    async fn test_get_inventory_sends_app_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/logistics/pvt/inventory/skus/123"))
            .and(header("X-VTEX-API-AppKey", "key-1"))
            .and(header("X-VTEX-API-AppToken", "token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "skuId": "123",
                "balance": [{"warehouseId": "1", "totalQuantity": 4}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let inventory = client_for(&server).await.get_inventory("123").await.unwrap();

        assert_eq!(inventory["skuId"], json!("123"));
    }

    #[tokio::test]
    async fn test_search_products_uses_range_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/catalog_system/pub/products/search/shoes"))
            .and(query_param("_from", "0"))
            .and(query_param("_to", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"productId": "9"}])))
            .expect(1)
            .mount(&server)
            .await;

        let products = client_for(&server)
            .await
            .search_products("shoes", 5)
            .await
            .unwrap();

        assert_eq!(products.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_get_order_not_found_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/oms/pvt/orders/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Order not found"))
            .mount(&server)
            .await;

        let error = client_for(&server).await.get_order("missing").await.unwrap_err();

        assert_eq!(error.status(), Some(404));
    }

    #[tokio::test]
    async fn test_customer_profile_from_orders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/oms/pvt/orders"))
            .and(query_param("q", "ana@example.com"))
            .and(query_param("_limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "list": [{"orderId": "1", "creationDate": "2024-03-01T10:00:00Z"}]
            })))
            .mount(&server)
            .await;

        let profile = client_for(&server)
            .await
            .get_customer_profile("ana@example.com")
            .await;

        assert_eq!(
            profile,
            CustomerProfile {
                email: "ana@example.com".to_string(),
                is_first_time: false,
                total_orders: 1,
                last_order_date: Some("2024-03-01T10:00:00Z".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_customer_orders_failure_reads_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/oms/pvt/orders"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.get_customer_orders("bob@example.com", 10).await.is_empty());

        let profile = client.get_customer_profile("bob@example.com").await;
        assert!(profile.is_first_time);
        assert_eq!(profile.total_orders, 0);
        assert!(profile.last_order_date.is_none());

        let wire = serde_json::to_value(&profile).unwrap();
        assert_eq!(wire["isFirstTime"], json!(true));
        assert_eq!(wire["lastOrderDate"], Value::Null);
    }
}
