//! HTTP client for the Aevo REST API.

use crate::error::{RegistryError, RegistryResult};
use crate::market::{AccountInfo, MarketInfo, RawAccountResponse, RawMarket};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// API key pair sent as `AEVO-KEY` / `AEVO-SECRET` headers.
#[derive(Clone)]
pub struct ApiKeys {
    pub key: String,
    pub secret: String,
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeys")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Client for public market data and private account/order endpoints.
pub struct RestClient {
    client: Client,
    base_url: String,
    keys: Option<ApiKeys>,
}

impl RestClient {
    /// Create a client for `base_url` (e.g. `https://api.aevo.xyz`).
    ///
    /// Private endpoints need `keys`; without them the exchange rejects the call.
    pub fn new(base_url: impl Into<String>, keys: Option<ApiKeys>) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RegistryError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            keys,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, private: bool) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if private {
            if let Some(keys) = &self.keys {
                builder = builder
                    .header("AEVO-KEY", &keys.key)
                    .header("AEVO-SECRET", &keys.secret);
            }
        }
        builder
    }

    async fn execute(&self, builder: RequestBuilder) -> RegistryResult<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| RegistryError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::HttpClient(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(RegistryError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /index?symbol=<asset>`.
    pub async fn get_index(&self, asset: &str) -> RegistryResult<Value> {
        let builder = self
            .request(Method::GET, "/index", false)
            .query(&[("symbol", asset)]);
        self.execute(builder).await
    }

    /// `GET /markets?asset=<asset>`, parsed.
    pub async fn get_markets(&self, asset: &str) -> RegistryResult<Vec<MarketInfo>> {
        debug!(asset, "Fetching markets");
        let builder = self
            .request(Method::GET, "/markets", false)
            .query(&[("asset", asset)]);
        let body = self.execute(builder).await?;

        let raw: Vec<RawMarket> = serde_json::from_value(body)?;
        raw.into_iter().map(MarketInfo::try_from).collect()
    }

    /// `GET /account`, parsed.
    pub async fn get_account(&self) -> RegistryResult<AccountInfo> {
        let body = self
            .execute(self.request(Method::GET, "/account", true))
            .await?;
        let raw: RawAccountResponse = serde_json::from_value(body)?;
        AccountInfo::try_from(raw)
    }

    /// `GET /portfolio`.
    pub async fn get_portfolio(&self) -> RegistryResult<Value> {
        self.execute(self.request(Method::GET, "/portfolio", true))
            .await
    }

    /// `GET /orders`.
    pub async fn get_open_orders(&self) -> RegistryResult<Value> {
        self.execute(self.request(Method::GET, "/orders", true)).await
    }

    /// `POST /orders` with an already signed order body.
    pub async fn create_order(&self, body: &Value) -> RegistryResult<Value> {
        info!(
            instrument = %body.get("instrument").unwrap_or(&serde_json::Value::Null),
            is_buy = %body.get("is_buy").unwrap_or(&serde_json::Value::Null),
            "Submitting order via REST"
        );
        let builder = self.request(Method::POST, "/orders", true).json(body);
        self.execute(builder).await
    }

    /// `DELETE /orders/<order_id>`.
    pub async fn cancel_order(&self, order_id: &str) -> RegistryResult<Value> {
        let path = format!("/orders/{order_id}");
        let result = self
            .execute(self.request(Method::DELETE, &path, true))
            .await?;
        info!(order_id, "Order cancelled via REST");
        Ok(result)
    }

    /// `DELETE /orders-all`, optionally narrowed by instrument type and asset.
    pub async fn cancel_all_orders(
        &self,
        instrument_type: Option<&str>,
        asset: Option<&str>,
    ) -> RegistryResult<Value> {
        let builder = self
            .request(Method::DELETE, "/orders-all", true)
            .json(&cancel_all_body(instrument_type, asset));
        let result = self.execute(builder).await?;
        info!(?instrument_type, ?asset, "All orders cancelled via REST");
        Ok(result)
    }
}

fn cancel_all_body(instrument_type: Option<&str>, asset: Option<&str>) -> Value {
    let mut body = Map::new();
    if let Some(t) = instrument_type {
        body.insert("instrument_type".into(), json!(t));
    }
    if let Some(a) = asset {
        body.insert("asset".into(), json!(a));
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_all_body() {
        assert_eq!(cancel_all_body(None, None), json!({}));
        assert_eq!(
            cancel_all_body(Some("PERPETUAL"), Some("ETH")),
            json!({"instrument_type": "PERPETUAL", "asset": "ETH"})
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = RestClient::new("https://api-testnet.aevo.xyz/", None).unwrap();
        assert_eq!(client.base_url(), "https://api-testnet.aevo.xyz");
    }

    #[test]
    fn test_keys_debug_redacts_secret() {
        let keys = ApiKeys {
            key: "k".into(),
            secret: "very-secret".into(),
        };
        assert!(!format!("{keys:?}").contains("very-secret"));
    }
}
