//! Marketplace detail-endpoint client
//!
//! Issues one price/stock request and parses the response into a
//! [`ProductSnapshot`]. Missing or malformed price/stock fields are parse
//! failures, never defaults.

use crate::config::MarketplaceConfig;
use crate::domain::{PriceTag, ProductSnapshot, VariantBlock};
use crate::error::{Result, WatchError};
use crate::session::SessionContext;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Raw detail payload, loosely typed on purpose: every absence is decided
/// in [`parse_detail`], not by serde defaults
#[derive(Debug, Deserialize)]
pub struct DetailResponse {
    #[serde(default)]
    products: Vec<RawProduct>,
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    name: Option<String>,
    #[serde(default)]
    sizes: Vec<RawVariant>,
}

#[derive(Debug, Deserialize)]
struct RawVariant {
    name: Option<String>,
    #[serde(rename = "origName")]
    orig_name: Option<String>,
    price: Option<RawPrice>,
    stocks: Option<Vec<RawStock>>,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    basic: Option<i64>,
    product: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawStock {
    qty: Option<i64>,
}

/// HTTP client for the per-item detail endpoint
#[derive(Clone)]
pub struct MarketplaceClient {
    http: Client,
    cfg: MarketplaceConfig,
}

impl MarketplaceClient {
    pub fn new(cfg: MarketplaceConfig) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self { http, cfg })
    }

    pub fn default_region(&self) -> i32 {
        self.cfg.default_region
    }

    /// Product page URL for an article (used as referer and for
    /// notification links)
    pub fn page_url(&self, external_id: i64) -> String {
        self.cfg.page_url(external_id)
    }

    fn detail_url(&self, external_id: i64, region: i32) -> String {
        format!(
            "{}?appType=1&curr={}&dest={}&spp=30&hide_dtype=11&ab_testing=false&lang=ru&nm={}",
            self.cfg.detail_url, self.cfg.currency, region, external_id
        )
    }

    fn static_headers(&self, external_id: i64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let entries = [
            ("user-agent", USER_AGENT.to_string()),
            ("accept", "*/*".to_string()),
            (
                "accept-language",
                "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            ),
            ("referer", self.page_url(external_id)),
        ];
        for (name, value) in entries {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }
        headers
    }

    /// Plain fetch without anti-bot context
    pub async fn fetch_detail(&self, external_id: i64, region: i32) -> Result<ProductSnapshot> {
        let url = self.detail_url(external_id, region);
        let request = self.http.get(&url).headers(self.static_headers(external_id));
        self.execute(external_id, request, false).await
    }

    /// Hardened fetch through a captured session context.
    ///
    /// The context's shared headers are cloned with the referer rewritten
    /// to this item's page; its cookie jar replaces whatever cookie header
    /// the capture carried.
    pub async fn fetch_detail_with_session(
        &self,
        external_id: i64,
        region: i32,
        ctx: &SessionContext,
    ) -> Result<ProductSnapshot> {
        let url = self.detail_url(external_id, region);
        let page_url = self.page_url(external_id);

        let mut headers = HeaderMap::new();
        for (name, value) in ctx.headers_for(&page_url) {
            // hop-by-hop and length headers belong to the original transport
            if matches!(name.as_str(), "host" | "content-length" | "connection") {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }
        if let Some(cookie) = ctx.cookie_header() {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.insert(COOKIE, value);
            }
        }

        let request = self.http.get(&url).headers(headers);
        self.execute(external_id, request, true).await
    }

    async fn execute(
        &self,
        external_id: i64,
        request: reqwest::RequestBuilder,
        hardened: bool,
    ) -> Result<ProductSnapshot> {
        let resp = request
            .send()
            .await
            .map_err(|e| WatchError::FetchTransport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            if hardened && matches!(status.as_u16(), 401 | 403) {
                return Err(WatchError::ChallengeRejected(format!(
                    "HTTP {} for item {}",
                    status, external_id
                )));
            }
            return Err(WatchError::UpstreamStatus {
                status: status.as_u16(),
                item: external_id,
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| WatchError::FetchTransport(e.to_string()))?;
        let detail: DetailResponse =
            serde_json::from_str(&body).map_err(|e| WatchError::Parse {
                item: external_id,
                reason: format!("invalid JSON: {e}"),
            })?;

        debug!("[nm={}] Detail payload received", external_id);
        parse_detail(external_id, detail)
    }
}

/// Convert a raw detail payload into a snapshot.
///
/// Upstream prices arrive in minor units; quantities are summed across
/// warehouse records.
pub fn parse_detail(external_id: i64, raw: DetailResponse) -> Result<ProductSnapshot> {
    let parse_err = |reason: &str| WatchError::Parse {
        item: external_id,
        reason: reason.to_string(),
    };

    let product = raw
        .products
        .into_iter()
        .next()
        .ok_or_else(|| parse_err("empty product list"))?;

    if product.sizes.is_empty() {
        return Err(parse_err("no variant blocks"));
    }

    let mut variants = Vec::with_capacity(product.sizes.len());
    for variant in product.sizes {
        let price = variant
            .price
            .ok_or_else(|| parse_err("variant without price block"))?;
        let basic = price
            .basic
            .ok_or_else(|| parse_err("price block without basic price"))?;
        let sale = price
            .product
            .ok_or_else(|| parse_err("price block without sale price"))?;

        let stocks = variant
            .stocks
            .ok_or_else(|| parse_err("variant without stock records"))?;
        let mut qty = 0i64;
        for stock in stocks {
            qty += stock
                .qty
                .ok_or_else(|| parse_err("stock record without quantity"))?;
        }

        variants.push(VariantBlock {
            name: variant.name.unwrap_or_default(),
            orig_name: variant.orig_name.unwrap_or_default(),
            price: PriceTag {
                basic: basic / 100,
                sale: sale / 100,
            },
            qty,
        });
    }

    Ok(ProductSnapshot {
        name: product
            .name
            .unwrap_or_else(|| format!("item {external_id}")),
        variants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Result<ProductSnapshot> {
        let raw: DetailResponse = serde_json::from_value(json).unwrap();
        parse_detail(42, raw)
    }

    #[test]
    fn test_parse_full_payload() {
        let snapshot = parse(serde_json::json!({
            "products": [{
                "name": "Sneakers",
                "sizes": [
                    {
                        "name": "42",
                        "origName": "42 RU",
                        "price": {"basic": 1000000, "product": 800000},
                        "stocks": [{"qty": 3}, {"qty": 2}]
                    },
                    {
                        "name": "43",
                        "origName": "43 RU",
                        "price": {"basic": 1000000, "product": 790000},
                        "stocks": []
                    }
                ]
            }]
        }))
        .unwrap();

        assert_eq!(snapshot.name, "Sneakers");
        assert_eq!(snapshot.variants.len(), 2);
        assert_eq!(snapshot.variants[0].price, PriceTag { basic: 10000, sale: 8000 });
        assert_eq!(snapshot.variants[0].qty, 5);
        assert_eq!(snapshot.variants[1].qty, 0);
        assert!(snapshot.has_real_variants());
    }

    #[test]
    fn test_empty_products_is_parse_error() {
        let err = parse(serde_json::json!({"products": []})).unwrap_err();
        assert!(matches!(err, WatchError::Parse { item: 42, .. }));
    }

    #[test]
    fn test_missing_price_is_parse_error() {
        let err = parse(serde_json::json!({
            "products": [{
                "name": "Socks",
                "sizes": [{"name": "0", "stocks": [{"qty": 1}]}]
            }]
        }))
        .unwrap_err();
        assert!(matches!(err, WatchError::Parse { .. }));
    }

    #[test]
    fn test_missing_stocks_is_parse_error() {
        let err = parse(serde_json::json!({
            "products": [{
                "name": "Socks",
                "sizes": [{"name": "0", "price": {"basic": 100, "product": 100}}]
            }]
        }))
        .unwrap_err();
        assert!(matches!(err, WatchError::Parse { .. }));
    }

    #[test]
    fn test_missing_name_falls_back() {
        let snapshot = parse(serde_json::json!({
            "products": [{
                "sizes": [{
                    "name": "0",
                    "price": {"basic": 50000, "product": 45000},
                    "stocks": [{"qty": 7}]
                }]
            }]
        }))
        .unwrap();
        assert_eq!(snapshot.name, "item 42");
        assert!(!snapshot.has_real_variants());
    }
}
