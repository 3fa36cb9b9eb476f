use super::{OrderGateway, TickerSource};
use crate::models::{OrderAck, OrderRequest, Quote};
use crate::settings::{ApiSettings, Credentials};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// Kraken Spot REST API
// Docs: https://docs.kraken.com/api/docs/rest-api/add-order
const TICKER_PATH: &str = "/0/public/Ticker";
const ADD_ORDER_PATH: &str = "/0/private/AddOrder";

type HmacSha512 = Hmac<Sha512>;

type KrakenRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Error)]
pub enum KrakenError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Kraken API error ({status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error("Kraken rejected request: {}", .0.join("; "))]
    Api(Vec<String>),

    #[error("Kraken response carried no result")]
    MissingResult,

    #[error("no ticker returned for pair {0}")]
    PairNotFound(String),

    #[error("malformed {field} in response: {value:?}")]
    Malformed { field: &'static str, value: String },

    #[error("invalid REST URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("API secret is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    #[error("API secret cannot be used as a signing key")]
    SigningKey,
}

/// Every Kraken response: `{"error": [...], "result": {...}}`
#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

impl<T> KrakenResponse<T> {
    fn into_result(self) -> Result<T, KrakenError> {
        if !self.error.is_empty() {
            return Err(KrakenError::Api(self.error));
        }
        self.result.ok_or(KrakenError::MissingResult)
    }
}

#[derive(Debug, Deserialize)]
struct TickerInfo {
    /// Ask: [price, whole lot volume, lot volume]
    a: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    descr: OrderDescription,
    #[serde(default)]
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OrderDescription {
    #[serde(default)]
    order: String,
}

/// Client for the Kraken spot REST API
///
/// Requests are paced by a shared rate limiter. Clones share the limiter
/// and the nonce counter, so nonces stay strictly increasing.
#[derive(Clone)]
pub struct KrakenClient {
    client: Client,
    credentials: Credentials,
    ticker_url: Url,
    add_order_url: Url,
    validate_only: bool,
    rate_limiter: Arc<KrakenRateLimiter>,
    last_nonce: Arc<AtomicU64>,
}

impl KrakenClient {
    pub fn new(credentials: Credentials, api: &ApiSettings) -> Result<Self, KrakenError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()?;

        let ticker_url = endpoint(&credentials.rest_url, TICKER_PATH)?;
        let add_order_url = endpoint(&credentials.rest_url, ADD_ORDER_PATH)?;

        let per_second = NonZeroU32::new(api.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            credentials,
            ticker_url,
            add_order_url,
            validate_only: false,
            rate_limiter,
            last_nonce: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Submit orders with `validate=true`: Kraken checks them but places nothing
    pub fn with_validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    pub fn validate_only(&self) -> bool {
        self.validate_only
    }

    /// Millisecond timestamp, bumped when needed to stay strictly increasing
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        match self
            .last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(last) | Err(last) => now.max(last + 1),
        }
    }

    async fn read_result<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, KrakenError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KrakenError::Status { status, body });
        }

        let envelope: KrakenResponse<T> = response.json().await?;
        envelope.into_result()
    }
}

impl TickerSource for KrakenClient {
    async fn fetch_quote(&self, pair: &str) -> Result<Quote, KrakenError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!(pair, "Fetching ticker");

        let response = self
            .client
            .get(self.ticker_url.clone())
            .query(&[("pair", pair)])
            .send()
            .await?;
        let mut tickers: HashMap<String, TickerInfo> = Self::read_result(response).await?;

        // Kraken keys results by its canonical pair name (XBTUSD -> XXBTZUSD)
        let (name, info) = match tickers.remove_entry(pair) {
            Some(entry) => entry,
            None if tickers.len() == 1 => tickers
                .into_iter()
                .next()
                .ok_or_else(|| KrakenError::PairNotFound(pair.to_string()))?,
            None => return Err(KrakenError::PairNotFound(pair.to_string())),
        };

        let quote = Quote {
            pair: name,
            ask: parse_field("ask price", info.a.first())?,
            // Informational only; a bad volume must not cost the position
            ask_whole_lot_volume: info.a.get(1).and_then(|v| v.parse().ok()),
            ask_lot_volume: info.a.get(2).and_then(|v| v.parse().ok()),
        };

        tracing::debug!(pair, ask = quote.ask, "Fetched ticker");
        Ok(quote)
    }
}

impl OrderGateway for KrakenClient {
    async fn add_order(&self, order: &OrderRequest) -> Result<OrderAck, KrakenError> {
        let nonce = self.next_nonce();
        let body = add_order_body(&self.add_order_url, nonce, order, self.validate_only);
        let signature = sign(&self.credentials.api_secret, ADD_ORDER_PATH, nonce, &body)?;

        self.rate_limiter.until_ready().await;
        tracing::debug!(
            pair = %order.pair,
            side = %order.side,
            validate = self.validate_only,
            "Submitting order"
        );

        let response = self
            .client
            .post(self.add_order_url.clone())
            .header("API-Key", &self.credentials.api_key)
            .header("API-Sign", signature)
            .header(
                "Content-Type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(body)
            .send()
            .await?;

        let result: AddOrderResult = Self::read_result(response).await?;

        Ok(OrderAck {
            description: result.descr.order,
            txids: result.txid,
        })
    }
}

fn parse_field(field: &'static str, value: Option<&String>) -> Result<f64, KrakenError> {
    let raw = value.ok_or(KrakenError::Malformed {
        field,
        value: String::new(),
    })?;
    raw.parse().map_err(|_| KrakenError::Malformed {
        field,
        value: raw.clone(),
    })
}

fn endpoint(rest_url: &str, path: &str) -> Result<Url, KrakenError> {
    let url = format!("{}{}", rest_url, path);
    Url::parse(&url).map_err(|e| KrakenError::InvalidUrl {
        url,
        reason: e.to_string(),
    })
}

/// Form body for AddOrder; the signature covers these exact bytes
///
/// Values are form-urlencoded with the serializer reqwest uses for query
/// strings, so pairs such as `XBT/USD` are escaped consistently.
fn add_order_body(endpoint: &Url, nonce: u64, order: &OrderRequest, validate: bool) -> String {
    let mut params = vec![
        ("nonce", nonce.to_string()),
        ("ordertype", order.order_type.as_str().to_string()),
        ("type", order.side.as_str().to_string()),
        ("pair", order.pair.clone()),
        ("volume", order.volume_param()),
        ("price", order.price_param()),
    ];
    if validate {
        params.push(("validate", "true".to_string()));
    }

    let mut form = endpoint.clone();
    form.query_pairs_mut().clear().extend_pairs(params.iter());
    form.query().unwrap_or_default().to_string()
}

/// API-Sign header: base64(HMAC-SHA512(path + SHA256(nonce + body), base64-decoded secret))
pub fn sign(secret: &str, path: &str, nonce: u64, body: &str) -> Result<String, KrakenError> {
    let mut sha = Sha256::new();
    sha.update(nonce.to_string().as_bytes());
    sha.update(body.as_bytes());
    let digest = sha.finalize();

    let key = STANDARD.decode(secret)?;
    let mut mac = HmacSha512::new_from_slice(&key).map_err(|_| KrakenError::SigningKey)?;
    mac.update(path.as_bytes());
    mac.update(&digest);

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use mockito::Matcher;

    // Example key pair from Kraken's authentication docs
    const DOC_SECRET: &str =
        "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";

    fn api_settings() -> ApiSettings {
        ApiSettings {
            timeout_secs: 5,
            requests_per_second: 100,
        }
    }

    fn client_for(server: &mockito::ServerGuard) -> KrakenClient {
        KrakenClient::new(
            Credentials::new(&server.url(), "test-key", DOC_SECRET),
            &api_settings(),
        )
        .unwrap()
    }

    #[test]
    fn test_sign_matches_documented_example() {
        let body =
            "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25";

        let signature = sign(DOC_SECRET, "/0/private/AddOrder", 1616492376594, body).unwrap();

        assert_eq!(
            signature,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn test_sign_rejects_non_base64_secret() {
        let result = sign("not base64!!", ADD_ORDER_PATH, 1, "nonce=1");
        assert!(matches!(result, Err(KrakenError::InvalidSecret(_))));
    }

    fn add_order_endpoint() -> Url {
        endpoint("https://api.kraken.com", ADD_ORDER_PATH).unwrap()
    }

    #[test]
    fn test_add_order_body() {
        let order = OrderRequest::limit(OrderSide::Sell, "XBTUSD", 0.5, 105.0);

        assert_eq!(
            add_order_body(&add_order_endpoint(), 42, &order, false),
            "nonce=42&ordertype=limit&type=sell&pair=XBTUSD&volume=0.5&price=105.00"
        );
        assert!(add_order_body(&add_order_endpoint(), 42, &order, true).ends_with("&validate=true"));
    }

    #[test]
    fn test_add_order_body_escapes_pair() {
        let order = OrderRequest::limit(OrderSide::Buy, "XBT/USD", 0.5, 95.0);

        let body = add_order_body(&add_order_endpoint(), 7, &order, false);

        assert!(body.contains("&pair=XBT%2FUSD&"), "{}", body);
        assert!(!body.contains("XBT/USD"));
        assert!(body.starts_with("nonce=7&"));
    }

    #[test]
    fn test_invalid_rest_url_rejected() {
        let result = KrakenClient::new(
            Credentials::new("not a url", "k", DOC_SECRET),
            &api_settings(),
        );

        assert!(matches!(result, Err(KrakenError::InvalidUrl { .. })));
    }

    #[test]
    fn test_nonces_strictly_increase() {
        let client = KrakenClient::new(
            Credentials::new("http://localhost", "k", DOC_SECRET),
            &api_settings(),
        )
        .unwrap();

        let mut previous = client.next_nonce();
        for _ in 0..100 {
            let nonce = client.next_nonce();
            assert!(nonce > previous);
            previous = nonce;
        }

        let clone = client.clone();
        assert!(clone.next_nonce() > previous);
    }

    #[tokio::test]
    async fn test_fetch_quote() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::UrlEncoded("pair".into(), "XBTUSD".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error":[],"result":{"XXBTZUSD":{"a":["30300.10000","1","1.000"],"b":["30300.00000","2","2.000"],"c":["30303.20000","0.00067643"]}}}"#,
            )
            .create_async()
            .await;

        let quote = client_for(&server).fetch_quote("XBTUSD").await.unwrap();

        mock.assert_async().await;
        assert_eq!(quote.pair, "XXBTZUSD");
        assert_eq!(quote.ask, 30300.1);
        assert_eq!(quote.ask_whole_lot_volume, Some(1.0));
        assert_eq!(quote.ask_lot_volume, Some(1.0));
    }

    #[tokio::test]
    async fn test_fetch_quote_escapes_pair() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Regex("^pair=XBT%2FUSD$".into()))
            .with_status(200)
            .with_body(r#"{"error":[],"result":{"XBT/USD":{"a":["30000.0","1","1.000"]}}}"#)
            .create_async()
            .await;

        let quote = client_for(&server).fetch_quote("XBT/USD").await.unwrap();

        mock.assert_async().await;
        assert_eq!(quote.pair, "XBT/USD");
        assert_eq!(quote.ask, 30000.0);
    }

    #[tokio::test]
    async fn test_fetch_quote_tolerates_bad_lot_volumes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error":[],"result":{"XBTUSD":{"a":["30300.1","n/a"]}}}"#)
            .create_async()
            .await;

        let quote = client_for(&server).fetch_quote("XBTUSD").await.unwrap();

        assert_eq!(quote.ask, 30300.1);
        assert_eq!(quote.ask_whole_lot_volume, None);
        assert_eq!(quote.ask_lot_volume, None);
    }

    #[tokio::test]
    async fn test_fetch_quote_picks_requested_pair() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"error":[],"result":{"ETHUSD":{"a":["2000.5","3","3.000"]},"XBTUSD":{"a":["30000.0","1","1.000"]}}}"#,
            )
            .create_async()
            .await;

        let quote = client_for(&server).fetch_quote("ETHUSD").await.unwrap();
        assert_eq!(quote.pair, "ETHUSD");
        assert_eq!(quote.ask, 2000.5);
    }

    #[tokio::test]
    async fn test_fetch_quote_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error":["EQuery:Unknown asset pair"]}"#)
            .create_async()
            .await;

        let err = client_for(&server).fetch_quote("NOPE").await.unwrap_err();

        match err {
            KrakenError::Api(errors) => assert_eq!(errors, vec!["EQuery:Unknown asset pair"]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_quote_http_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("service unavailable")
            .create_async()
            .await;

        let err = client_for(&server).fetch_quote("XBTUSD").await.unwrap_err();

        match err {
            KrakenError::Status { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "service unavailable");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_quote_malformed_ask() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error":[],"result":{"XBTUSD":{"a":["n/a","1","1.000"]}}}"#)
            .create_async()
            .await;

        let err = client_for(&server).fetch_quote("XBTUSD").await.unwrap_err();
        assert!(matches!(err, KrakenError::Malformed { field: "ask price", .. }));
    }

    #[tokio::test]
    async fn test_add_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/AddOrder")
            .match_header("API-Key", "test-key")
            .match_header("API-Sign", Matcher::Regex(r"^[A-Za-z0-9+/]+=*$".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r"^nonce=\d+&".into()),
                Matcher::Regex("&ordertype=limit&".into()),
                Matcher::Regex("&type=buy&".into()),
                Matcher::Regex("&pair=XBTUSD&".into()),
                Matcher::Regex(r"&price=95\.00$".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"error":[],"result":{"descr":{"order":"buy 10.52631579 XBTUSD @ limit 95.00"},"txid":["OUF4EM-FRGI2-MQMWZD"]}}"#,
            )
            .create_async()
            .await;

        let order = OrderRequest::limit(OrderSide::Buy, "XBTUSD", 1000.0 / 95.0, 95.0);
        let ack = client_for(&server).add_order(&order).await.unwrap();

        mock.assert_async().await;
        assert_eq!(ack.description, "buy 10.52631579 XBTUSD @ limit 95.00");
        assert_eq!(ack.txids, vec!["OUF4EM-FRGI2-MQMWZD"]);
    }

    #[tokio::test]
    async fn test_add_order_validate_only() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/AddOrder")
            .match_body(Matcher::Regex("&validate=true$".into()))
            .with_status(200)
            .with_body(r#"{"error":[],"result":{"descr":{"order":"sell 1.0 XBTUSD @ limit 105.00"}}}"#)
            .create_async()
            .await;

        let client = client_for(&server).with_validate_only(true);
        assert!(client.validate_only());

        let order = OrderRequest::limit(OrderSide::Sell, "XBTUSD", 1.0, 105.0);
        let ack = client.add_order(&order).await.unwrap();

        mock.assert_async().await;
        assert!(ack.txids.is_empty());
    }

    #[tokio::test]
    async fn test_add_order_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/0/private/AddOrder")
            .with_status(200)
            .with_body(r#"{"error":["EOrder:Insufficient funds"]}"#)
            .create_async()
            .await;

        let order = OrderRequest::limit(OrderSide::Buy, "XBTUSD", 1.0, 95.0);
        let err = client_for(&server).add_order(&order).await.unwrap_err();

        assert_eq!(err.to_string(), "Kraken rejected request: EOrder:Insufficient funds");
    }
}
