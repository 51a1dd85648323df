//! Integration tests for the Binance REST client against a mock server
//!
//! To run these tests:
//! ```
//! cargo test --test binance_integration
//! ```

mod common;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use common::api_responses;
use threshold_trader::binance::auth::sign_query;
use threshold_trader::common::rate_limit::RequestLimiter;
use threshold_trader::common::types::{ExchangeOrderStatus, OrderRequest, Side, TradingMode};
use threshold_trader::config::types::ApiCredentials;
use threshold_trader::{BinanceClient, BinanceRestClient, Exchange, RetryPolicy, TraderError};

const API_KEY: &str = "test-key";
const API_SECRET: &str = "test-secret";

/// Matches requests whose query carries a valid signature over the rest
struct ValidSignature;

impl Match for ValidSignature {
    fn matches(&self, request: &Request) -> bool {
        let query = request.url.query().unwrap_or_default();
        let Some((payload, signature)) = query.rsplit_once("&signature=") else {
            return false;
        };
        payload.contains("timestamp=")
            && payload.contains("recvWindow=")
            && sign_query(API_SECRET, payload).ok().as_deref() == Some(signature)
    }
}

fn rest_client(server: &MockServer) -> BinanceRestClient {
    BinanceRestClient::new(&server.uri(), TradingMode::Spot)
        .expect("Failed to create REST client")
        .with_credentials(ApiCredentials::new(API_KEY.into(), API_SECRET.into()))
}

fn client(server: &MockServer) -> BinanceClient {
    BinanceClient::from_rest(rest_client(server), "USDT")
}

// ============================================================================
// Public Endpoints
// ============================================================================

#[tokio::test]
async fn test_get_price() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .and(query_param("symbol", "BTCUSDT"))
        .respond_with(ResponseTemplate::new(200).set_body_string(api_responses::TICKER))
        .expect(1)
        .mount(&server)
        .await;

    let price = client(&server).get_price("BTCUSDT").await.unwrap();
    assert_eq!(price, dec!(50000.1));
}

#[tokio::test]
async fn test_symbol_filters_from_exchange_info() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/exchangeInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_string(api_responses::EXCHANGE_INFO))
        .mount(&server)
        .await;

    let filters = client(&server).symbol_filters("BTCUSDT").await.unwrap();
    assert_eq!(filters.base_asset, "BTC");
    assert_eq!(filters.tick_size, dec!(0.01));
    assert_eq!(filters.step_size, dec!(0.00001));
    assert_eq!(filters.min_notional, dec!(5));
}

#[tokio::test]
async fn test_unknown_symbol_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(ResponseTemplate::new(400).set_body_string(api_responses::BAD_SYMBOL))
        .mount(&server)
        .await;

    let err = client(&server).get_price("NOPEUSDT").await.unwrap_err();
    assert!(matches!(err, TraderError::InvalidParameter(_)), "{:?}", err);
    assert!(!err.is_transient());
}

// ============================================================================
// Signed Endpoints
// ============================================================================

#[tokio::test]
async fn test_balance_request_is_signed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .and(header("X-MBX-APIKEY", API_KEY))
        .and(ValidSignature)
        .respond_with(ResponseTemplate::new(200).set_body_string(api_responses::ACCOUNT))
        .expect(1)
        .mount(&server)
        .await;

    let balance = client(&server).get_balance("USDT").await.unwrap();
    assert_eq!(balance.free, dec!(2500));
    assert_eq!(balance.locked, dec!(10));
}

fn assert_send<T: Send>(value: T) -> T {
    value
}

#[tokio::test]
async fn test_signed_request_future_is_send() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .and(ValidSignature)
        .respond_with(ResponseTemplate::new(200).set_body_string(api_responses::ACCOUNT))
        .expect(1)
        .mount(&server)
        .await;

    // Signed calls must be spawnable on the multi-threaded runtime
    let client = std::sync::Arc::new(client(&server));
    let handle = tokio::spawn(assert_send(async move { client.get_balance("USDT").await }));
    let balance = handle.await.unwrap().unwrap();
    assert_eq!(balance.free, dec!(2500));
}

#[tokio::test]
async fn test_missing_credentials_rejected_locally() {
    let server = MockServer::start().await;
    let rest = BinanceRestClient::new(&server.uri(), TradingMode::Spot).unwrap();

    let err = rest.get_spot_account().await.unwrap_err();
    assert!(matches!(err, TraderError::Authentication(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_limit_order_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/order"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("side", "BUY"))
        .and(query_param("type", "LIMIT"))
        .and(query_param("timeInForce", "GTC"))
        .and(query_param("price", "49000"))
        .and(query_param("quantity", "0.0002"))
        .and(ValidSignature)
        .respond_with(ResponseTemplate::new(200).set_body_string(api_responses::ORDER_NEW))
        .expect(1)
        .mount(&server)
        .await;

    let request = OrderRequest::limit("BTCUSDT", Side::Buy, dec!(0.0002), dec!(49000));
    let order = client(&server).place_order(&request).await.unwrap();
    assert_eq!(order.order_id, "12345");
    assert_eq!(order.status, ExchangeOrderStatus::New);
}

#[tokio::test]
async fn test_insufficient_balance_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/order"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(api_responses::INSUFFICIENT_BALANCE),
        )
        .mount(&server)
        .await;

    let request = OrderRequest::market("BTCUSDT", Side::Buy, dec!(1));
    let err = client(&server).place_order(&request).await.unwrap_err();
    assert!(matches!(err, TraderError::InsufficientBalance(_)), "{:?}", err);
}

#[tokio::test]
async fn test_rate_limit_reads_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string(r#"{"code": -1003, "msg": "Too many requests."}"#),
        )
        .mount(&server)
        .await;

    let err = client(&server).get_price("BTCUSDT").await.unwrap_err();
    match err {
        TraderError::RateLimit {
            retry_after_seconds,
            ..
        } => assert_eq!(retry_after_seconds, Some(7)),
        other => panic!("expected rate limit, got {:?}", other),
    }
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(ResponseTemplate::new(200).set_body_string(api_responses::TICKER))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(5));
    let price = policy
        .call("get_price", || client.get_price("BTCUSDT"))
        .await
        .unwrap();
    assert_eq!(price, dec!(50000.1));
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(ResponseTemplate::new(400).set_body_string(api_responses::BAD_SYMBOL))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(5));
    let result = policy.call("get_price", || client.get_price("NOPEUSDT")).await;
    assert!(matches!(result, Err(TraderError::InvalidParameter(_))));
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test]
async fn test_requests_are_spaced_by_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/price"))
        .respond_with(ResponseTemplate::new(200).set_body_string(api_responses::TICKER))
        .expect(3)
        .mount(&server)
        .await;

    // One request per 100ms, no burst
    let rest = rest_client(&server)
        .with_rate_limiter(RequestLimiter::new(1, Duration::from_millis(100)));
    let client = BinanceClient::from_rest(rest, "USDT");

    let started = Instant::now();
    for _ in 0..3 {
        client.get_price("BTCUSDT").await.unwrap();
    }
    assert!(started.elapsed() >= Duration::from_millis(180), "{:?}", started.elapsed());
}
