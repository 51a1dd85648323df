//! REST API client for Binance spot and USDⓈ-M futures

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

use super::auth::signed_query;
use super::messages::*;
use crate::common::errors::{Result, TraderError};
use crate::common::rate_limit::RequestLimiter;
use crate::common::types::{MarginType, OrderRequest, OrderType, TradingMode};
use crate::config::types::ApiCredentials;

/// Endpoint paths that differ between spot and futures
struct Paths {
    ticker: &'static str,
    order: &'static str,
    exchange_info: &'static str,
}

const SPOT: Paths = Paths {
    ticker: "/api/v3/ticker/price",
    order: "/api/v3/order",
    exchange_info: "/api/v3/exchangeInfo",
};

const FUTURES: Paths = Paths {
    ticker: "/fapi/v1/ticker/price",
    order: "/fapi/v1/order",
    exchange_info: "/fapi/v1/exchangeInfo",
};

/// Request weight budget of a Binance IP per minute
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 1200;

/// REST API client for Binance
#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    /// HTTP client
    client: Client,
    /// Base URL of the venue (spot or futures, mainnet or testnet)
    base_url: String,
    mode: TradingMode,
    /// Optional API credentials for signed endpoints
    credentials: Option<ApiCredentials>,
    recv_window_ms: u64,
    /// Acquired before every request
    limiter: RequestLimiter,
}

impl BinanceRestClient {
    /// Create a new REST client (unauthenticated)
    pub fn new(base_url: &str, mode: TradingMode) -> Result<Self> {
        Self::with_timeout(base_url, mode, Duration::from_secs(10))
    }

    /// Create a new REST client with custom timeout
    pub fn with_timeout(base_url: &str, mode: TradingMode, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TraderError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
            credentials: None,
            recv_window_ms: 5000,
            limiter: RequestLimiter::per_minute(DEFAULT_REQUESTS_PER_MINUTE),
        })
    }

    /// Set API credentials for signed requests
    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the request budget
    pub fn with_rate_limiter(mut self, limiter: RequestLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    fn paths(&self) -> &'static Paths {
        match self.mode {
            TradingMode::Spot => &SPOT,
            TradingMode::Futures => &FUTURES,
        }
    }

    // ========================================================================
    // Public Endpoints (No Authentication Required)
    // ========================================================================

    /// Latest price for a symbol
    #[instrument(skip(self))]
    pub async fn get_ticker_price(&self, symbol: &str) -> Result<TickerPriceResponse> {
        let url = format!("{}{}?symbol={}", self.base_url, self.paths().ticker, symbol);
        debug!("Fetching price from: {}", url);
        self.limiter.acquire().await;
        let response = self.client.get(&url).send().await?;
        Self::parse(response).await
    }

    /// Trading rules; futures ignores the symbol filter so the full list is returned
    #[instrument(skip(self))]
    pub async fn get_exchange_info(&self, symbol: &str) -> Result<ExchangeInfoResponse> {
        let url = match self.mode {
            TradingMode::Spot => format!(
                "{}{}?symbol={}",
                self.base_url,
                self.paths().exchange_info,
                symbol
            ),
            TradingMode::Futures => format!("{}{}", self.base_url, self.paths().exchange_info),
        };
        debug!("Fetching exchange info from: {}", url);
        self.limiter.acquire().await;
        let response = self.client.get(&url).send().await?;
        Self::parse(response).await
    }

    // ========================================================================
    // Signed Endpoints
    // ========================================================================

    /// Spot account balances
    #[instrument(skip(self))]
    pub async fn get_spot_account(&self) -> Result<SpotAccountResponse> {
        self.signed(Method::GET, "/api/v3/account", Vec::new()).await
    }

    /// Futures wallet balances
    #[instrument(skip(self))]
    pub async fn get_futures_balances(&self) -> Result<Vec<FuturesBalance>> {
        self.signed(Method::GET, "/fapi/v2/balance", Vec::new()).await
    }

    /// Submit a new order
    #[instrument(skip(self, request), fields(symbol = %request.symbol, order_type = %request.order_type))]
    pub async fn new_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.to_string()),
            ("type", request.order_type.as_str().to_string()),
            ("quantity", request.quantity.normalize().to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
        ];
        if request.order_type == OrderType::Limit {
            if let Some(price) = request.price {
                params.push(("price", price.normalize().to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }
        if let Some(stop_price) = request.stop_price {
            params.push(("stopPrice", stop_price.normalize().to_string()));
        }
        match self.mode {
            TradingMode::Spot => params.push(("newOrderRespType", "FULL".to_string())),
            TradingMode::Futures => {
                if request.reduce_only {
                    params.push(("reduceOnly", "true".to_string()));
                }
                params.push(("newOrderRespType", "RESULT".to_string()));
            }
        }

        self.signed(Method::POST, self.paths().order, params).await
    }

    /// Cancel an open order
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        self.signed(Method::DELETE, self.paths().order, params).await
    }

    /// Query an order
    #[instrument(skip(self))]
    pub async fn query_order(&self, symbol: &str, order_id: &str) -> Result<OrderResponse> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        self.signed(Method::GET, self.paths().order, params).await
    }

    /// Set leverage for a futures symbol
    #[instrument(skip(self))]
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<serde_json::Value> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        self.signed(Method::POST, "/fapi/v1/leverage", params).await
    }

    /// Set margin type for a futures symbol
    #[instrument(skip(self))]
    pub async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
    ) -> Result<serde_json::Value> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("marginType", margin_type.as_str().to_string()),
        ];
        self.signed(Method::POST, "/fapi/v1/marginType", params).await
    }

    /// Switch between one-way and hedge mode
    #[instrument(skip(self))]
    pub async fn set_position_mode(&self, dual_side: bool) -> Result<serde_json::Value> {
        let params = vec![("dualSidePosition", dual_side.to_string())];
        self.signed(Method::POST, "/fapi/v1/positionSide/dual", params).await
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    /// Send a signed request with parameters in the query string
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            TraderError::Authentication("API key and secret are required".into())
        })?;

        self.limiter.acquire().await;

        // The serializer is not Send and must be gone before the request awaits
        let raw = {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in &params {
                query.append_pair(key, value);
            }
            query.append_pair("recvWindow", &self.recv_window_ms.to_string());
            query.append_pair("timestamp", &chrono::Utc::now().timestamp_millis().to_string());
            query.finish()
        };
        let query = signed_query(&credentials.api_secret, &raw)?;

        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(method = %method, path, "Signed request");

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        Err(map_error(status, &body, retry_after))
    }
}

/// Map an HTTP status and Binance error body onto the error taxonomy
pub fn map_error(status: StatusCode, body: &str, retry_after: Option<u64>) -> TraderError {
    let parsed: Option<ApiErrorResponse> = serde_json::from_str(body).ok();
    let (code, msg) = match &parsed {
        Some(err) => (err.code, err.msg.clone()),
        None => (0, body.to_string()),
    };

    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 || code == -1003 {
        return TraderError::RateLimit {
            message: msg,
            retry_after_seconds: retry_after,
        };
    }

    match code {
        -1021 => TraderError::Timeout(format!("timestamp outside recvWindow: {}", msg)),
        -2014 | -2015 | -1022 => TraderError::Authentication(msg),
        -2010 | -2019 if msg.to_ascii_lowercase().contains("insufficient") => {
            TraderError::InsufficientBalance(msg)
        }
        -1013 | -1199..=-1100 | -2011 | -2013 => TraderError::InvalidParameter(msg),
        _ if status.is_server_error() => {
            TraderError::Network(format!("Server returned status {}: {}", status, body))
        }
        0 => TraderError::InvalidResponse(format!("Server returned status {}: {}", status, body)),
        _ => TraderError::Exchange { code, message: msg },
    }
}
