//! Binance wire types for spot and USDⓈ-M futures

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// `/ticker/price` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerPriceResponse {
    pub symbol: String,
    pub price: String,
}

/// `/api/v3/account` response (fields we read)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotAccountResponse {
    pub balances: Vec<SpotBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotBalance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

/// Entry of the `/fapi/v2/balance` array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesBalance {
    pub asset: String,
    pub balance: String,
    pub available_balance: String,
}

/// Spot fill inside a FULL order response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub price: String,
    pub qty: String,
    pub commission: String,
    pub commission_asset: String,
}

/// Order response shared by place/query/cancel on both venues
///
/// Spot reports `cummulativeQuoteQty` and `fills`; futures reports
/// `cumQuote` and `avgPrice`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub executed_qty: Option<String>,
    #[serde(default)]
    pub cummulative_quote_qty: Option<String>,
    #[serde(default)]
    pub cum_quote: Option<String>,
    #[serde(default)]
    pub avg_price: Option<String>,
    #[serde(default)]
    pub fills: Option<Vec<OrderFill>>,
    #[serde(default)]
    pub transact_time: Option<i64>,
    #[serde(default)]
    pub update_time: Option<i64>,
}

/// `/exchangeInfo` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Filters we apply; the rest are ignored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    PriceFilter { tick_size: String },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        step_size: String,
        min_qty: String,
        max_qty: String,
    },
    /// Spot uses `minNotional`, futures `notional`
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional {
        #[serde(alias = "notional")]
        min_notional: Option<String>,
    },
    #[serde(rename = "NOTIONAL", rename_all = "camelCase")]
    Notional { min_notional: Option<String> },
    #[serde(other)]
    Other,
}

/// Parse a Binance decimal string
pub fn parse_decimal(value: &str, field: &str) -> crate::common::errors::Result<Decimal> {
    value.parse().map_err(|e| {
        crate::common::errors::TraderError::InvalidResponse(format!(
            "Invalid {} '{}': {}",
            field, value, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spot_full_order() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "orderId": 28,
            "clientOrderId": "tt-abc",
            "transactTime": 1507725176595,
            "price": "0.00000000",
            "origQty": "0.01000000",
            "executedQty": "0.01000000",
            "cummulativeQuoteQty": "500.00000000",
            "status": "FILLED",
            "type": "MARKET",
            "side": "BUY",
            "fills": [
                {"price": "50000.00", "qty": "0.01", "commission": "0.5", "commissionAsset": "USDT", "tradeId": 56}
            ]
        }"#;
        let order: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(order.order_id, 28);
        assert_eq!(order.fills.unwrap().len(), 1);
        assert_eq!(order.cummulative_quote_qty.as_deref(), Some("500.00000000"));
    }

    #[test]
    fn test_parse_filters_skips_unknown() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "status": "TRADING",
            "baseAsset": "BTC",
            "quoteAsset": "USDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "minPrice": "0.01", "maxPrice": "1000000", "tickSize": "0.01"},
                {"filterType": "LOT_SIZE", "minQty": "0.00001", "maxQty": "9000", "stepSize": "0.00001"},
                {"filterType": "ICEBERG_PARTS", "limit": 10},
                {"filterType": "NOTIONAL", "minNotional": "5.00", "applyMinToMarket": true}
            ]
        }"#;
        let info: SymbolInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.filters.len(), 4);
        assert!(matches!(info.filters[2], SymbolFilter::Other));
    }

    #[test]
    fn test_futures_min_notional_alias() {
        let json = r#"{"filterType": "MIN_NOTIONAL", "notional": "100"}"#;
        let filter: SymbolFilter = serde_json::from_str(json).unwrap();
        match filter {
            SymbolFilter::MinNotional { min_notional } => {
                assert_eq!(min_notional.as_deref(), Some("100"))
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }
}
