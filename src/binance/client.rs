//! Binance implementation of the [`Exchange`] trait

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use super::messages::{parse_decimal, OrderResponse, SymbolFilter, SymbolInfo};
use super::rest::BinanceRestClient;
use crate::common::errors::{Result, TraderError};
use crate::common::rate_limit::RequestLimiter;
use crate::common::traits::Exchange;
use crate::common::types::{
    AssetBalance, ExchangeOrder, ExchangeOrderStatus, MarginType, OrderRequest, PositionMode,
    SymbolFilters, TradingMode,
};
use crate::config::types::{ApiCredentials, ExchangeConfig};

/// "No need to change margin type"
const MARGIN_TYPE_UNCHANGED: i64 = -4046;
/// "No need to change position side"
const POSITION_MODE_UNCHANGED: i64 = -4059;

/// Binance spot or USDⓈ-M futures account
pub struct BinanceClient {
    rest_client: BinanceRestClient,
    quote_asset: String,
}

impl BinanceClient {
    /// Create a client from configuration; keys are optional for market data
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let rest_client = BinanceRestClient::new(config.base_url(), config.mode)?
            .with_recv_window(config.recv_window_ms)
            .with_rate_limiter(RequestLimiter::per_minute(config.max_requests_per_minute));

        let rest_client = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) => {
                rest_client.with_credentials(ApiCredentials::new(key.clone(), secret.clone()))
            }
            _ => rest_client,
        };

        Ok(Self::from_rest(rest_client, config.quote_asset.clone()))
    }

    pub fn from_rest(rest_client: BinanceRestClient, quote_asset: impl Into<String>) -> Self {
        Self {
            rest_client,
            quote_asset: quote_asset.into(),
        }
    }

    /// Get a reference to the REST client
    pub fn rest(&self) -> &BinanceRestClient {
        &self.rest_client
    }

    fn to_exchange_order(&self, response: OrderResponse) -> Result<ExchangeOrder> {
        let status = ExchangeOrderStatus::parse(&response.status).ok_or_else(|| {
            TraderError::InvalidResponse(format!("Unknown order status: {}", response.status))
        })?;
        let executed_qty = optional_decimal(response.executed_qty.as_deref(), "executedQty")?;
        let cumulative_quote = optional_decimal(
            response
                .cummulative_quote_qty
                .as_deref()
                .or(response.cum_quote.as_deref()),
            "cumulative quote",
        )?;
        let avg_price = match response.avg_price.as_deref() {
            Some(value) => Some(parse_decimal(value, "avgPrice")?).filter(|p| !p.is_zero()),
            None => None,
        };
        let commission = self.commission_in_quote(&response)?;
        let updated_at = response
            .update_time
            .or(response.transact_time)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Ok(ExchangeOrder {
            order_id: response.order_id.to_string(),
            symbol: response.symbol,
            status,
            executed_qty,
            cumulative_quote,
            avg_price,
            commission,
            updated_at,
        })
    }

    /// Commission converted to quote units when every fill allows it
    fn commission_in_quote(&self, response: &OrderResponse) -> Result<Option<Decimal>> {
        let Some(fills) = response.fills.as_ref().filter(|f| !f.is_empty()) else {
            return Ok(None);
        };
        let base_asset = response
            .symbol
            .strip_suffix(self.quote_asset.as_str())
            .unwrap_or_default();

        let mut total = Decimal::ZERO;
        for fill in fills {
            let commission = parse_decimal(&fill.commission, "commission")?;
            if fill.commission_asset == self.quote_asset {
                total += commission;
            } else if !base_asset.is_empty() && fill.commission_asset == base_asset {
                total += commission * parse_decimal(&fill.price, "fill price")?;
            } else {
                // Paid in a third asset (BNB); leave it to the fee schedule
                return Ok(None);
            }
        }
        Ok(Some(total))
    }
}

fn optional_decimal(value: Option<&str>, field: &str) -> Result<Decimal> {
    match value {
        Some(value) => parse_decimal(value, field),
        None => Ok(Decimal::ZERO),
    }
}

/// Build [`SymbolFilters`] from an exchangeInfo entry
pub fn filters_from_info(info: &SymbolInfo) -> Result<SymbolFilters> {
    let mut filters = SymbolFilters::unrestricted(info.symbol.clone(), info.quote_asset.clone());
    filters.base_asset = info.base_asset.clone();

    for filter in &info.filters {
        match filter {
            SymbolFilter::PriceFilter { tick_size } => {
                filters.tick_size = parse_decimal(tick_size, "tickSize")?;
            }
            SymbolFilter::LotSize {
                step_size,
                min_qty,
                max_qty,
            } => {
                filters.step_size = parse_decimal(step_size, "stepSize")?;
                filters.min_qty = parse_decimal(min_qty, "minQty")?;
                filters.max_qty = parse_decimal(max_qty, "maxQty")?;
            }
            SymbolFilter::MinNotional {
                min_notional: Some(value),
            }
            | SymbolFilter::Notional {
                min_notional: Some(value),
            } => {
                filters.min_notional = filters
                    .min_notional
                    .max(parse_decimal(value, "minNotional")?);
            }
            _ => {}
        }
    }
    Ok(filters)
}

/// Treat a specific "nothing to change" exchange code as success
fn accept_unchanged<T>(result: Result<T>, code: i64) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(TraderError::Exchange { code: c, .. }) if c == code => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let ticker = self.rest_client.get_ticker_price(symbol).await?;
        parse_decimal(&ticker.price, "price")
    }

    async fn get_balance(&self, asset: &str) -> Result<AssetBalance> {
        match self.rest_client.mode() {
            TradingMode::Spot => {
                let account = self.rest_client.get_spot_account().await?;
                match account.balances.iter().find(|b| b.asset == asset) {
                    Some(balance) => Ok(AssetBalance {
                        asset: asset.to_string(),
                        free: parse_decimal(&balance.free, "free")?,
                        locked: parse_decimal(&balance.locked, "locked")?,
                    }),
                    None => Ok(AssetBalance {
                        asset: asset.to_string(),
                        free: Decimal::ZERO,
                        locked: Decimal::ZERO,
                    }),
                }
            }
            TradingMode::Futures => {
                let balances = self.rest_client.get_futures_balances().await?;
                match balances.iter().find(|b| b.asset == asset) {
                    Some(balance) => {
                        let total = parse_decimal(&balance.balance, "balance")?;
                        let available =
                            parse_decimal(&balance.available_balance, "availableBalance")?;
                        Ok(AssetBalance {
                            asset: asset.to_string(),
                            free: available,
                            locked: (total - available).max(Decimal::ZERO),
                        })
                    }
                    None => Ok(AssetBalance {
                        asset: asset.to_string(),
                        free: Decimal::ZERO,
                        locked: Decimal::ZERO,
                    }),
                }
            }
        }
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeOrder> {
        let response = self.rest_client.new_order(request).await?;
        self.to_exchange_order(response)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        self.rest_client.cancel_order(symbol, order_id).await?;
        Ok(())
    }

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<ExchangeOrder> {
        let response = self.rest_client.query_order(symbol, order_id).await?;
        self.to_exchange_order(response)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let exchange_info = self.rest_client.get_exchange_info(symbol).await?;
        let info = exchange_info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| TraderError::InvalidParameter(format!("Invalid symbol: {}", symbol)))?;
        if info.status != "TRADING" {
            return Err(TraderError::InvalidParameter(format!(
                "{} is not trading (status {})",
                symbol, info.status
            )));
        }
        filters_from_info(info)
    }

    #[instrument(skip(self))]
    async fn configure_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        margin_type: MarginType,
    ) -> Result<()> {
        if self.rest_client.mode() != TradingMode::Futures {
            return Ok(());
        }
        self.rest_client.set_leverage(symbol, leverage).await?;
        accept_unchanged(
            self.rest_client.set_margin_type(symbol, margin_type).await,
            MARGIN_TYPE_UNCHANGED,
        )?;
        info!(symbol, leverage, margin_type = margin_type.as_str(), "Futures symbol configured");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn configure_position_mode(&self, mode: PositionMode) -> Result<()> {
        if self.rest_client.mode() != TradingMode::Futures {
            return Ok(());
        }
        accept_unchanged(
            self.rest_client
                .set_position_mode(mode == PositionMode::Hedge)
                .await,
            POSITION_MODE_UNCHANGED,
        )?;
        info!(?mode, "Position mode set");
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self.rest_client.mode() {
            TradingMode::Spot => "binance-spot",
            TradingMode::Futures => "binance-futures",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::messages::OrderFill;
    use rust_decimal_macros::dec;

    fn client() -> BinanceClient {
        BinanceClient::new(&ExchangeConfig::default()).unwrap()
    }

    fn response(fills: Option<Vec<OrderFill>>) -> OrderResponse {
        OrderResponse {
            symbol: "BTCUSDT".into(),
            order_id: 42,
            client_order_id: None,
            status: "PARTIALLY_FILLED".into(),
            executed_qty: Some("0.004".into()),
            cummulative_quote_qty: Some("196".into()),
            cum_quote: None,
            avg_price: None,
            fills,
            transact_time: Some(1_715_760_000_000),
            update_time: None,
        }
    }

    fn fill(commission: &str, asset: &str) -> OrderFill {
        OrderFill {
            price: "49000".into(),
            qty: "0.004".into(),
            commission: commission.into(),
            commission_asset: asset.into(),
        }
    }

    #[test]
    fn test_order_conversion() {
        let order = client().to_exchange_order(response(None)).unwrap();
        assert_eq!(order.order_id, "42");
        assert_eq!(order.status, ExchangeOrderStatus::PartiallyFilled);
        assert_eq!(order.average_price(), Some(dec!(49000)));
        assert_eq!(order.commission, None);
    }

    #[test]
    fn test_base_asset_commission_converted() {
        let order = client()
            .to_exchange_order(response(Some(vec![fill("0.000004", "BTC")])))
            .unwrap();
        assert_eq!(order.commission, Some(dec!(0.196)));
    }

    #[test]
    fn test_third_asset_commission_left_to_schedule() {
        let order = client()
            .to_exchange_order(response(Some(vec![fill("0.0001", "BNB")])))
            .unwrap();
        assert_eq!(order.commission, None);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut bad = response(None);
        bad.status = "WEIRD".into();
        assert!(matches!(
            client().to_exchange_order(bad),
            Err(TraderError::InvalidResponse(_))
        ));
    }
}
