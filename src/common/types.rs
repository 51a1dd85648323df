//! Unified types shared by the engine and its exchange collaborators

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    /// Reduce-only stop placed after a futures entry fills
    StopMarket,
    /// Reduce-only take-profit placed after a futures entry fills
    TakeProfitMarket,
}

impl OrderType {
    /// Binance wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spot or derivatives trading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Spot,
    Futures,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Spot => write!(f, "spot"),
            TradingMode::Futures => write!(f, "futures"),
        }
    }
}

/// Futures margin type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    #[default]
    Isolated,
    Cross,
}

impl MarginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginType::Isolated => "ISOLATED",
            MarginType::Cross => "CROSSED",
        }
    }
}

/// Futures position mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    #[default]
    OneWay,
    Hedge,
}

/// Reference period kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 3] = [PeriodKind::Daily, PeriodKind::Weekly, PeriodKind::Monthly];

    /// Start of the window containing `ts`.
    ///
    /// Day starts at 00:00 UTC, week on Monday 00:00 UTC, month on the 1st 00:00 UTC.
    pub fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start = match self {
            PeriodKind::Daily => date,
            PeriodKind::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            PeriodKind::Monthly => date.with_day(1).unwrap_or(date),
        };
        Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN))
    }

    /// Start of the window following the one containing `ts`
    pub fn next_window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.window_start(ts);
        match self {
            PeriodKind::Daily => start + Duration::days(1),
            PeriodKind::Weekly => start + Duration::days(7),
            PeriodKind::Monthly => {
                let date = start.date_naive();
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
                    .single()
                    .unwrap_or(start + Duration::days(31))
            }
        }
    }
}

impl std::fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodKind::Daily => write!(f, "daily"),
            PeriodKind::Weekly => write!(f, "weekly"),
            PeriodKind::Monthly => write!(f, "monthly"),
        }
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl ExchangeOrderStatus {
    /// Parse a Binance status string
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" | "PENDING_NEW" => Some(Self::New),
            "PARTIALLY_FILLED" => Some(Self::PartiallyFilled),
            "FILLED" => Some(Self::Filled),
            "CANCELED" | "PENDING_CANCEL" => Some(Self::Canceled),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Request sent to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price, `None` for market orders
    pub price: Option<Decimal>,
    /// Trigger price for stop / take-profit orders
    pub stop_price: Option<Decimal>,
    /// Reduce-only flag (futures protective orders)
    pub reduce_only: bool,
    /// Idempotency key forwarded as `newClientOrderId`
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            reduce_only: false,
            client_order_id: new_client_order_id(),
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            price: Some(price),
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn protective(
        symbol: impl Into<String>,
        order_type: OrderType,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            order_type,
            stop_price: Some(stop_price),
            reduce_only: true,
            ..Self::market(symbol, Side::Sell, quantity)
        }
    }
}

/// Generate a client order id accepted by Binance (`^[.A-Z:/a-z0-9_-]{1,36}$`)
pub fn new_client_order_id() -> String {
    format!("tt-{}", uuid::Uuid::new_v4().simple())
        .chars()
        .take(36)
        .collect()
}

/// Order snapshot returned by the exchange on placement or status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: String,
    pub symbol: String,
    pub status: ExchangeOrderStatus,
    /// Cumulative executed base quantity
    pub executed_qty: Decimal,
    /// Cumulative quote spent/received
    pub cumulative_quote: Decimal,
    /// Average fill price when anything executed
    pub avg_price: Option<Decimal>,
    /// Cumulative commission in quote units, if the exchange reports it
    pub commission: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeOrder {
    /// Average fill price, derived from cumulative quote when not reported
    pub fn average_price(&self) -> Option<Decimal> {
        self.avg_price.filter(|p| !p.is_zero()).or_else(|| {
            if self.executed_qty.is_zero() {
                None
            } else {
                Some(self.cumulative_quote / self.executed_qty)
            }
        })
    }
}

/// Free and locked balance of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Trading rules for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Permissive filters for instruments whose rules are unknown
    pub fn unrestricted(symbol: impl Into<String>, quote_asset: impl Into<String>) -> Self {
        let symbol = symbol.into();
        let quote_asset = quote_asset.into();
        let base_asset = symbol
            .strip_suffix(quote_asset.as_str())
            .unwrap_or(&symbol)
            .to_string();
        Self {
            symbol,
            base_asset,
            quote_asset,
            step_size: Decimal::new(1, 8),
            tick_size: Decimal::new(1, 8),
            min_qty: Decimal::ZERO,
            max_qty: Decimal::MAX,
            min_notional: Decimal::ZERO,
        }
    }

    /// Round a quantity down to the lot step
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        round_down_to_step(quantity, self.step_size)
    }

    /// Round a price down to the tick
    pub fn round_price(&self, price: Decimal) -> Decimal {
        round_down_to_step(price, self.tick_size)
    }
}

fn round_down_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}
