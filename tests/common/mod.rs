//! Common test utilities and fixtures

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;

use threshold_trader::common::channels::create_event_channel;
use threshold_trader::config::load_from_str;
use threshold_trader::execution::StateStore;
use threshold_trader::{AppConfig, Engine, ManualClock, NotificationEvent, PaperExchange};

/// Wednesday morning, clear of every period boundary
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 15, 9, 0, 0).unwrap()
}

/// Spot config trading one symbol with the given extra TOML appended
pub fn spot_config(extra: &str) -> AppConfig {
    build_config("order_type = \"market\"", extra)
}

/// Config with `trading` lines added to the trading table and `extra`
/// sections appended
pub fn build_config(trading: &str, extra: &str) -> AppConfig {
    let toml = format!(
        r#"
        [trading]
        symbols = ["SOLUSDT"]
        {}

        [trading.ladders.daily]
        thresholds = [0.01, 0.02, 0.03]

        [retry]
        attempts = 2
        delay_ms = 1

        {}
        "#,
        trading, extra
    );
    load_from_str(&toml).expect("test config must parse")
}

/// Paper exchange quoting SOLUSDT at 100 with no fees
pub fn paper(balance: Decimal) -> Arc<PaperExchange> {
    let paper = Arc::new(PaperExchange::new("USDT", balance, Decimal::ZERO));
    paper.set_price("SOLUSDT", Decimal::from(100));
    paper
}

/// A started engine plus the handles tests drive it with
pub struct Harness {
    pub engine: Engine,
    pub paper: Arc<PaperExchange>,
    pub clock: Arc<ManualClock>,
    pub events: mpsc::Receiver<NotificationEvent>,
}

impl Harness {
    pub async fn start(config: AppConfig, paper: Arc<PaperExchange>) -> Self {
        Self::start_with(config, paper, Arc::new(ManualClock::new(start_time())), None).await
    }

    pub async fn start_with(
        config: AppConfig,
        paper: Arc<PaperExchange>,
        clock: Arc<ManualClock>,
        store: Option<StateStore>,
    ) -> Self {
        let (sender, events) = create_event_channel();
        let mut engine =
            Engine::new(config, paper.clone(), clock.clone(), sender).with_store(store);
        engine.startup().await.expect("engine startup");
        Self {
            engine,
            paper,
            clock,
            events,
        }
    }

    /// Move the clock, quote `price` and run one tick
    pub async fn tick_at(&self, price: Decimal) -> bool {
        self.clock.advance(chrono::Duration::minutes(1));
        self.paper.set_price("SOLUSDT", price);
        self.engine.tick().await
    }

    /// Every event published so far
    pub fn drain(&mut self) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Fired tier levels among `events`
pub fn fired_levels(events: &[NotificationEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            NotificationEvent::ThresholdTriggered { tier, .. } => Some(tier.level),
            _ => None,
        })
        .collect()
}

/// Rejection reasons among `events`
pub fn rejections(events: &[NotificationEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            NotificationEvent::IntentRejected { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .collect()
}

/// Sample Binance API responses
pub mod api_responses {
    pub const TICKER: &str = r#"{"symbol": "BTCUSDT", "price": "50000.10000000"}"#;

    pub const EXCHANGE_INFO: &str = r#"{
        "timezone": "UTC",
        "serverTime": 1715760000000,
        "symbols": [
            {
                "symbol": "BTCUSDT",
                "status": "TRADING",
                "baseAsset": "BTC",
                "quoteAsset": "USDT",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.01", "maxPrice": "1000000.00", "tickSize": "0.01"},
                    {"filterType": "LOT_SIZE", "minQty": "0.00001", "maxQty": "9000.00", "stepSize": "0.00001"},
                    {"filterType": "NOTIONAL", "minNotional": "5.00", "applyMinToMarket": true}
                ]
            }
        ]
    }"#;

    pub const ACCOUNT: &str = r#"{
        "makerCommission": 10,
        "canTrade": true,
        "balances": [
            {"asset": "BTC", "free": "0.01000000", "locked": "0.00000000"},
            {"asset": "USDT", "free": "2500.00000000", "locked": "10.00000000"}
        ]
    }"#;

    pub const ORDER_NEW: &str = r#"{
        "symbol": "BTCUSDT",
        "orderId": 12345,
        "clientOrderId": "tt-test",
        "transactTime": 1715760000000,
        "price": "49000.00",
        "origQty": "0.00020",
        "executedQty": "0.00000",
        "cummulativeQuoteQty": "0.00000",
        "status": "NEW",
        "type": "LIMIT",
        "side": "BUY",
        "fills": []
    }"#;

    pub const INSUFFICIENT_BALANCE: &str =
        r#"{"code": -2010, "msg": "Account has insufficient balance for requested action."}"#;

    pub const BAD_SYMBOL: &str = r#"{"code": -1121, "msg": "Invalid symbol."}"#;
}
