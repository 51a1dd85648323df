//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

use crate::common::errors::{Result, TraderError};
use crate::common::types::{MarginType, OrderType, PeriodKind, PositionMode, TradingMode};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchange connectivity
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Symbols, ladders and sizing
    pub trading: TradingConfig,
    /// Derivatives settings (ignored in spot mode)
    #[serde(default)]
    pub futures: FuturesConfig,
    /// Portfolio-level limits
    #[serde(default)]
    pub risk: RiskConfig,
    /// Exchange call resilience
    #[serde(default)]
    pub retry: RetryConfig,
    /// Scheduling and persistence
    #[serde(default)]
    pub engine: EngineConfig,
    /// Telegram notifications (optional)
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Exchange connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Spot or futures trading
    #[serde(default)]
    pub mode: TradingMode,
    /// Use the exchange testnet
    #[serde(default)]
    pub testnet: bool,
    /// Asset the reserve floor and trade amounts are denominated in
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// API key for authenticated requests
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret for signing requests
    #[serde(default)]
    pub api_secret: Option<String>,
    #[serde(default = "default_spot_url")]
    pub spot_url: String,
    #[serde(default = "default_spot_testnet_url")]
    pub spot_testnet_url: String,
    #[serde(default = "default_futures_url")]
    pub futures_url: String,
    #[serde(default = "default_futures_testnet_url")]
    pub futures_testnet_url: String,
    /// Signed request validity window in milliseconds
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// Request budget shared by every REST call
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Spot,
            testnet: false,
            quote_asset: default_quote_asset(),
            api_key: None,
            api_secret: None,
            spot_url: default_spot_url(),
            spot_testnet_url: default_spot_testnet_url(),
            futures_url: default_futures_url(),
            futures_testnet_url: default_futures_testnet_url(),
            recv_window_ms: default_recv_window(),
            max_requests_per_minute: default_max_requests_per_minute(),
        }
    }
}

impl ExchangeConfig {
    /// REST base URL for the configured mode and network
    pub fn base_url(&self) -> &str {
        match (self.mode, self.testnet) {
            (TradingMode::Spot, false) => &self.spot_url,
            (TradingMode::Spot, true) => &self.spot_testnet_url,
            (TradingMode::Futures, false) => &self.futures_url,
            (TradingMode::Futures, true) => &self.futures_testnet_url,
        }
    }
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_spot_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_spot_testnet_url() -> String {
    "https://testnet.binance.vision".to_string()
}

fn default_futures_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_futures_testnet_url() -> String {
    "https://testnet.binancefuture.com".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_max_requests_per_minute() -> u32 {
    1200
}

/// Threshold ladder for one period kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Drop fractions (0.01 = 1%), strictly ascending
    #[serde(default)]
    pub thresholds: Vec<Decimal>,
}

/// Ladders per period kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LadderSet {
    #[serde(default)]
    pub daily: Option<LadderConfig>,
    #[serde(default)]
    pub weekly: Option<LadderConfig>,
    #[serde(default)]
    pub monthly: Option<LadderConfig>,
}

impl LadderSet {
    pub fn get(&self, kind: PeriodKind) -> Option<&LadderConfig> {
        match kind {
            PeriodKind::Daily => self.daily.as_ref(),
            PeriodKind::Weekly => self.weekly.as_ref(),
            PeriodKind::Monthly => self.monthly.as_ref(),
        }
    }

    /// Enabled, non-empty ladders keyed by kind
    pub fn active(&self) -> BTreeMap<PeriodKind, Vec<Decimal>> {
        PeriodKind::ALL
            .iter()
            .filter_map(|kind| {
                self.get(*kind)
                    .filter(|ladder| ladder.enabled && !ladder.thresholds.is_empty())
                    .map(|ladder| (*kind, ladder.thresholds.clone()))
            })
            .collect()
    }
}

/// A configured symbol: plain name or table with overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SymbolEntry {
    Name(String),
    Detailed(SymbolOverride),
}

impl SymbolEntry {
    pub fn symbol(&self) -> &str {
        match self {
            SymbolEntry::Name(name) => name,
            SymbolEntry::Detailed(o) => &o.symbol,
        }
    }
}

/// Per-symbol overrides of the trading defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolOverride {
    pub symbol: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub ladders: Option<LadderSet>,
    #[serde(default)]
    pub order_type: Option<OrderType>,
    #[serde(default)]
    pub trade_amount: Option<Decimal>,
    #[serde(default)]
    pub use_percentage: Option<bool>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub max_position_size: Option<Decimal>,
}

/// Trading defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbols: Vec<SymbolEntry>,
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    /// Quote amount per trade, or balance fraction when `use_percentage`
    #[serde(default = "default_trade_amount")]
    pub trade_amount: Decimal,
    #[serde(default)]
    pub use_percentage: bool,
    /// Quote-asset floor sizing never touches
    #[serde(default)]
    pub reserve_balance: Decimal,
    #[serde(default)]
    pub ladders: LadderSet,
    /// Legacy flat ladder, used as the daily ladder when none is configured
    #[serde(default)]
    pub drop_thresholds: Vec<Decimal>,
    /// Limit price discount below the observed price (0.001 = 0.1%)
    #[serde(default)]
    pub limit_offset_pct: Decimal,
}

fn default_order_type() -> OrderType {
    OrderType::Limit
}

fn default_trade_amount() -> Decimal {
    dec!(10)
}

fn default_true() -> bool {
    true
}

/// Derivatives settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesConfig {
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub margin_type: MarginType,
    #[serde(default)]
    pub position_mode: PositionMode,
    /// Force hedge mode regardless of `position_mode`
    #[serde(default)]
    pub auto_hedge: bool,
    /// Maximum notional per symbol, unlimited when absent
    #[serde(default)]
    pub max_position_size: Option<Decimal>,
}

impl Default for FuturesConfig {
    fn default() -> Self {
        Self {
            leverage: default_leverage(),
            margin_type: MarginType::default(),
            position_mode: PositionMode::default(),
            auto_hedge: false,
            max_position_size: None,
        }
    }
}

impl FuturesConfig {
    pub fn effective_position_mode(&self) -> PositionMode {
        if self.auto_hedge {
            PositionMode::Hedge
        } else {
            self.position_mode
        }
    }
}

fn default_leverage() -> u32 {
    1
}

/// Maximum leverage accepted at load
pub const MAX_LEVERAGE: u32 = 125;

/// Longest order lifetime accepted in configuration (30 days)
pub const MAX_ORDER_TIMEOUT_HOURS: u64 = 720;

/// Portfolio-level risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Largest fraction of equity a single trade may commit
    #[serde(default = "default_per_trade_risk")]
    pub per_trade_risk: Decimal,
    /// Realized loss (quote units) after which entries stop for the UTC day
    #[serde(default)]
    pub daily_loss_limit: Option<Decimal>,
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            per_trade_risk: default_per_trade_risk(),
            daily_loss_limit: None,
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }
}

fn default_max_positions() -> usize {
    10
}

fn default_per_trade_risk() -> Decimal {
    Decimal::ONE
}

/// Retry wrapper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay(),
            connection_timeout_secs: default_connection_timeout(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_connection_timeout() -> u64 {
    10
}

/// Scheduling and persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Price observation cadence
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Order polling / expiry cadence
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Exchange balance refresh cadence
    #[serde(default = "default_balance_refresh")]
    pub balance_refresh_secs: u64,
    /// Unfilled limit orders are cancelled after this many hours
    #[serde(default = "default_order_timeout_hours")]
    pub order_timeout_hours: u64,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Trade against the in-process paper exchange
    #[serde(default)]
    pub dry_run: bool,
    /// Starting quote balance of the paper exchange
    #[serde(default = "default_paper_balance")]
    pub paper_balance: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            reconcile_interval_secs: default_reconcile_interval(),
            balance_refresh_secs: default_balance_refresh(),
            order_timeout_hours: default_order_timeout_hours(),
            state_path: default_state_path(),
            dry_run: false,
            paper_balance: default_paper_balance(),
        }
    }
}

fn default_tick_interval() -> u64 {
    60
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_balance_refresh() -> u64 {
    600
}

fn default_order_timeout_hours() -> u64 {
    8
}

fn default_paper_balance() -> Decimal {
    dec!(10000)
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/state.json")
}

/// Telegram configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_url")]
    pub api_url: String,
    /// Long-poll timeout for command updates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// API credentials for authenticated requests
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }
}

/// Fixed notional or fraction of free balance, never both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    Fixed(Decimal),
    Percentage(Decimal),
}

/// Resolved, immutable per-symbol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub enabled: bool,
    pub ladders: BTreeMap<PeriodKind, Vec<Decimal>>,
    pub order_type: OrderType,
    pub sizing: SizingMode,
    pub limit_offset_pct: Decimal,
    /// 1 in spot mode
    pub leverage: u32,
    pub margin_type: MarginType,
    pub max_position_size: Option<Decimal>,
}

impl AppConfig {
    /// Ladders after applying the legacy flat list
    fn default_ladders(&self) -> LadderSet {
        let mut ladders = self.trading.ladders.clone();
        if !self.trading.drop_thresholds.is_empty() {
            if ladders.daily.is_some() {
                warn!("Both trading.ladders.daily and trading.drop_thresholds are set; using the daily ladder");
            } else {
                ladders.daily = Some(LadderConfig {
                    enabled: true,
                    thresholds: self.trading.drop_thresholds.clone(),
                });
            }
        }
        ladders
    }

    /// Resolve every configured symbol against the trading defaults
    pub fn symbol_configs(&self) -> Vec<SymbolConfig> {
        let defaults = self.default_ladders();
        let futures = self.exchange.mode == TradingMode::Futures;

        self.trading
            .symbols
            .iter()
            .map(|entry| {
                let ov = match entry {
                    SymbolEntry::Name(_) => None,
                    SymbolEntry::Detailed(o) => Some(o),
                };
                let ladders = ov
                    .and_then(|o| o.ladders.as_ref())
                    .unwrap_or(&defaults)
                    .active();
                let amount = ov
                    .and_then(|o| o.trade_amount)
                    .unwrap_or(self.trading.trade_amount);
                let use_percentage = ov
                    .and_then(|o| o.use_percentage)
                    .unwrap_or(self.trading.use_percentage);
                let sizing = if use_percentage {
                    SizingMode::Percentage(amount)
                } else {
                    SizingMode::Fixed(amount)
                };
                let leverage = if futures {
                    ov.and_then(|o| o.leverage).unwrap_or(self.futures.leverage)
                } else {
                    1
                };
                let max_position_size = if futures {
                    ov.and_then(|o| o.max_position_size)
                        .or(self.futures.max_position_size)
                } else {
                    None
                };

                SymbolConfig {
                    symbol: entry.symbol().to_uppercase(),
                    enabled: ov.and_then(|o| o.enabled).unwrap_or(true),
                    ladders,
                    order_type: ov.and_then(|o| o.order_type).unwrap_or(self.trading.order_type),
                    sizing,
                    limit_offset_pct: self.trading.limit_offset_pct,
                    leverage,
                    margin_type: self.futures.margin_type,
                    max_position_size,
                }
            })
            .collect()
    }

    /// Validate values once at load; any failure prevents startup
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TraderError::ConfigInvalid(msg));

        if self.trading.symbols.is_empty() {
            return invalid("trading.symbols must not be empty".into());
        }
        if self.exchange.quote_asset.trim().is_empty() {
            return invalid("exchange.quote_asset must not be empty".into());
        }
        if self.trading.reserve_balance < Decimal::ZERO {
            return invalid("trading.reserve_balance must be >= 0".into());
        }
        if self.trading.limit_offset_pct < Decimal::ZERO
            || self.trading.limit_offset_pct >= Decimal::ONE
        {
            return invalid("trading.limit_offset_pct must be in [0, 1)".into());
        }
        validate_thresholds("trading.drop_thresholds", &self.trading.drop_thresholds)?;
        validate_ladder_set("trading.ladders", &self.trading.ladders)?;

        let mut seen = std::collections::HashSet::new();
        for entry in &self.trading.symbols {
            let symbol = entry.symbol();
            if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                return invalid(format!("invalid symbol '{}'", symbol));
            }
            if !seen.insert(symbol.to_uppercase()) {
                return invalid(format!("symbol '{}' listed twice", symbol));
            }
            if let SymbolEntry::Detailed(o) = entry {
                if let Some(ladders) = &o.ladders {
                    validate_ladder_set(&format!("{}.ladders", symbol), ladders)?;
                }
                if let Some(leverage) = o.leverage {
                    validate_leverage(leverage)?;
                }
            }
        }

        for cfg in self.symbol_configs() {
            match cfg.sizing {
                SizingMode::Fixed(amount) if amount <= Decimal::ZERO => {
                    return invalid(format!("{}: trade_amount must be > 0", cfg.symbol));
                }
                SizingMode::Percentage(pct) if pct <= Decimal::ZERO || pct > Decimal::ONE => {
                    return invalid(format!(
                        "{}: percentage trade_amount must be in (0, 1]",
                        cfg.symbol
                    ));
                }
                _ => {}
            }
            if cfg.enabled && cfg.ladders.is_empty() {
                return invalid(format!("{}: no enabled threshold ladder", cfg.symbol));
            }
            if let Some(max) = cfg.max_position_size {
                if max <= Decimal::ZERO {
                    return invalid(format!("{}: max_position_size must be > 0", cfg.symbol));
                }
            }
        }

        validate_leverage(self.futures.leverage)?;

        if self.risk.max_positions == 0 {
            return invalid("risk.max_positions must be >= 1".into());
        }
        if self.risk.per_trade_risk <= Decimal::ZERO || self.risk.per_trade_risk > Decimal::ONE {
            return invalid("risk.per_trade_risk must be in (0, 1]".into());
        }
        if let Some(limit) = self.risk.daily_loss_limit {
            if limit <= Decimal::ZERO {
                return invalid("risk.daily_loss_limit must be > 0".into());
            }
        }
        for (name, value) in [
            ("risk.stop_loss_pct", self.risk.stop_loss_pct),
            ("risk.take_profit_pct", self.risk.take_profit_pct),
        ] {
            if let Some(pct) = value {
                if pct <= Decimal::ZERO || pct >= Decimal::ONE {
                    return invalid(format!("{} must be in (0, 1)", name));
                }
            }
        }

        if self.retry.attempts == 0 {
            return invalid("retry.attempts must be >= 1".into());
        }
        if self.retry.connection_timeout_secs == 0 {
            return invalid("retry.connection_timeout_secs must be >= 1".into());
        }
        if self.engine.tick_interval_secs == 0 || self.engine.reconcile_interval_secs == 0 {
            return invalid("engine intervals must be >= 1 second".into());
        }
        if self.engine.order_timeout_hours == 0
            || self.engine.order_timeout_hours > MAX_ORDER_TIMEOUT_HOURS
        {
            return invalid(format!(
                "engine.order_timeout_hours must be in 1..={}",
                MAX_ORDER_TIMEOUT_HOURS
            ));
        }
        if self.exchange.max_requests_per_minute == 0 {
            return invalid("exchange.max_requests_per_minute must be >= 1".into());
        }

        for url in [self.exchange.base_url()]
            .into_iter()
            .chain(self.telegram.as_ref().map(|t| t.api_url.as_str()))
        {
            url::Url::parse(url)
                .map_err(|e| TraderError::ConfigInvalid(format!("invalid url '{}': {}", url, e)))?;
        }
        if let Some(telegram) = self.telegram.as_ref().filter(|t| t.enabled) {
            if telegram.token.is_empty() || telegram.chat_id.is_empty() {
                return invalid("telegram.token and telegram.chat_id must be set".into());
            }
        }

        Ok(())
    }
}

fn validate_leverage(leverage: u32) -> Result<()> {
    if leverage == 0 || leverage > MAX_LEVERAGE {
        return Err(TraderError::ConfigInvalid(format!(
            "leverage must be in 1..={}",
            MAX_LEVERAGE
        )));
    }
    Ok(())
}

fn validate_ladder_set(name: &str, ladders: &LadderSet) -> Result<()> {
    for kind in PeriodKind::ALL {
        if let Some(ladder) = ladders.get(kind) {
            validate_thresholds(&format!("{}.{}", name, kind), &ladder.thresholds)?;
        }
    }
    Ok(())
}

fn validate_thresholds(name: &str, thresholds: &[Decimal]) -> Result<()> {
    for (i, t) in thresholds.iter().enumerate() {
        if *t <= Decimal::ZERO || *t >= Decimal::ONE {
            return Err(TraderError::ConfigInvalid(format!(
                "{}: threshold {} must be in (0, 1)",
                name, t
            )));
        }
        if i > 0 && *t <= thresholds[i - 1] {
            return Err(TraderError::ConfigInvalid(format!(
                "{}: thresholds must be strictly ascending",
                name
            )));
        }
    }
    Ok(())
}
