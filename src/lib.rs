//! ThresholdTrader Library
//!
//! Watches Binance spot or USDⓈ-M futures prices, tracks daily, weekly and
//! monthly reference prices, and buys when the drop below a reference
//! crosses a configured threshold tier.

pub mod binance;
pub mod common;
pub mod config;
pub mod engine;
pub mod execution;
pub mod paper;
pub mod reporting;
pub mod strategy;
pub mod telegram;

// Re-export commonly used types
pub use binance::{BinanceClient, BinanceRestClient};
pub use common::errors::{Result, TraderError};
pub use common::retry::RetryPolicy;
pub use common::traits::{Clock, Exchange, ManualClock, Notifier, SystemClock};
pub use common::types::{
    AssetBalance, ExchangeOrder, ExchangeOrderStatus, OrderRequest, OrderType, PeriodKind, Side,
    SymbolFilters, TradingMode,
};
pub use config::types::AppConfig;
pub use engine::{Engine, TriggerOutcome};
pub use execution::{OrderManager, OrderRecord, OrderState, Portfolio, StateStore};
pub use paper::PaperExchange;
pub use reporting::{Command, CommandHandler, LogNotifier, NotificationEvent};
pub use telegram::{CommandListener, TelegramClient, TelegramNotifier};

// Strategy types
pub use strategy::{
    BoxedSizeCalculator, OrderIntent, Rejection, ReserveGuardSizer, RiskManager, SizeCalculator,
    SymbolMonitor, ThresholdLadder, TriggerEvent,
};
