//! Trait definitions for the engine's external collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

use super::errors::Result;
use super::types::{
    AssetBalance, ExchangeOrder, MarginType, OrderRequest, PositionMode, SymbolFilters,
};
use crate::reporting::NotificationEvent;

/// Trait for exchange connectivity (Binance, paper, test doubles)
///
/// Every method is a plain point call. Retries, timeouts and error
/// classification are applied by [`crate::common::retry::RetryPolicy`]
/// around these calls, never inside them.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Latest traded price for a symbol
    async fn get_price(&self, symbol: &str) -> Result<Decimal>;

    /// Free/locked balance of a single asset
    async fn get_balance(&self, asset: &str) -> Result<AssetBalance>;

    /// Place a new order
    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeOrder>;

    /// Cancel an open order
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// Current status of an order
    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<ExchangeOrder>;

    /// Lot/tick/notional rules for a symbol
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters>;

    /// Apply leverage and margin type for a derivatives symbol.
    ///
    /// Spot connectors have nothing to configure.
    async fn configure_leverage(
        &self,
        _symbol: &str,
        _leverage: u32,
        _margin_type: MarginType,
    ) -> Result<()> {
        Ok(())
    }

    /// Switch the account between one-way and hedge position mode
    async fn configure_position_mode(&self, _mode: PositionMode) -> Result<()> {
        Ok(())
    }

    /// Name of the venue for logging
    fn name(&self) -> &'static str;
}

/// Outbound notification channel
///
/// Delivery is best-effort: callers log failures and carry on trading.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event
    async fn send(&self, event: &NotificationEvent) -> Result<()>;

    /// Name of the channel for logging
    fn channel_name(&self) -> &'static str;
}

/// Source of wall-clock time
///
/// Period boundaries and order expiry read time through this trait so tests
/// can drive them deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    /// Move forward by `by`
    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

/// Shared handles used across tasks
pub type SharedExchange = Arc<dyn Exchange>;
pub type SharedClock = Arc<dyn Clock>;
