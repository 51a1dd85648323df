//! Balance Snapshot, Risk State and the trade ledger
//!
//! All three live in one [`Portfolio`] behind a single `RwLock` so a sizing
//! decision, its risk check and the funds it locks happen under one writer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::common::errors::{Result, TraderError};
use crate::common::types::{AssetBalance, Side};
use crate::strategy::{BalanceSnapshot, FeeCalculator, OrderIntent, RiskState};

/// Immutable fill entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    /// Set on position-closing fills
    pub realized_pnl: Option<Decimal>,
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Open quantity of one symbol at cost
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub quantity: Decimal,
    /// Quantity × entry price
    pub cost: Decimal,
    /// Quote capital tied up (cost in spot, margin in futures)
    pub committed: Decimal,
}

impl Holding {
    pub fn average_price(&self) -> Option<Decimal> {
        if self.quantity.is_zero() {
            None
        } else {
            Some(self.cost / self.quantity)
        }
    }
}

/// Persisted part of the portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub risk: RiskState,
    pub trades: Vec<TradeRecord>,
    pub holdings: BTreeMap<String, Holding>,
}

/// Quote balance, risk counters and trade history
#[derive(Debug, Clone)]
pub struct Portfolio {
    asset: String,
    reserve: Decimal,
    free: Decimal,
    locked: Decimal,
    balance_updated_at: DateTime<Utc>,
    risk: RiskState,
    trades: Vec<TradeRecord>,
    holdings: BTreeMap<String, Holding>,
}

pub type SharedPortfolio = Arc<RwLock<Portfolio>>;

impl Portfolio {
    pub fn new(asset: impl Into<String>, reserve: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            asset: asset.into(),
            reserve,
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
            balance_updated_at: now,
            risk: RiskState::new(now),
            trades: Vec::new(),
            holdings: BTreeMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedPortfolio {
        Arc::new(RwLock::new(self))
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn free(&self) -> Decimal {
        self.free
    }

    pub fn locked(&self) -> Decimal {
        self.locked
    }

    pub fn reserve(&self) -> Decimal {
        self.reserve
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn holdings(&self) -> &BTreeMap<String, Holding> {
        &self.holdings
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            asset: self.asset.clone(),
            free: self.free,
            locked: self.locked,
            reserve: self.reserve,
            taken_at: self.balance_updated_at,
        }
    }

    /// Free + locked quote balance plus capital committed to open positions
    pub fn equity(&self) -> Decimal {
        self.free + self.locked + self.holdings.values().map(|h| h.committed).sum::<Decimal>()
    }

    /// Total fees paid across the ledger
    pub fn total_fees(&self) -> Decimal {
        self.trades.iter().map(|t| t.fee).sum()
    }

    /// Realized P&L across the ledger, entry fees included
    pub fn total_realized(&self) -> Decimal {
        self.trades
            .iter()
            .map(|t| t.realized_pnl.unwrap_or(-t.fee))
            .sum()
    }

    /// Overwrite the local view with the exchange's balance
    pub fn apply_exchange_balance(&mut self, balance: &AssetBalance, now: DateTime<Utc>) {
        if balance.asset != self.asset {
            warn!(
                expected = %self.asset,
                got = %balance.asset,
                "Ignoring balance for another asset"
            );
            return;
        }
        self.free = balance.free;
        self.locked = balance.locked;
        self.balance_updated_at = now;
    }

    /// Roll the daily risk counter; returns true on a new UTC day
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        self.risk.roll_day(now)
    }

    /// Lock the intent's margin and count it as an open position
    pub fn commit_intent(&mut self, intent: &OrderIntent) -> Result<()> {
        if intent.margin > self.free {
            return Err(TraderError::InsufficientBalance(format!(
                "{} needs {} {}, free {}",
                intent.symbol, intent.margin, self.asset, self.free
            )));
        }
        self.free -= intent.margin;
        self.locked += intent.margin;
        self.risk.position_opened();
        debug!(
            symbol = %intent.symbol,
            margin = %intent.margin,
            free = %self.free,
            "Funds locked for intent"
        );
        Ok(())
    }

    /// Undo [`Portfolio::commit_intent`] after a failed submission
    pub fn rollback_intent(&mut self, intent: &OrderIntent) {
        self.release_funds(intent.margin);
        self.risk.position_closed();
    }

    /// Return locked funds to free
    pub fn release_funds(&mut self, amount: Decimal) {
        let amount = amount.min(self.locked).max(Decimal::ZERO);
        self.locked -= amount;
        self.free += amount;
    }

    /// Book a buy fill that opens or grows a position.
    ///
    /// `from_lock` is the part of the order's locked funds this fill
    /// consumes; any difference to the actual capital comes from free.
    #[allow(clippy::too_many_arguments)]
    pub fn record_entry_fill(
        &mut self,
        order_id: &str,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
        leverage: u32,
        from_lock: Decimal,
        now: DateTime<Utc>,
    ) -> TradeRecord {
        let notional = quantity * price;
        let capital = notional / Decimal::from(leverage.max(1));
        let from_lock = from_lock.min(self.locked).max(Decimal::ZERO);

        self.locked -= from_lock;
        self.free += from_lock - capital - fee;

        let holding = self.holdings.entry(symbol.to_string()).or_default();
        holding.quantity += quantity;
        holding.cost += notional;
        holding.committed += capital;

        self.risk.add_exposure(symbol, notional);
        self.risk.book_pnl(-fee, now);

        self.push_trade(order_id, symbol, Side::Buy, quantity, price, fee, None, now)
    }

    /// Book a reduce-only sell fill that closes (part of) a position
    #[allow(clippy::too_many_arguments)]
    pub fn record_exit_fill(
        &mut self,
        order_id: &str,
        symbol: &str,
        quantity: Decimal,
        exit_price: Decimal,
        fee: Decimal,
        entry_price: Decimal,
        leverage: u32,
        now: DateTime<Utc>,
    ) -> TradeRecord {
        let cost = quantity * entry_price;
        let capital = cost / Decimal::from(leverage.max(1));
        let pnl = FeeCalculator::realized_pnl(entry_price, exit_price, quantity, fee);

        self.free += capital + pnl;
        if let Some(holding) = self.holdings.get_mut(symbol) {
            holding.quantity = (holding.quantity - quantity).max(Decimal::ZERO);
            holding.cost = (holding.cost - cost).max(Decimal::ZERO);
            holding.committed = (holding.committed - capital).max(Decimal::ZERO);
            if holding.quantity.is_zero() {
                self.holdings.remove(symbol);
            }
        }

        self.risk.release_exposure(symbol, cost);
        self.risk.book_pnl(pnl, now);

        self.push_trade(order_id, symbol, Side::Sell, quantity, exit_price, fee, Some(pnl), now)
    }

    /// A tracked position is no longer open
    pub fn position_closed(&mut self) {
        self.risk.position_closed();
    }

    #[allow(clippy::too_many_arguments)]
    fn push_trade(
        &mut self,
        order_id: &str,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
        realized_pnl: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> TradeRecord {
        let trade = TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            fee,
            realized_pnl,
            executed_at: now,
        };
        self.trades.push(trade.clone());
        trade
    }

    pub fn ledger_state(&self) -> LedgerState {
        LedgerState {
            risk: self.risk.clone(),
            trades: self.trades.clone(),
            holdings: self.holdings.clone(),
        }
    }

    /// Reinstate the ledger saved before a restart
    pub fn restore(&mut self, state: LedgerState, now: DateTime<Utc>) {
        self.risk = state.risk;
        self.risk.roll_day(now);
        self.trades = state.trades;
        self.holdings = state.holdings;
    }
}
