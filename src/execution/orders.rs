//! Order Lifecycle Manager
//!
//! Owns every [`OrderRecord`]. State moves only on an observed exchange
//! status, except for the expiry path which is driven by age alone:
//!
//! ```text
//! Pending ──fill──────────▶ Filled
//!    │  └──partial fill──▶ PartiallyFilled ──fill──▶ Filled
//!    │                          │
//!    └──────age > timeout───────┴──cancel once──▶ Expired
//! ```

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::common::channels::EventSender;
use crate::common::errors::{Result, TraderError};
use crate::common::retry::RetryPolicy;
use crate::common::traits::{SharedClock, SharedExchange};
use crate::common::types::{
    ExchangeOrder, ExchangeOrderStatus, OrderRequest, OrderType, Side, TradingMode,
};
use crate::execution::ledger::SharedPortfolio;
use crate::reporting::NotificationEvent;
use crate::strategy::{FeeCalculator, FeeSchedule, OrderIntent, ProtectiveLevels, TierRef};

/// Order Record state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Expired
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrderState::Pending => "pending",
            OrderState::PartiallyFilled => "partially_filled",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// What an order is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderRole {
    Entry,
    StopLoss,
    TakeProfit,
}

impl OrderRole {
    pub fn is_protective(&self) -> bool {
        !matches!(self, OrderRole::Entry)
    }
}

impl std::fmt::Display for OrderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderRole::Entry => write!(f, "entry"),
            OrderRole::StopLoss => write!(f, "stop-loss"),
            OrderRole::TakeProfit => write!(f, "take-profit"),
        }
    }
}

/// An order submitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub role: OrderRole,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub leverage: u32,
    pub state: OrderState,
    pub filled_qty: Decimal,
    /// Cumulative quote of the fills booked so far
    pub filled_quote: Decimal,
    pub fees: Decimal,
    /// Quote funds still locked for the unfilled remainder
    pub reserved: Decimal,
    pub tier: Option<TierRef>,
    pub protective: Option<ProtectiveLevels>,
    /// Entry order a protective order guards
    pub parent_id: Option<String>,
    /// Average entry of the guarded position (protective orders)
    pub entry_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: DateTime<Utc>,
    /// Set for entry limit orders only
    pub expires_at: Option<DateTime<Utc>>,
    /// Status could not be observed; re-checked next pass
    pub needs_recheck: bool,
    pub cancel_issued: bool,
    /// Entry quantity covered by live protective orders
    #[serde(default)]
    pub protected_qty: Decimal,
    /// Entry quantity already closed by a protective fill
    #[serde(default)]
    pub exited_qty: Decimal,
}

impl OrderRecord {
    pub fn remaining(&self) -> Decimal {
        (self.quantity - self.filled_qty).max(Decimal::ZERO)
    }

    /// Filled entry quantity not yet closed by a protective order
    pub fn open_position_qty(&self) -> Decimal {
        (self.filled_qty - self.exited_qty).max(Decimal::ZERO)
    }

    pub fn average_fill_price(&self) -> Option<Decimal> {
        if self.filled_qty.is_zero() {
            None
        } else {
            Some(self.filled_quote / self.filled_qty)
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }
}

/// Counters of one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub filled: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub unknown: usize,
}

impl ReconcileSummary {
    pub fn changed(&self) -> bool {
        self.filled + self.expired + self.cancelled > 0
    }
}

/// Places, observes, expires and accounts for orders
pub struct OrderManager {
    exchange: SharedExchange,
    retry: RetryPolicy,
    portfolio: SharedPortfolio,
    events: EventSender,
    clock: SharedClock,
    fees: FeeSchedule,
    mode: TradingMode,
    order_timeout: Duration,
    records: Mutex<BTreeMap<String, OrderRecord>>,
}

impl OrderManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: SharedExchange,
        retry: RetryPolicy,
        portfolio: SharedPortfolio,
        events: EventSender,
        clock: SharedClock,
        mode: TradingMode,
        order_timeout: Duration,
    ) -> Self {
        Self {
            exchange,
            retry,
            portfolio,
            events,
            clock,
            fees: FeeSchedule::for_mode(mode),
            mode,
            order_timeout,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Override the fee schedule used when the exchange omits commission
    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    /// Non-terminal records, oldest first
    pub async fn open_orders(&self) -> Vec<OrderRecord> {
        let records = self.records.lock().await;
        let mut open: Vec<OrderRecord> = records.values().cloned().collect();
        open.sort_by_key(|r| r.created_at);
        open
    }

    pub async fn get(&self, order_id: &str) -> Option<OrderRecord> {
        self.records.lock().await.get(order_id).cloned()
    }

    /// Resume tracking orders saved before a restart
    pub async fn restore(&self, saved: Vec<OrderRecord>) {
        let mut records = self.records.lock().await;
        for record in saved.into_iter().filter(|r| !r.state.is_terminal()) {
            info!(order_id = %record.order_id, symbol = %record.symbol, "Resuming order");
            records.insert(record.order_id.clone(), record);
        }
    }

    /// Place an authorized intent.
    ///
    /// The intent's margin must already be committed on the portfolio; it is
    /// rolled back when placement fails.
    #[instrument(skip(self, intent), fields(symbol = %intent.symbol, tier = %intent.tier))]
    pub async fn submit(&self, intent: OrderIntent) -> Result<OrderRecord> {
        let request = match (intent.order_type, intent.price) {
            (OrderType::Limit, Some(price)) => {
                OrderRequest::limit(&intent.symbol, intent.side, intent.quantity, price)
            }
            _ => OrderRequest::market(&intent.symbol, intent.side, intent.quantity),
        };

        let placed = match self.place(&request).await {
            Ok(placed) => placed,
            Err(e) => {
                self.portfolio.write().await.rollback_intent(&intent);
                return Err(e);
            }
        };

        let now = self.clock.now();
        let mut record = OrderRecord {
            order_id: placed.order_id.clone(),
            client_order_id: request.client_order_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            order_type: request.order_type,
            role: OrderRole::Entry,
            quantity: intent.quantity,
            price: request.price,
            stop_price: None,
            leverage: intent.leverage,
            state: OrderState::Pending,
            filled_qty: Decimal::ZERO,
            filled_quote: Decimal::ZERO,
            fees: Decimal::ZERO,
            reserved: intent.margin,
            tier: Some(intent.tier.clone()),
            protective: intent.protective,
            parent_id: None,
            entry_price: None,
            created_at: now,
            last_checked_at: now,
            expires_at: (request.order_type == OrderType::Limit)
                .then(|| now.checked_add_signed(self.order_timeout))
                .flatten(),
            needs_recheck: false,
            cancel_issued: false,
            protected_qty: Decimal::ZERO,
            exited_qty: Decimal::ZERO,
        };

        info!(
            order_id = %record.order_id,
            quantity = %record.quantity,
            price = ?record.price,
            "Order placed"
        );
        self.events.publish(NotificationEvent::OrderPlaced {
            symbol: record.symbol.clone(),
            order_id: record.order_id.clone(),
            order_type: record.order_type,
            role: record.role,
            quantity: record.quantity,
            price: record.price,
            tier: record.tier.clone(),
        });

        self.apply_observation(&mut record, &placed, now).await;
        self.store(record.clone()).await;
        Ok(record)
    }

    /// Observe one order's status and apply it.
    ///
    /// A status that cannot be observed flags the record for the next pass
    /// and surfaces [`TraderError::UnknownOrderState`].
    pub async fn poll(&self, order_id: &str) -> Result<OrderRecord> {
        let mut record = self.get(order_id).await.ok_or_else(|| {
            TraderError::Internal(format!("order {} is not tracked", order_id))
        })?;
        let result = self.poll_record(&mut record).await;
        self.store(record.clone()).await;
        result.map(|_| record)
    }

    /// One pass over every open order: expire stale entries, poll the rest
    pub async fn reconcile(&self) -> ReconcileSummary {
        let now = self.clock.now();
        let mut summary = ReconcileSummary::default();
        let open: Vec<OrderRecord> = self.records.lock().await.values().cloned().collect();

        for mut record in open {
            // A sibling may have closed this record earlier in the pass
            if let Some(current) = self.get(&record.order_id).await {
                record = current;
            } else {
                continue;
            }
            summary.checked += 1;

            if record.role == OrderRole::Entry && record.is_expired_at(now) {
                self.expire(&mut record).await;
            } else if self.poll_record(&mut record).await.is_err() {
                summary.unknown += 1;
            }

            match record.state {
                OrderState::Filled => summary.filled += 1,
                OrderState::Expired => summary.expired += 1,
                OrderState::Cancelled => summary.cancelled += 1,
                _ => {}
            }
            self.store(record).await;
        }

        if summary.checked > 0 {
            debug!(?summary, "Reconcile pass complete");
        }
        summary
    }

    async fn poll_record(&self, record: &mut OrderRecord) -> Result<()> {
        let now = self.clock.now();
        record.last_checked_at = now;

        let exchange = self.exchange.clone();
        let symbol = record.symbol.clone();
        let order_id = record.order_id.clone();
        let observed = self
            .retry
            .call("get_order_status", || {
                let exchange = exchange.clone();
                let symbol = symbol.clone();
                let order_id = order_id.clone();
                async move { exchange.get_order_status(&symbol, &order_id).await }
            })
            .await;

        match observed {
            Ok(observed) => {
                if record.needs_recheck {
                    info!(order_id = %record.order_id, "Order state recovered");
                }
                record.needs_recheck = false;
                self.apply_observation(record, &observed, now).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    order_id = %record.order_id,
                    symbol = %record.symbol,
                    "Order status unknown, flagged for re-check: {}", e
                );
                if !record.needs_recheck {
                    self.events.publish(NotificationEvent::OperationFailed {
                        operation: "get_order_status".into(),
                        symbol: Some(record.symbol.clone()),
                        error: e.to_string(),
                    });
                }
                record.needs_recheck = true;
                Err(TraderError::UnknownOrderState {
                    order_id: record.order_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Cancel a stale entry exactly once and mark it Expired.
    ///
    /// Fills seen on the final status check are booked first; an order that
    /// turns out fully filled ends Filled instead.
    async fn expire(&self, record: &mut OrderRecord) {
        let now = self.clock.now();

        if !record.cancel_issued {
            record.cancel_issued = true;
            info!(
                order_id = %record.order_id,
                symbol = %record.symbol,
                age_hours = (now - record.created_at).num_hours(),
                "Order timed out, cancelling"
            );
            if let Err(e) = self.cancel(&record.symbol, &record.order_id).await {
                warn!(order_id = %record.order_id, "Cancel of stale order failed: {}", e);
                self.events.publish(NotificationEvent::OperationFailed {
                    operation: "cancel_order".into(),
                    symbol: Some(record.symbol.clone()),
                    error: e.to_string(),
                });
            }
        }

        let exchange = self.exchange.clone();
        let symbol = record.symbol.clone();
        let order_id = record.order_id.clone();
        let last = self
            .retry
            .call("get_order_status", || {
                let exchange = exchange.clone();
                let symbol = symbol.clone();
                let order_id = order_id.clone();
                async move { exchange.get_order_status(&symbol, &order_id).await }
            })
            .await;

        match last {
            Ok(observed) if observed.status == ExchangeOrderStatus::Filled => {
                self.apply_observation(record, &observed, now).await;
                return;
            }
            Ok(observed) => {
                self.book_fills(record, &observed, now).await;
            }
            Err(e) => {
                debug!(order_id = %record.order_id, "Final status check failed: {}", e);
            }
        }

        record.last_checked_at = now;
        record.needs_recheck = false;
        self.transition(record, OrderState::Expired, now).await;
        self.events.publish(NotificationEvent::OrderExpired {
            symbol: record.symbol.clone(),
            order_id: record.order_id.clone(),
            quantity: record.quantity,
            filled_qty: record.filled_qty,
        });
    }

    /// Apply an observed exchange snapshot to a record
    async fn apply_observation(
        &self,
        record: &mut OrderRecord,
        observed: &ExchangeOrder,
        now: DateTime<Utc>,
    ) {
        self.book_fills(record, observed, now).await;

        let next = match observed.status {
            ExchangeOrderStatus::New if record.filled_qty.is_zero() => OrderState::Pending,
            ExchangeOrderStatus::New | ExchangeOrderStatus::PartiallyFilled => {
                OrderState::PartiallyFilled
            }
            ExchangeOrderStatus::Filled => OrderState::Filled,
            ExchangeOrderStatus::Canceled
            | ExchangeOrderStatus::Rejected
            | ExchangeOrderStatus::Expired => OrderState::Cancelled,
        };

        if next != record.state {
            if next == OrderState::Cancelled {
                self.events.publish(NotificationEvent::OrderCancelled {
                    symbol: record.symbol.clone(),
                    order_id: record.order_id.clone(),
                    reason: format!("exchange reported {:?}", observed.status),
                });
            }
            self.transition(record, next, now).await;
        }
    }

    /// Book the fill delta between the record and the exchange snapshot
    async fn book_fills(&self, record: &mut OrderRecord, observed: &ExchangeOrder, now: DateTime<Utc>) {
        let delta_qty = observed.executed_qty - record.filled_qty;
        if delta_qty <= Decimal::ZERO {
            return;
        }

        let mut delta_quote = observed.cumulative_quote - record.filled_quote;
        if delta_quote <= Decimal::ZERO {
            let price = observed
                .average_price()
                .or(record.price)
                .or(record.stop_price)
                .unwrap_or_default();
            delta_quote = price * delta_qty;
        }
        let price = delta_quote / delta_qty;
        let fee = match observed.commission {
            Some(total) => (total - record.fees).max(Decimal::ZERO),
            None => FeeCalculator::fee(&self.fees, record.order_type, price, delta_qty),
        };

        record.filled_qty += delta_qty;
        record.filled_quote += delta_quote;
        record.fees += fee;

        let trade = {
            let mut portfolio = self.portfolio.write().await;
            match record.role {
                OrderRole::Entry => {
                    let from_lock = record
                        .reserved
                        .min(delta_quote / Decimal::from(record.leverage.max(1)));
                    record.reserved -= from_lock;
                    portfolio.record_entry_fill(
                        &record.order_id,
                        &record.symbol,
                        delta_qty,
                        price,
                        fee,
                        record.leverage,
                        from_lock,
                        now,
                    )
                }
                OrderRole::StopLoss | OrderRole::TakeProfit => portfolio.record_exit_fill(
                    &record.order_id,
                    &record.symbol,
                    delta_qty,
                    price,
                    fee,
                    record.entry_price.unwrap_or(price),
                    record.leverage,
                    now,
                ),
            }
        };

        info!(
            order_id = %record.order_id,
            symbol = %record.symbol,
            role = %record.role,
            quantity = %delta_qty,
            price = %price,
            fee = %fee,
            "Fill recorded"
        );
        self.events.publish(NotificationEvent::TradeExecuted {
            symbol: trade.symbol,
            order_id: trade.order_id,
            side: trade.side,
            quantity: trade.quantity,
            price: trade.price,
            fee: trade.fee,
            realized_pnl: trade.realized_pnl,
        });

        if record.role == OrderRole::Entry && self.protects(record) {
            self.sync_protective(record, now).await;
        }
    }

    /// Enter `next` and run the bookkeeping of a terminal state
    async fn transition(&self, record: &mut OrderRecord, next: OrderState, now: DateTime<Utc>) {
        debug!(
            order_id = %record.order_id,
            from = %record.state,
            to = %next,
            "Order state change"
        );
        record.state = next;
        if !next.is_terminal() {
            return;
        }

        match record.role {
            OrderRole::Entry => {
                if record.reserved > Decimal::ZERO {
                    self.portfolio.write().await.release_funds(record.reserved);
                    record.reserved = Decimal::ZERO;
                }

                let guarded = record.open_position_qty() > Decimal::ZERO
                    && self.protects(record)
                    && self.sync_protective(record, now).await > 0;

                if !guarded {
                    self.portfolio.write().await.position_closed();
                }
            }
            OrderRole::StopLoss | OrderRole::TakeProfit => {
                if next == OrderState::Filled {
                    self.close_position(record).await;
                } else {
                    debug!(order_id = %record.order_id, "Protective order closed without fill");
                }
            }
        }
    }

    fn protects(&self, entry: &OrderRecord) -> bool {
        self.mode == TradingMode::Futures
            && entry.protective.map(|p| !p.is_empty()).unwrap_or(false)
    }

    /// Live protective orders guarding `parent_id`
    async fn live_children(&self, parent_id: &str) -> Vec<OrderRecord> {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.parent_id.as_deref() == Some(parent_id) && !r.state.is_terminal())
            .cloned()
            .collect()
    }

    /// Keep the entry's protective orders sized to its open position.
    ///
    /// Stop orders cannot be amended, so a grown position cancels the old
    /// pair and places a new one. Returns how many are live afterwards.
    async fn sync_protective(&self, entry: &mut OrderRecord, now: DateTime<Utc>) -> usize {
        let live = self.live_children(&entry.order_id).await;
        let open_qty = entry.open_position_qty();
        if open_qty <= Decimal::ZERO || (open_qty == entry.protected_qty && !live.is_empty()) {
            return live.len();
        }

        for mut child in live {
            if let Err(e) = self.cancel(&child.symbol, &child.order_id).await {
                warn!(order_id = %child.order_id, "Cancel of resized protective order failed: {}", e);
            }
            debug!(
                order_id = %child.order_id,
                from = %child.quantity,
                to = %open_qty,
                "Protective order replaced"
            );
            child.cancel_issued = true;
            child.state = OrderState::Cancelled;
            self.store(child).await;
        }

        let placed = self.place_protective(entry, open_qty, now).await;
        entry.protected_qty = if placed > 0 { open_qty } else { Decimal::ZERO };
        placed
    }

    /// Place reduce-only stop/take-profit orders for `quantity` of a futures entry.
    ///
    /// Returns how many were placed.
    async fn place_protective(
        &self,
        entry: &OrderRecord,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(levels) = entry.protective else {
            return 0;
        };
        let Some(entry_price) = entry.average_fill_price() else {
            return 0;
        };

        let mut placed = 0;
        for (role, order_type, level) in [
            (OrderRole::StopLoss, OrderType::StopMarket, levels.stop_loss),
            (OrderRole::TakeProfit, OrderType::TakeProfitMarket, levels.take_profit),
        ] {
            let Some(stop_price) = level else {
                continue;
            };
            let request =
                OrderRequest::protective(&entry.symbol, order_type, quantity, stop_price);

            match self.place(&request).await {
                Ok(ack) => {
                    let child = OrderRecord {
                        order_id: ack.order_id.clone(),
                        client_order_id: request.client_order_id.clone(),
                        symbol: entry.symbol.clone(),
                        side: Side::Sell,
                        order_type,
                        role,
                        quantity,
                        price: None,
                        stop_price: Some(stop_price),
                        leverage: entry.leverage,
                        state: OrderState::Pending,
                        filled_qty: Decimal::ZERO,
                        filled_quote: Decimal::ZERO,
                        fees: Decimal::ZERO,
                        reserved: Decimal::ZERO,
                        tier: entry.tier.clone(),
                        protective: None,
                        parent_id: Some(entry.order_id.clone()),
                        entry_price: Some(entry_price),
                        created_at: now,
                        last_checked_at: now,
                        expires_at: None,
                        needs_recheck: false,
                        cancel_issued: false,
                        protected_qty: Decimal::ZERO,
                        exited_qty: Decimal::ZERO,
                    };
                    info!(
                        order_id = %child.order_id,
                        parent = %entry.order_id,
                        role = %role,
                        stop_price = %stop_price,
                        "Protective order placed"
                    );
                    self.events.publish(NotificationEvent::OrderPlaced {
                        symbol: child.symbol.clone(),
                        order_id: child.order_id.clone(),
                        order_type,
                        role,
                        quantity: child.quantity,
                        price: Some(stop_price),
                        tier: child.tier.clone(),
                    });
                    self.store(child).await;
                    placed += 1;
                }
                Err(e) => {
                    error!(
                        symbol = %entry.symbol,
                        parent = %entry.order_id,
                        role = %role,
                        "Protective order failed: {}", e
                    );
                    self.events.publish(NotificationEvent::OperationFailed {
                        operation: format!("place {} order", role),
                        symbol: Some(entry.symbol.clone()),
                        error: e.to_string(),
                    });
                }
            }
        }
        placed
    }

    /// A protective order filled: the position is closed, cancel its sibling
    async fn close_position(&self, record: &OrderRecord) {
        // A still-open entry keeps the position counted until it finishes
        let entry_open = match &record.parent_id {
            Some(parent_id) => {
                let mut records = self.records.lock().await;
                match records.get_mut(parent_id) {
                    Some(parent) => {
                        parent.exited_qty += record.filled_qty;
                        parent.protected_qty = Decimal::ZERO;
                        true
                    }
                    None => false,
                }
            }
            None => false,
        };
        if !entry_open {
            self.portfolio.write().await.position_closed();
        }

        let entry_price = record.entry_price.unwrap_or_default();
        let exit_price = record.average_fill_price().unwrap_or_default();
        let realized_pnl =
            FeeCalculator::realized_pnl(entry_price, exit_price, record.filled_qty, record.fees);
        info!(
            symbol = %record.symbol,
            role = %record.role,
            pnl = %realized_pnl,
            "Position closed"
        );
        self.events.publish(NotificationEvent::PositionClosed {
            symbol: record.symbol.clone(),
            quantity: record.filled_qty,
            entry_price,
            exit_price,
            realized_pnl,
        });

        let siblings: Vec<OrderRecord> = {
            let records = self.records.lock().await;
            records
                .values()
                .filter(|r| {
                    r.order_id != record.order_id
                        && r.parent_id.is_some()
                        && r.parent_id == record.parent_id
                        && !r.state.is_terminal()
                })
                .cloned()
                .collect()
        };

        for mut sibling in siblings {
            if let Err(e) = self.cancel(&sibling.symbol, &sibling.order_id).await {
                warn!(order_id = %sibling.order_id, "Sibling cancel failed: {}", e);
            }
            sibling.cancel_issued = true;
            sibling.state = OrderState::Cancelled;
            self.events.publish(NotificationEvent::OrderCancelled {
                symbol: sibling.symbol.clone(),
                order_id: sibling.order_id.clone(),
                reason: format!("{} filled", record.role),
            });
            self.store(sibling).await;
        }
    }

    async fn place(&self, request: &OrderRequest) -> Result<ExchangeOrder> {
        let exchange = self.exchange.clone();
        self.retry
            .call("place_order", || {
                let exchange = exchange.clone();
                let request = request.clone();
                async move { exchange.place_order(&request).await }
            })
            .await
    }

    async fn cancel(&self, symbol: &str, order_id: &str) -> Result<()> {
        let exchange = self.exchange.clone();
        self.retry
            .call("cancel_order", || {
                let exchange = exchange.clone();
                let symbol = symbol.to_string();
                let order_id = order_id.to_string();
                async move { exchange.cancel_order(&symbol, &order_id).await }
            })
            .await
    }

    /// Write a record back; terminal records leave the open set
    async fn store(&self, record: OrderRecord) {
        let mut records = self.records.lock().await;
        if record.state.is_terminal() {
            records.remove(&record.order_id);
        } else {
            records.insert(record.order_id.clone(), record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::channels::create_event_channel;
    use crate::common::traits::{Clock, ManualClock};
    use crate::common::types::{AssetBalance, PeriodKind};
    use crate::execution::ledger::Portfolio;
    use crate::paper::PaperExchange;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    struct Fixture {
        exchange: Arc<PaperExchange>,
        clock: ManualClock,
        portfolio: SharedPortfolio,
        manager: OrderManager,
        events: tokio::sync::mpsc::Receiver<NotificationEvent>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 8, 0, 0).unwrap()
    }

    async fn fixture(mode: TradingMode) -> Fixture {
        let clock = ManualClock::new(start());
        let exchange = Arc::new(PaperExchange::new("USDT", dec!(10000), Decimal::ZERO));
        exchange.set_price("BTCUSDT", dec!(50000));
        let mut portfolio = Portfolio::new("USDT", dec!(2000), clock.now());
        portfolio.apply_exchange_balance(
            &AssetBalance {
                asset: "USDT".into(),
                free: dec!(10000),
                locked: Decimal::ZERO,
            },
            clock.now(),
        );
        let portfolio = portfolio.into_shared();
        let (tx, rx) = create_event_channel();
        let manager = OrderManager::new(
            exchange.clone(),
            RetryPolicy::new(2, StdDuration::from_millis(1), StdDuration::from_secs(1)),
            portfolio.clone(),
            tx,
            Arc::new(clock.clone()),
            mode,
            Duration::hours(8),
        )
        .with_fees(FeeSchedule::flat(mode, Decimal::ZERO));
        Fixture {
            exchange,
            clock,
            portfolio,
            manager,
            events: rx,
        }
    }

    fn intent(order_type: OrderType, price: Option<Decimal>, leverage: u32) -> OrderIntent {
        OrderIntent {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            quantity: dec!(0.01),
            order_type,
            price,
            reference_price: dec!(50000),
            notional: dec!(500),
            margin: dec!(500) / Decimal::from(leverage),
            leverage,
            tier: TierRef {
                kind: PeriodKind::Daily,
                level: 1,
                window_start: start(),
            },
            protective: None,
        }
    }

    async fn submit(f: &Fixture, intent: OrderIntent) -> OrderRecord {
        f.portfolio.write().await.commit_intent(&intent).unwrap();
        f.manager.submit(intent).await.unwrap()
    }

    #[tokio::test]
    async fn test_market_order_fills_on_submit() {
        let f = fixture(TradingMode::Spot).await;
        let record = submit(&f, intent(OrderType::Market, None, 1)).await;

        assert_eq!(record.state, OrderState::Filled);
        assert_eq!(record.filled_qty, dec!(0.01));
        assert!(f.manager.open_orders().await.is_empty());
        let portfolio = f.portfolio.read().await;
        assert_eq!(portfolio.trades().len(), 1);
        assert_eq!(portfolio.locked(), Decimal::ZERO);
        assert_eq!(portfolio.risk().open_positions, 0);
    }

    #[tokio::test]
    async fn test_limit_order_fills_on_poll() {
        let f = fixture(TradingMode::Spot).await;
        let record = submit(&f, intent(OrderType::Limit, Some(dec!(49000)), 1)).await;
        assert_eq!(record.state, OrderState::Pending);
        assert_eq!(f.portfolio.read().await.risk().open_positions, 1);

        f.exchange.set_price("BTCUSDT", dec!(48900));
        let polled = f.manager.poll(&record.order_id).await.unwrap();
        assert_eq!(polled.state, OrderState::Filled);
        assert_eq!(polled.average_fill_price(), Some(dec!(49000)));
        assert_eq!(f.portfolio.read().await.risk().open_positions, 0);
    }

    #[tokio::test]
    async fn test_partial_fill_then_expiry() {
        let mut f = fixture(TradingMode::Spot).await;
        let record = submit(&f, intent(OrderType::Limit, Some(dec!(49000)), 1)).await;

        f.exchange.force_partial_fill(&record.order_id, dec!(0.004));
        f.manager.reconcile().await;
        let partial = f.manager.get(&record.order_id).await.unwrap();
        assert_eq!(partial.state, OrderState::PartiallyFilled);
        assert_eq!(partial.filled_qty, dec!(0.004));

        f.clock.advance(Duration::hours(8) + Duration::seconds(1));
        let summary = f.manager.reconcile().await;
        assert_eq!(summary.expired, 1);
        assert_eq!(f.exchange.cancel_calls(&record.order_id), 1);
        assert!(f.manager.get(&record.order_id).await.is_none());

        let portfolio = f.portfolio.read().await;
        assert_eq!(portfolio.trades().len(), 1);
        assert_eq!(portfolio.locked(), Decimal::ZERO);
        // 10000 - 0.004 × 49000
        assert_eq!(portfolio.free(), dec!(9804));
        drop(portfolio);

        let mut saw_expired = false;
        while let Ok(event) = f.events.try_recv() {
            if let NotificationEvent::OrderExpired { filled_qty, .. } = event {
                assert_eq!(filled_qty, dec!(0.004));
                saw_expired = true;
            }
        }
        assert!(saw_expired);
    }

    #[tokio::test]
    async fn test_expiry_cancels_exactly_once() {
        let f = fixture(TradingMode::Spot).await;
        let record = submit(&f, intent(OrderType::Limit, Some(dec!(40000)), 1)).await;

        f.clock.advance(Duration::hours(7));
        f.manager.reconcile().await;
        assert_eq!(f.exchange.cancel_calls(&record.order_id), 0);

        f.clock.advance(Duration::hours(2));
        f.manager.reconcile().await;
        f.manager.reconcile().await;
        assert_eq!(f.exchange.cancel_calls(&record.order_id), 1);
    }

    #[tokio::test]
    async fn test_unobservable_order_is_flagged() {
        let f = fixture(TradingMode::Spot).await;
        let record = submit(&f, intent(OrderType::Limit, Some(dec!(40000)), 1)).await;

        f.exchange.fail_next(2, || TraderError::Network("connection reset".into()));
        let result = f.manager.poll(&record.order_id).await;
        assert!(matches!(result, Err(TraderError::UnknownOrderState { .. })));
        let flagged = f.manager.get(&record.order_id).await.unwrap();
        assert!(flagged.needs_recheck);
        assert_eq!(flagged.state, OrderState::Pending);

        let recovered = f.manager.poll(&record.order_id).await.unwrap();
        assert!(!recovered.needs_recheck);
    }

    #[tokio::test]
    async fn test_failed_submit_rolls_back() {
        let f = fixture(TradingMode::Spot).await;
        let intent = intent(OrderType::Limit, Some(dec!(49000)), 1);
        f.portfolio.write().await.commit_intent(&intent).unwrap();
        f.exchange
            .fail_next(1, || TraderError::InsufficientBalance("account".into()));

        assert!(f.manager.submit(intent).await.is_err());
        let portfolio = f.portfolio.read().await;
        assert_eq!(portfolio.locked(), Decimal::ZERO);
        assert_eq!(portfolio.free(), dec!(10000));
        assert_eq!(portfolio.risk().open_positions, 0);
    }

    #[tokio::test]
    async fn test_futures_stop_loss_closes_position() {
        let f = fixture(TradingMode::Futures).await;
        let mut entry = intent(OrderType::Market, None, 5);
        entry.protective = Some(ProtectiveLevels {
            stop_loss: Some(dec!(47500)),
            take_profit: Some(dec!(55000)),
        });
        let record = submit(&f, entry).await;
        assert_eq!(record.state, OrderState::Filled);

        let open = f.manager.open_orders().await;
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|r| r.role.is_protective()));
        assert_eq!(f.portfolio.read().await.risk().open_positions, 1);

        f.exchange.set_price("BTCUSDT", dec!(47400));
        f.manager.reconcile().await;

        assert!(f.manager.open_orders().await.is_empty());
        let portfolio = f.portfolio.read().await;
        assert_eq!(portfolio.risk().open_positions, 0);
        let exit = portfolio.trades().last().unwrap();
        assert_eq!(exit.side, Side::Sell);
        // (47400 - 50000) × 0.01
        assert_eq!(exit.realized_pnl, Some(dec!(-26)));
        assert_eq!(portfolio.risk().daily_loss(f.clock.now()), dec!(26));
    }

    #[tokio::test]
    async fn test_partial_futures_entry_is_protected_before_expiry() {
        let f = fixture(TradingMode::Futures).await;
        let mut entry = intent(OrderType::Limit, Some(dec!(49000)), 5);
        entry.protective = Some(ProtectiveLevels {
            stop_loss: Some(dec!(46550)),
            take_profit: Some(dec!(53900)),
        });
        let record = submit(&f, entry).await;
        assert_eq!(record.state, OrderState::Pending);
        assert_eq!(f.manager.open_orders().await.len(), 1);

        f.exchange.force_partial_fill(&record.order_id, dec!(0.004));
        f.manager.reconcile().await;

        let open = f.manager.open_orders().await;
        let children: Vec<&OrderRecord> = open.iter().filter(|r| r.role.is_protective()).collect();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.quantity == dec!(0.004)));
        assert!(children
            .iter()
            .all(|c| c.parent_id.as_deref() == Some(record.order_id.as_str())));
        let first_pair: Vec<String> = children.iter().map(|c| c.order_id.clone()).collect();

        // More of the entry fills: the pair is replaced at the new size
        f.exchange.force_partial_fill(&record.order_id, dec!(0.003));
        f.manager.reconcile().await;

        let open = f.manager.open_orders().await;
        let children: Vec<&OrderRecord> = open.iter().filter(|r| r.role.is_protective()).collect();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.quantity == dec!(0.007)));
        for old in &first_pair {
            assert_eq!(f.exchange.cancel_calls(old), 1);
            assert!(f.manager.get(old).await.is_none());
        }
        let entry = f.manager.get(&record.order_id).await.unwrap();
        assert_eq!(entry.state, OrderState::PartiallyFilled);
        assert_eq!(entry.protected_qty, dec!(0.007));

        // Expiry ends the entry but the filled part stays guarded
        f.clock.advance(Duration::hours(8) + Duration::seconds(1));
        f.manager.reconcile().await;
        assert!(f.manager.get(&record.order_id).await.is_none());
        let open = f.manager.open_orders().await;
        assert_eq!(open.iter().filter(|r| r.role.is_protective()).count(), 2);
        assert_eq!(f.portfolio.read().await.risk().open_positions, 1);
    }
}
