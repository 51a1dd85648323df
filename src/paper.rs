//! In-memory exchange for dry runs and tests
//!
//! Prices are either set by hand or pulled from a live market-data source.
//! Orders rest in memory and are matched against the last known price when
//! their status is queried.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::common::errors::{Result, TraderError};
use crate::common::traits::{Exchange, SharedExchange};
use crate::common::types::{
    AssetBalance, ExchangeOrder, ExchangeOrderStatus, MarginType, OrderRequest, OrderType, Side,
    SymbolFilters,
};

type FailureFactory = Arc<dyn Fn() -> TraderError + Send + Sync>;

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    status: ExchangeOrderStatus,
    executed_qty: Decimal,
    cumulative_quote: Decimal,
    commission: Decimal,
    /// Quote still locked for the unfilled part of a limit buy
    locked: Decimal,
    leverage: u32,
}

#[derive(Debug, Clone, Default)]
struct PaperPosition {
    quantity: Decimal,
    cost: Decimal,
}

#[derive(Default)]
struct PaperState {
    prices: HashMap<String, Decimal>,
    filters: HashMap<String, SymbolFilters>,
    free: Decimal,
    locked: Decimal,
    positions: HashMap<String, PaperPosition>,
    leverage: HashMap<String, u32>,
    orders: BTreeMap<String, PaperOrder>,
    next_id: u64,
    failures: VecDeque<FailureFactory>,
    cancel_calls: HashMap<String, usize>,
}

impl PaperState {
    fn take_failure(&mut self) -> Result<()> {
        match self.failures.pop_front() {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }

    fn price(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| TraderError::InvalidParameter(format!("Invalid symbol: {}", symbol)))
    }

    /// Book `quantity` at `price` against balances and the position
    fn fill(&mut self, order_id: &str, quantity: Decimal, price: Decimal, fee_rate: Decimal) {
        let Some(order) = self.orders.get(order_id).cloned() else {
            return;
        };
        let leverage = Decimal::from(order.leverage.max(1));
        let quote = quantity * price;
        let fee = quote * fee_rate;
        let position = self
            .positions
            .entry(order.request.symbol.clone())
            .or_default();

        match order.request.side {
            Side::Buy => {
                let margin = quote / leverage;
                let from_lock = order.locked.min(margin);
                self.locked -= from_lock;
                self.free -= margin - from_lock + fee;
                position.quantity += quantity;
                position.cost += quote;
                if let Some(order) = self.orders.get_mut(order_id) {
                    order.locked -= from_lock;
                }
            }
            Side::Sell => {
                let avg = if position.quantity.is_zero() {
                    price
                } else {
                    position.cost / position.quantity
                };
                let cost = quantity * avg;
                self.free += cost / leverage + (price - avg) * quantity - fee;
                position.quantity = (position.quantity - quantity).max(Decimal::ZERO);
                position.cost = (position.cost - cost).max(Decimal::ZERO);
            }
        }

        if let Some(order) = self.orders.get_mut(order_id) {
            order.executed_qty += quantity;
            order.cumulative_quote += quote;
            order.commission += fee;
            order.status = if order.executed_qty >= order.request.quantity {
                ExchangeOrderStatus::Filled
            } else {
                ExchangeOrderStatus::PartiallyFilled
            };
        }
    }

    /// Match a resting order against the current price
    fn try_match(&mut self, order_id: &str, fee_rate: Decimal) {
        let Some(order) = self.orders.get(order_id) else {
            return;
        };
        if !matches!(
            order.status,
            ExchangeOrderStatus::New | ExchangeOrderStatus::PartiallyFilled
        ) {
            return;
        }
        let Ok(price) = self.price(&order.request.symbol) else {
            return;
        };
        let remaining = order.request.quantity - order.executed_qty;
        let trigger = order.request.stop_price.unwrap_or_default();

        let fill_price = match (order.request.order_type, order.request.side) {
            (OrderType::Market, _) => Some(price),
            (OrderType::Limit, Side::Buy) => order.request.price.filter(|limit| price <= *limit),
            (OrderType::Limit, Side::Sell) => order.request.price.filter(|limit| price >= *limit),
            (OrderType::StopMarket, _) => (price <= trigger).then_some(price),
            (OrderType::TakeProfitMarket, _) => (price >= trigger).then_some(price),
        };

        if let Some(fill_price) = fill_price {
            self.fill(order_id, remaining, fill_price, fee_rate);
        }
    }

    fn snapshot(&self, order_id: &str) -> Result<ExchangeOrder> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| TraderError::InvalidParameter(format!("Order does not exist: {}", order_id)))?;
        Ok(ExchangeOrder {
            order_id: order_id.to_string(),
            symbol: order.request.symbol.clone(),
            status: order.status,
            executed_qty: order.executed_qty,
            cumulative_quote: order.cumulative_quote,
            avg_price: None,
            commission: Some(order.commission),
            updated_at: Utc::now(),
        })
    }
}

/// Simulated venue implementing [`Exchange`]
pub struct PaperExchange {
    quote_asset: String,
    fee_rate: Decimal,
    price_source: Option<SharedExchange>,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(quote_asset: impl Into<String>, balance: Decimal, fee_rate: Decimal) -> Self {
        Self {
            quote_asset: quote_asset.into(),
            fee_rate,
            price_source: None,
            state: Mutex::new(PaperState {
                free: balance,
                ..PaperState::default()
            }),
        }
    }

    /// Pull prices and filters from a live exchange instead of `set_price`
    pub fn with_price_source(mut self, source: SharedExchange) -> Self {
        self.price_source = Some(source);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|_| TraderError::Internal("paper exchange state poisoned".into()))
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        if let Ok(mut state) = self.state.lock() {
            state.prices.insert(symbol.to_string(), price);
        }
    }

    pub fn set_filters(&self, filters: SymbolFilters) {
        if let Ok(mut state) = self.state.lock() {
            state.filters.insert(filters.symbol.clone(), filters);
        }
    }

    /// Fill part of a resting order at its limit price
    pub fn force_partial_fill(&self, order_id: &str, quantity: Decimal) {
        if let Ok(mut state) = self.state.lock() {
            let price = state
                .orders
                .get(order_id)
                .and_then(|o| o.request.price.or(o.request.stop_price));
            if let Some(price) = price {
                state.fill(order_id, quantity, price, self.fee_rate);
            }
        }
    }

    /// Make the next `count` calls fail with errors built by `make`
    pub fn fail_next<F>(&self, count: usize, make: F)
    where
        F: Fn() -> TraderError + Send + Sync + 'static,
    {
        let make: FailureFactory = Arc::new(make);
        if let Ok(mut state) = self.state.lock() {
            for _ in 0..count {
                state.failures.push_back(make.clone());
            }
        }
    }

    /// How many cancels were requested for an order
    pub fn cancel_calls(&self, order_id: &str) -> usize {
        self.state
            .lock()
            .map(|state| state.cancel_calls.get(order_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Base quantity held per symbol
    pub fn position(&self, symbol: &str) -> Decimal {
        self.state
            .lock()
            .map(|state| {
                state
                    .positions
                    .get(symbol)
                    .map(|p| p.quantity)
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        self.lock()?.take_failure()?;
        if let Some(source) = &self.price_source {
            let price = source.get_price(symbol).await?;
            self.lock()?.prices.insert(symbol.to_string(), price);
            return Ok(price);
        }
        self.lock()?.price(symbol)
    }

    async fn get_balance(&self, asset: &str) -> Result<AssetBalance> {
        let mut state = self.lock()?;
        state.take_failure()?;
        if asset == self.quote_asset {
            return Ok(AssetBalance {
                asset: asset.to_string(),
                free: state.free,
                locked: state.locked,
            });
        }
        let base = state
            .positions
            .iter()
            .filter(|(symbol, _)| symbol.strip_suffix(self.quote_asset.as_str()) == Some(asset))
            .map(|(_, p)| p.quantity)
            .sum();
        Ok(AssetBalance {
            asset: asset.to_string(),
            free: base,
            locked: Decimal::ZERO,
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeOrder> {
        let mut state = self.lock()?;
        state.take_failure()?;
        let price = state.price(&request.symbol)?;

        if request.quantity <= Decimal::ZERO {
            return Err(TraderError::InvalidParameter("Invalid quantity".into()));
        }

        let leverage = state.leverage.get(&request.symbol).copied().unwrap_or(1);
        let mut locked = Decimal::ZERO;
        if request.side == Side::Buy {
            let quote = request.quantity * request.price.unwrap_or(price);
            let needed = quote / Decimal::from(leverage.max(1)) * (Decimal::ONE + self.fee_rate);
            if needed > state.free {
                return Err(TraderError::InsufficientBalance(format!(
                    "Account has insufficient balance for requested action: needs {}, free {}",
                    needed, state.free
                )));
            }
            if request.order_type == OrderType::Limit {
                locked = quote / Decimal::from(leverage.max(1));
                state.free -= locked;
                state.locked += locked;
            }
        }

        state.next_id += 1;
        let order_id = format!("paper-{}", state.next_id);
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                request: request.clone(),
                status: ExchangeOrderStatus::New,
                executed_qty: Decimal::ZERO,
                cumulative_quote: Decimal::ZERO,
                commission: Decimal::ZERO,
                locked,
                leverage,
            },
        );
        state.try_match(&order_id, self.fee_rate);

        debug!(
            order_id = %order_id,
            symbol = %request.symbol,
            order_type = %request.order_type,
            quantity = %request.quantity,
            "Paper order accepted"
        );
        state.snapshot(&order_id)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        *state.cancel_calls.entry(order_id.to_string()).or_default() += 1;
        state.take_failure()?;

        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| TraderError::InvalidParameter("Unknown order sent.".into()))?;
        if !matches!(
            order.status,
            ExchangeOrderStatus::New | ExchangeOrderStatus::PartiallyFilled
        ) {
            return Err(TraderError::InvalidParameter("Unknown order sent.".into()));
        }
        order.status = ExchangeOrderStatus::Canceled;
        let release = std::mem::take(&mut order.locked);
        state.locked -= release;
        state.free += release;
        Ok(())
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> Result<ExchangeOrder> {
        let mut state = self.lock()?;
        state.take_failure()?;
        state.try_match(order_id, self.fee_rate);
        state.snapshot(order_id)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        self.lock()?.take_failure()?;
        let cached = self.lock()?.filters.get(symbol).cloned();
        if let Some(filters) = cached {
            return Ok(filters);
        }
        let filters = match &self.price_source {
            Some(source) => source.symbol_filters(symbol).await?,
            None => SymbolFilters::unrestricted(symbol, self.quote_asset.clone()),
        };
        self.lock()?.filters.insert(symbol.to_string(), filters.clone());
        Ok(filters)
    }

    async fn configure_leverage(
        &self,
        symbol: &str,
        leverage: u32,
        margin_type: MarginType,
    ) -> Result<()> {
        let mut state = self.lock()?;
        state.take_failure()?;
        state.leverage.insert(symbol.to_string(), leverage.max(1));
        info!(symbol, leverage, margin_type = margin_type.as_str(), "Paper leverage set");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}
