//! Engine - drives observation, sizing, ordering and persistence
//!
//! One engine owns every configured symbol. Each tick it observes prices
//! concurrently across symbols; within a symbol the window reset and the
//! ladder evaluation happen under that symbol's monitor lock so they never
//! interleave. Sizing, risk checks and fund commitment for one trigger run
//! under the portfolio write lock, so concurrent triggers across symbols
//! cannot both spend the same free balance.

use chrono::Duration as ChronoDuration;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::common::channels::EventSender;
use crate::common::errors::{Result, TraderError};
use crate::common::retry::RetryPolicy;
use crate::common::traits::{SharedClock, SharedExchange};
use crate::common::types::{SymbolFilters, TradingMode};
use crate::config::types::{AppConfig, SymbolConfig, MAX_ORDER_TIMEOUT_HOURS};
use crate::execution::{
    OrderManager, PersistedState, Portfolio, ReconcileSummary, SharedPortfolio, StateStore,
    STATE_VERSION,
};
use crate::reporting::NotificationEvent;
use crate::strategy::{
    BoxedSizeCalculator, ReserveGuardSizer, Rejection, RiskManager, SharedMonitor,
    SymbolMonitor, TriggerEvent,
};

/// A symbol that passed startup checks
struct ActiveSymbol {
    config: SymbolConfig,
    monitor: SharedMonitor,
    filters: SymbolFilters,
}

/// Outcome of one trigger after sizing and risk checks
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Submitted { order_id: String },
    Rejected(String),
    Failed(String),
}

pub struct Engine {
    config: AppConfig,
    exchange: SharedExchange,
    clock: SharedClock,
    retry: RetryPolicy,
    events: EventSender,
    portfolio: SharedPortfolio,
    orders: Arc<OrderManager>,
    sizer: BoxedSizeCalculator,
    risk: RiskManager,
    store: Option<StateStore>,
    symbols: Vec<ActiveSymbol>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        exchange: SharedExchange,
        clock: SharedClock,
        events: EventSender,
    ) -> Self {
        let mode = config.exchange.mode;
        let retry = RetryPolicy::from_config(&config.retry);
        let portfolio = Portfolio::new(
            config.exchange.quote_asset.clone(),
            config.trading.reserve_balance,
            clock.now(),
        )
        .into_shared();
        let orders = Arc::new(OrderManager::new(
            exchange.clone(),
            retry,
            portfolio.clone(),
            events.clone(),
            clock.clone(),
            mode,
            ChronoDuration::hours(
                config.engine.order_timeout_hours.min(MAX_ORDER_TIMEOUT_HOURS) as i64,
            ),
        ));
        let risk = RiskManager::new(config.risk.clone(), mode);
        let store = Some(StateStore::new(config.engine.state_path.clone()));

        Self {
            config,
            exchange,
            clock,
            retry,
            events,
            portfolio,
            orders,
            sizer: Box::new(ReserveGuardSizer::new()),
            risk,
            store,
            symbols: Vec::new(),
        }
    }

    /// Replace the sizing strategy
    pub fn with_sizer(mut self, sizer: BoxedSizeCalculator) -> Self {
        self.sizer = sizer;
        self
    }

    /// Replace (or disable, with `None`) the state file
    pub fn with_store(mut self, store: Option<StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn portfolio(&self) -> SharedPortfolio {
        self.portfolio.clone()
    }

    pub fn orders(&self) -> Arc<OrderManager> {
        self.orders.clone()
    }

    /// Monitors of the symbols that survived startup
    pub fn monitors(&self) -> Vec<SharedMonitor> {
        self.symbols.iter().map(|s| s.monitor.clone()).collect()
    }

    pub fn active_symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.config.symbol.clone()).collect()
    }

    /// Validate symbols against the exchange, configure derivatives and
    /// resume saved state.
    ///
    /// Symbols failing validation are disabled; startup fails only when none
    /// remain or the balance cannot be read. A failure is also published so
    /// it reaches the notifiers before the process exits.
    #[instrument(skip(self))]
    pub async fn startup(&mut self) -> Result<()> {
        let result = self.prepare().await;
        if let Err(e) = &result {
            error!("Startup failed: {}", e);
            self.events.publish(NotificationEvent::OperationFailed {
                operation: "startup".into(),
                symbol: None,
                error: e.to_string(),
            });
        }
        result
    }

    async fn prepare(&mut self) -> Result<()> {
        let saved = match &self.store {
            Some(store) => store.load().await?,
            None => None,
        };

        let mode = self.config.exchange.mode;
        if mode == TradingMode::Futures {
            let position_mode = self.config.futures.effective_position_mode();
            let exchange = self.exchange.clone();
            self.retry
                .call("configure_position_mode", || {
                    let exchange = exchange.clone();
                    async move { exchange.configure_position_mode(position_mode).await }
                })
                .await?;
        }

        let mut active = Vec::new();
        for config in self.config.symbol_configs() {
            if !config.enabled {
                info!(symbol = %config.symbol, "Symbol disabled in configuration");
                continue;
            }
            match self.validate_symbol(&config).await {
                Ok(filters) => {
                    let monitor = SymbolMonitor::new(config.clone()).into_shared();
                    active.push(ActiveSymbol {
                        config,
                        monitor,
                        filters,
                    });
                }
                Err(e) => {
                    error!(symbol = %config.symbol, "Disabling symbol: {}", e);
                    self.events.publish(NotificationEvent::SymbolDisabled {
                        symbol: config.symbol.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if active.is_empty() {
            return Err(TraderError::ConfigInvalid(
                "no tradable symbols after startup checks".into(),
            ));
        }
        self.symbols = active;

        self.refresh_balance().await?;

        if let Some(state) = saved {
            self.restore(state).await;
        }

        self.events.publish(NotificationEvent::Startup {
            mode,
            exchange: self.exchange.name().to_string(),
            symbols: self.active_symbols(),
            dry_run: self.config.engine.dry_run,
        });
        self.publish_balance().await;
        info!(symbols = ?self.active_symbols(), "Engine started");
        Ok(())
    }

    /// Fetch filters, check the price and set leverage for one symbol
    async fn validate_symbol(&self, config: &SymbolConfig) -> Result<SymbolFilters> {
        let symbol = config.symbol.clone();
        let exchange = self.exchange.clone();

        let filters = self
            .retry
            .call("symbol_filters", || {
                let exchange = exchange.clone();
                let symbol = symbol.clone();
                async move { exchange.symbol_filters(&symbol).await }
            })
            .await?;

        let price = self
            .retry
            .call("get_price", || {
                let exchange = exchange.clone();
                let symbol = symbol.clone();
                async move { exchange.get_price(&symbol).await }
            })
            .await?;
        if price <= Decimal::ZERO {
            return Err(TraderError::InvalidResponse(format!(
                "{} returned non-positive price {}",
                symbol, price
            )));
        }

        if self.config.exchange.mode == TradingMode::Futures {
            let (leverage, margin_type) = (config.leverage, config.margin_type);
            self.retry
                .call("configure_leverage", || {
                    let exchange = exchange.clone();
                    let symbol = symbol.clone();
                    async move {
                        exchange
                            .configure_leverage(&symbol, leverage, margin_type)
                            .await
                    }
                })
                .await?;
        }

        debug!(symbol = %symbol, %price, "Symbol validated");
        Ok(filters)
    }

    async fn restore(&self, state: PersistedState) {
        info!(
            saved_at = %state.saved_at,
            orders = state.orders.len(),
            "Resuming saved state"
        );
        for snapshot in &state.symbols {
            match self.symbols.iter().find(|s| s.config.symbol == snapshot.symbol) {
                Some(active) => active.monitor.lock().await.restore(snapshot),
                None => warn!(symbol = %snapshot.symbol, "Saved symbol is no longer active"),
            }
        }
        self.portfolio
            .write()
            .await
            .restore(state.ledger, self.clock.now());
        self.orders.restore(state.orders).await;
    }

    /// Observe every symbol once and act on fired tiers.
    ///
    /// Returns true when a window opened or a tier fired.
    pub async fn tick(&self) -> bool {
        let now = self.clock.now();
        if self.portfolio.write().await.roll_day(now) {
            info!("New trading day");
            self.publish_balance().await;
        }

        let results = join_all(self.symbols.iter().map(|s| self.tick_symbol(s))).await;
        results.into_iter().any(|changed| changed)
    }

    #[instrument(skip(self, active), fields(symbol = %active.config.symbol))]
    async fn tick_symbol(&self, active: &ActiveSymbol) -> bool {
        let symbol = active.config.symbol.clone();
        let exchange = self.exchange.clone();
        let price = match self
            .retry
            .call("get_price", || {
                let exchange = exchange.clone();
                let symbol = symbol.clone();
                async move { exchange.get_price(&symbol).await }
            })
            .await
        {
            Ok(price) => price,
            Err(e) => {
                warn!("Price fetch failed: {}", e);
                self.events.publish(NotificationEvent::OperationFailed {
                    operation: "get_price".into(),
                    symbol: Some(symbol),
                    error: e.to_string(),
                });
                return false;
            }
        };

        let now = self.clock.now();
        let (report, triggers) = active.monitor.lock().await.on_price(price, now);

        for opened in &report.opened {
            if let Some(previous) = opened.previous_reference {
                info!(
                    kind = %opened.kind,
                    reference = %opened.reference,
                    previous = %previous,
                    "Window reset"
                );
                self.events.publish(NotificationEvent::WindowReset {
                    symbol: symbol.clone(),
                    kind: opened.kind,
                    reference: opened.reference,
                    previous_reference: previous,
                });
            }
        }

        let changed = !report.opened.is_empty() || !triggers.is_empty();
        for trigger in triggers {
            self.handle_trigger(active, trigger).await;
        }
        changed
    }

    /// Size, authorize, commit and submit one fired tier
    #[instrument(skip(self, active, trigger), fields(symbol = %trigger.symbol, tier = %trigger.tier))]
    async fn handle_trigger(&self, active: &ActiveSymbol, trigger: TriggerEvent) -> TriggerOutcome {
        info!(
            drop = %trigger.drop,
            threshold = %trigger.threshold,
            price = %trigger.price,
            "Threshold triggered"
        );
        self.events.publish(NotificationEvent::ThresholdTriggered {
            symbol: trigger.symbol.clone(),
            tier: trigger.tier.clone(),
            threshold: trigger.threshold,
            drop: trigger.drop,
            price: trigger.price,
            reference: trigger.reference,
        });

        let now = self.clock.now();
        let authorized = {
            let mut portfolio = self.portfolio.write().await;
            let snapshot = portfolio.snapshot();
            let outcome = self
                .sizer
                .size(&trigger, &snapshot, &active.config, &active.filters)
                .and_then(|intent| {
                    self.risk.authorize(
                        intent,
                        portfolio.risk(),
                        portfolio.equity(),
                        &active.config,
                        &active.filters,
                        now,
                    )
                });
            match outcome {
                Ok(intent) => match portfolio.commit_intent(&intent) {
                    Ok(()) => Ok(intent),
                    Err(_) => Err(Rejection::ReserveBreach {
                        required: intent.margin,
                        available: portfolio.free(),
                        reserve: portfolio.reserve(),
                    }),
                },
                Err(rejection) => Err(rejection),
            }
        };

        let intent = match authorized {
            Ok(intent) => intent,
            Err(rejection) => {
                let reason = rejection.to_string();
                info!(reason = %reason, "Intent rejected");
                self.events.publish(NotificationEvent::IntentRejected {
                    symbol: trigger.symbol.clone(),
                    tier: trigger.tier.clone(),
                    reason: reason.clone(),
                });
                return TriggerOutcome::Rejected(reason);
            }
        };

        match self.orders.submit(intent).await {
            Ok(record) => TriggerOutcome::Submitted {
                order_id: record.order_id,
            },
            Err(e) => {
                error!("Order submission failed: {}", e);
                self.events.publish(NotificationEvent::OperationFailed {
                    operation: "place_order".into(),
                    symbol: Some(trigger.symbol.clone()),
                    error: e.to_string(),
                });
                TriggerOutcome::Failed(e.to_string())
            }
        }
    }

    /// Poll open orders and enforce expiry
    pub async fn reconcile(&self) -> ReconcileSummary {
        let summary = self.orders.reconcile().await;
        if summary.checked > 0 {
            debug!(?summary, "Reconcile pass finished");
        }
        summary
    }

    /// Replace the local free/locked view with the exchange's balance
    pub async fn refresh_balance(&self) -> Result<()> {
        let asset = self.config.exchange.quote_asset.clone();
        let exchange = self.exchange.clone();
        let balance = self
            .retry
            .call("get_balance", || {
                let exchange = exchange.clone();
                let asset = asset.clone();
                async move { exchange.get_balance(&asset).await }
            })
            .await?;
        self.portfolio
            .write()
            .await
            .apply_exchange_balance(&balance, self.clock.now());
        debug!(free = %balance.free, locked = %balance.locked, "Balance refreshed");
        Ok(())
    }

    async fn publish_balance(&self) {
        let portfolio = self.portfolio.read().await;
        self.events.publish(NotificationEvent::BalanceSnapshot {
            asset: portfolio.asset().to_string(),
            free: portfolio.free(),
            locked: portfolio.locked(),
            reserve: portfolio.reserve(),
            equity: portfolio.equity(),
        });
    }

    /// Current state as written to the state file
    pub async fn state(&self) -> PersistedState {
        let mut symbols = Vec::with_capacity(self.symbols.len());
        for active in &self.symbols {
            symbols.push(active.monitor.lock().await.snapshot());
        }
        PersistedState {
            version: STATE_VERSION,
            saved_at: self.clock.now(),
            symbols,
            orders: self.orders.open_orders().await,
            ledger: self.portfolio.read().await.ledger_state(),
        }
    }

    /// Write the state file; failures are reported, never fatal
    pub async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let state = self.state().await;
        if let Err(e) = store.save(&state).await {
            error!(path = %store.path().display(), "State save failed: {}", e);
            self.events.publish(NotificationEvent::OperationFailed {
                operation: "persist_state".into(),
                symbol: None,
                error: e.to_string(),
            });
        }
    }

    /// Run until `shutdown` flips, persisting after every mutating pass
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let engine_config = &self.config.engine;
        let mut tick_timer = interval(Duration::from_secs(engine_config.tick_interval_secs.max(1)));
        let mut reconcile_timer =
            interval(Duration::from_secs(engine_config.reconcile_interval_secs.max(1)));
        let mut balance_timer =
            interval(Duration::from_secs(engine_config.balance_refresh_secs.max(1)));
        for timer in [&mut tick_timer, &mut reconcile_timer, &mut balance_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }
        // The first balance tick fires at once; startup already refreshed it
        balance_timer.tick().await;

        info!(
            tick_secs = engine_config.tick_interval_secs,
            reconcile_secs = engine_config.reconcile_interval_secs,
            "Engine loop running"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick_timer.tick() => {
                    if self.tick().await {
                        self.persist().await;
                    }
                }
                _ = reconcile_timer.tick() => {
                    if self.reconcile().await.changed() {
                        self.persist().await;
                    }
                }
                _ = balance_timer.tick() => {
                    if let Err(e) = self.refresh_balance().await {
                        warn!("Balance refresh failed: {}", e);
                        self.events.publish(NotificationEvent::OperationFailed {
                            operation: "get_balance".into(),
                            symbol: None,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!("Engine stopping");
        self.persist().await;
        Ok(())
    }
}
