//! Risk Manager and the Risk State it reads
//!
//! Checks run in a fixed order: open positions, per-trade risk, daily loss,
//! then (futures only) protective levels and the per-symbol size cap.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::types::{PeriodKind, SymbolFilters, TradingMode};
use crate::config::types::{RiskConfig, SymbolConfig};
use crate::strategy::types::{OrderIntent, ProtectiveLevels, Rejection, RiskRejection};

/// Portfolio-level risk counters
///
/// Mutated only through the ledger on order and fill events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    /// Active entry orders plus unclosed futures positions
    pub open_positions: usize,
    /// Realized P&L (fees included) since `day_start`
    pub realized_pnl_today: Decimal,
    /// UTC day the P&L counter belongs to
    pub day_start: DateTime<Utc>,
    /// Symbol → open notional at cost
    pub exposure: BTreeMap<String, Decimal>,
}

impl RiskState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            open_positions: 0,
            realized_pnl_today: Decimal::ZERO,
            day_start: PeriodKind::Daily.window_start(now),
            exposure: BTreeMap::new(),
        }
    }

    /// Reset the daily counter when `now` is past the stored day.
    ///
    /// Returns true when a reset happened.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = PeriodKind::Daily.window_start(now);
        if today > self.day_start {
            self.day_start = today;
            self.realized_pnl_today = Decimal::ZERO;
            true
        } else {
            false
        }
    }

    /// Realized loss for the day containing `now`, zero when in profit
    pub fn daily_loss(&self, now: DateTime<Utc>) -> Decimal {
        if PeriodKind::Daily.window_start(now) > self.day_start {
            return Decimal::ZERO;
        }
        (-self.realized_pnl_today).max(Decimal::ZERO)
    }

    pub fn book_pnl(&mut self, pnl: Decimal, now: DateTime<Utc>) {
        self.roll_day(now);
        self.realized_pnl_today += pnl;
    }

    pub fn exposure_for(&self, symbol: &str) -> Decimal {
        self.exposure.get(symbol).copied().unwrap_or_default()
    }

    pub fn add_exposure(&mut self, symbol: &str, notional: Decimal) {
        *self.exposure.entry(symbol.to_string()).or_default() += notional;
    }

    pub fn release_exposure(&mut self, symbol: &str, notional: Decimal) {
        if let Some(current) = self.exposure.get_mut(symbol) {
            *current = (*current - notional).max(Decimal::ZERO);
            if current.is_zero() {
                self.exposure.remove(symbol);
            }
        }
    }

    pub fn position_opened(&mut self) {
        self.open_positions += 1;
    }

    pub fn position_closed(&mut self) {
        self.open_positions = self.open_positions.saturating_sub(1);
    }
}

/// Gatekeeper for every order intent
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    mode: TradingMode,
}

impl RiskManager {
    pub fn new(config: RiskConfig, mode: TradingMode) -> Self {
        Self { config, mode }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Authorize `intent` or return the first failing check.
    ///
    /// `equity` is free + locked quote balance plus capital committed to
    /// open positions.
    pub fn authorize(
        &self,
        mut intent: OrderIntent,
        state: &RiskState,
        equity: Decimal,
        symbol: &SymbolConfig,
        filters: &SymbolFilters,
        now: DateTime<Utc>,
    ) -> std::result::Result<OrderIntent, Rejection> {
        if state.open_positions >= self.config.max_positions {
            return Err(RiskRejection::MaxPositions {
                open: state.open_positions,
                max: self.config.max_positions,
            }
            .into());
        }

        let limit = self.config.per_trade_risk * equity;
        if intent.notional > limit {
            return Err(RiskRejection::PerTradeRisk {
                amount: intent.notional,
                limit,
            }
            .into());
        }

        if let Some(limit) = self.config.daily_loss_limit {
            let loss = state.daily_loss(now);
            if loss >= limit {
                return Err(RiskRejection::DailyLossLimit { loss, limit }.into());
            }
        }

        if self.mode == TradingMode::Futures {
            if let Some(max) = symbol.max_position_size {
                let exposure = state.exposure_for(&intent.symbol) + intent.notional;
                if exposure > max {
                    return Err(RiskRejection::MaxPositionSize { exposure, max }.into());
                }
            }

            let levels = self.protective_levels(intent.execution_price(), filters);
            if !levels.is_empty() {
                intent.protective = Some(levels);
            }
        }

        Ok(intent)
    }

    /// Stop-loss / take-profit prices around an entry, on tick
    pub fn protective_levels(&self, entry: Decimal, filters: &SymbolFilters) -> ProtectiveLevels {
        ProtectiveLevels {
            stop_loss: self
                .config
                .stop_loss_pct
                .map(|pct| filters.round_price(entry * (Decimal::ONE - pct))),
            take_profit: self
                .config
                .take_profit_pct
                .map(|pct| filters.round_price(entry * (Decimal::ONE + pct))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{MarginType, OrderType, Side};
    use crate::config::types::SizingMode;
    use crate::strategy::types::TierRef;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
    }

    fn risk_config() -> RiskConfig {
        RiskConfig {
            max_positions: 2,
            per_trade_risk: dec!(0.1),
            daily_loss_limit: Some(dec!(100)),
            stop_loss_pct: Some(dec!(0.05)),
            take_profit_pct: Some(dec!(0.1)),
        }
    }

    fn symbol(max_position_size: Option<Decimal>) -> SymbolConfig {
        SymbolConfig {
            symbol: "BTCUSDT".into(),
            enabled: true,
            ladders: BTreeMap::new(),
            order_type: OrderType::Limit,
            sizing: SizingMode::Fixed(dec!(100)),
            limit_offset_pct: Decimal::ZERO,
            leverage: 5,
            margin_type: MarginType::Isolated,
            max_position_size,
        }
    }

    fn intent(notional: Decimal, leverage: u32) -> OrderIntent {
        let margin = notional / Decimal::from(leverage);
        OrderIntent {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            quantity: notional / dec!(50000),
            order_type: OrderType::Limit,
            price: Some(dec!(50000)),
            reference_price: dec!(50000),
            notional,
            margin,
            leverage,
            tier: TierRef {
                kind: PeriodKind::Daily,
                level: 1,
                window_start: now(),
            },
            protective: None,
        }
    }

    fn filters() -> SymbolFilters {
        SymbolFilters {
            tick_size: dec!(0.1),
            ..SymbolFilters::unrestricted("BTCUSDT", "USDT")
        }
    }

    #[test]
    fn test_max_positions() {
        let manager = RiskManager::new(risk_config(), TradingMode::Spot);
        let mut state = RiskState::new(now());
        state.open_positions = 2;
        let result = manager.authorize(intent(dec!(10), 1), &state, dec!(10000), &symbol(None), &filters(), now());
        assert!(matches!(
            result,
            Err(Rejection::Risk(RiskRejection::MaxPositions { open: 2, max: 2 }))
        ));
    }

    #[test]
    fn test_per_trade_risk_uses_notional() {
        let manager = RiskManager::new(risk_config(), TradingMode::Futures);
        let state = RiskState::new(now());
        // 10% of 1000 equity = 100 notional allowed
        assert!(manager
            .authorize(intent(dec!(100), 5), &state, dec!(1000), &symbol(None), &filters(), now())
            .is_ok());
        assert!(matches!(
            manager.authorize(intent(dec!(101), 5), &state, dec!(1000), &symbol(None), &filters(), now()),
            Err(Rejection::Risk(RiskRejection::PerTradeRisk { .. }))
        ));

        // 100 margin at 5x is a 500 notional
        match manager.authorize(intent(dec!(500), 5), &state, dec!(1000), &symbol(None), &filters(), now()) {
            Err(Rejection::Risk(RiskRejection::PerTradeRisk { amount, limit })) => {
                assert_eq!(amount, dec!(500));
                assert_eq!(limit, dec!(100));
            }
            other => panic!("expected per-trade rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_daily_loss_limit_blocks_until_next_day() {
        let manager = RiskManager::new(risk_config(), TradingMode::Spot);
        let mut state = RiskState::new(now());
        state.book_pnl(dec!(-60), now());
        assert!(manager
            .authorize(intent(dec!(10), 1), &state, dec!(10000), &symbol(None), &filters(), now())
            .is_ok());

        state.book_pnl(dec!(-40), now());
        let later_today = now() + Duration::hours(11);
        assert!(matches!(
            manager.authorize(intent(dec!(10), 1), &state, dec!(10000), &symbol(None), &filters(), later_today),
            Err(Rejection::Risk(RiskRejection::DailyLossLimit { .. }))
        ));

        let tomorrow = now() + Duration::hours(12);
        assert!(manager
            .authorize(intent(dec!(10), 1), &state, dec!(10000), &symbol(None), &filters(), tomorrow)
            .is_ok());
        assert!(state.roll_day(tomorrow));
        assert_eq!(state.realized_pnl_today, Decimal::ZERO);
    }

    #[test]
    fn test_futures_attaches_protective_levels() {
        let manager = RiskManager::new(risk_config(), TradingMode::Futures);
        let state = RiskState::new(now());
        let authorized = manager
            .authorize(intent(dec!(10), 5), &state, dec!(10000), &symbol(None), &filters(), now())
            .unwrap();
        let levels = authorized.protective.unwrap();
        assert_eq!(levels.stop_loss, Some(dec!(47500)));
        assert_eq!(levels.take_profit, Some(dec!(55000)));
    }

    #[test]
    fn test_spot_has_no_protective_levels() {
        let manager = RiskManager::new(risk_config(), TradingMode::Spot);
        let state = RiskState::new(now());
        let authorized = manager
            .authorize(intent(dec!(10), 1), &state, dec!(10000), &symbol(None), &filters(), now())
            .unwrap();
        assert!(authorized.protective.is_none());
    }

    #[test]
    fn test_max_position_size() {
        let manager = RiskManager::new(risk_config(), TradingMode::Futures);
        let mut state = RiskState::new(now());
        state.add_exposure("BTCUSDT", dec!(400));
        let result = manager.authorize(
            intent(dec!(100), 5),
            &state,
            dec!(10000),
            &symbol(Some(dec!(450))),
            &filters(),
            now(),
        );
        assert!(matches!(
            result,
            Err(Rejection::Risk(RiskRejection::MaxPositionSize { .. }))
        ));
    }
}
