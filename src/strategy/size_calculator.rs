use rust_decimal::Decimal;

use crate::common::types::{OrderType, Side, SymbolFilters};
use crate::config::types::{SizingMode, SymbolConfig};
use crate::strategy::types::{BalanceSnapshot, OrderIntent, Rejection, TriggerEvent};

/// Outcome of sizing a trigger
pub type SizingOutcome = std::result::Result<OrderIntent, Rejection>;

/// SizeCalculator trait
///
/// Turns a fired tier into a sized buy intent against the current Balance
/// Snapshot. Implementations never shrink an order to fit the reserve: an
/// intent that would leave free balance under the floor is rejected whole.
pub trait SizeCalculator: Send + Sync {
    fn size(
        &self,
        trigger: &TriggerEvent,
        balance: &BalanceSnapshot,
        config: &SymbolConfig,
        filters: &SymbolFilters,
    ) -> SizingOutcome;
}

/// Boxed size calculator for dynamic dispatch
pub type BoxedSizeCalculator = Box<dyn SizeCalculator>;

/// Fixed-notional or percentage-of-free sizing with the reserve guard
#[derive(Debug, Clone, Copy, Default)]
pub struct ReserveGuardSizer;

impl ReserveGuardSizer {
    pub fn new() -> Self {
        Self
    }

    /// Limit price for a trigger: observed price less the offset, on tick
    pub fn limit_price(trigger: &TriggerEvent, config: &SymbolConfig, filters: &SymbolFilters) -> Decimal {
        filters.round_price(trigger.price * (Decimal::ONE - config.limit_offset_pct))
    }
}

impl SizeCalculator for ReserveGuardSizer {
    fn size(
        &self,
        trigger: &TriggerEvent,
        balance: &BalanceSnapshot,
        config: &SymbolConfig,
        filters: &SymbolFilters,
    ) -> SizingOutcome {
        let target_notional = match config.sizing {
            SizingMode::Fixed(amount) => amount,
            SizingMode::Percentage(fraction) => fraction * balance.free,
        };

        let (order_type, price) = match config.order_type {
            OrderType::Market => (OrderType::Market, None),
            _ => (
                OrderType::Limit,
                Some(Self::limit_price(trigger, config, filters)),
            ),
        };
        let execution_price = price.unwrap_or(trigger.price);
        if execution_price <= Decimal::ZERO {
            return Err(Rejection::BelowMinimum(format!(
                "price {} rounds to zero",
                trigger.price
            )));
        }

        let quantity = filters
            .round_quantity(target_notional / execution_price)
            .min(filters.max_qty);

        if quantity <= Decimal::ZERO || quantity < filters.min_qty {
            return Err(Rejection::BelowMinimum(format!(
                "quantity {} under minimum {}",
                quantity, filters.min_qty
            )));
        }

        let notional = quantity * execution_price;
        if notional < filters.min_notional {
            return Err(Rejection::BelowMinimum(format!(
                "notional {} under minimum {}",
                notional, filters.min_notional
            )));
        }

        if balance.free - notional < balance.reserve {
            return Err(Rejection::ReserveBreach {
                required: notional,
                available: balance.free,
                reserve: balance.reserve,
            });
        }

        // Leverage only changes how much of the notional is locked as margin
        let margin = notional / Decimal::from(config.leverage.max(1));

        Ok(OrderIntent {
            symbol: trigger.symbol.clone(),
            side: Side::Buy,
            quantity,
            order_type,
            price,
            reference_price: trigger.price,
            notional,
            margin,
            leverage: config.leverage.max(1),
            tier: trigger.tier.clone(),
            protective: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{MarginType, PeriodKind};
    use crate::strategy::types::TierRef;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn config(sizing: SizingMode) -> SymbolConfig {
        SymbolConfig {
            symbol: "BTCUSDT".into(),
            enabled: true,
            ladders: BTreeMap::new(),
            order_type: OrderType::Limit,
            sizing,
            limit_offset_pct: Decimal::ZERO,
            leverage: 1,
            margin_type: MarginType::Isolated,
            max_position_size: None,
        }
    }

    fn filters() -> SymbolFilters {
        SymbolFilters {
            step_size: dec!(0.00001),
            tick_size: dec!(0.01),
            min_qty: dec!(0.00001),
            min_notional: dec!(5),
            ..SymbolFilters::unrestricted("BTCUSDT", "USDT")
        }
    }

    fn trigger(price: Decimal) -> TriggerEvent {
        TriggerEvent {
            symbol: "BTCUSDT".into(),
            tier: TierRef {
                kind: PeriodKind::Daily,
                level: 1,
                window_start: Utc::now(),
            },
            threshold: dec!(0.01),
            drop: dec!(0.012),
            price,
            reference: dec!(50000),
        }
    }

    fn balance(free: Decimal) -> BalanceSnapshot {
        BalanceSnapshot {
            asset: "USDT".into(),
            free,
            locked: Decimal::ZERO,
            reserve: dec!(2000),
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn test_reserve_boundary_rejects() {
        let sizer = ReserveGuardSizer::new();
        let cfg = config(SizingMode::Fixed(dec!(10)));
        let outcome = sizer.size(&trigger(dec!(50000)), &balance(dec!(2005)), &cfg, &filters());
        assert!(matches!(outcome, Err(Rejection::ReserveBreach { .. })));
    }

    #[test]
    fn test_reserve_boundary_accepts_at_2010() {
        let sizer = ReserveGuardSizer::new();
        let cfg = config(SizingMode::Fixed(dec!(10)));
        let intent = sizer
            .size(&trigger(dec!(50000)), &balance(dec!(2010)), &cfg, &filters())
            .unwrap();
        assert_eq!(intent.quantity, dec!(0.0002));
        assert_eq!(intent.notional, dec!(10));
        assert_eq!(intent.price, Some(dec!(50000)));
    }

    #[test]
    fn test_percentage_of_free_balance() {
        let sizer = ReserveGuardSizer::new();
        let cfg = config(SizingMode::Percentage(dec!(0.1)));
        let intent = sizer
            .size(&trigger(dec!(50000)), &balance(dec!(5000)), &cfg, &filters())
            .unwrap();
        // 10% of 5000 = 500 → 0.01 BTC
        assert_eq!(intent.quantity, dec!(0.01));
        assert_eq!(intent.margin, dec!(500));
    }

    #[test]
    fn test_below_min_notional_rejected() {
        let sizer = ReserveGuardSizer::new();
        let cfg = config(SizingMode::Fixed(dec!(2)));
        let outcome = sizer.size(&trigger(dec!(50000)), &balance(dec!(9000)), &cfg, &filters());
        assert!(matches!(outcome, Err(Rejection::BelowMinimum(_))));
    }

    #[test]
    fn test_limit_offset_and_tick_rounding() {
        let sizer = ReserveGuardSizer::new();
        let mut cfg = config(SizingMode::Fixed(dec!(100)));
        cfg.limit_offset_pct = dec!(0.001);
        let intent = sizer
            .size(&trigger(dec!(49400.555)), &balance(dec!(9000)), &cfg, &filters())
            .unwrap();
        // 49400.555 × 0.999 = 49351.154445 → 49351.15
        assert_eq!(intent.price, Some(dec!(49351.15)));
        assert_eq!(intent.reference_price, dec!(49400.555));
    }

    #[test]
    fn test_market_order_has_no_price() {
        let sizer = ReserveGuardSizer::new();
        let mut cfg = config(SizingMode::Fixed(dec!(100)));
        cfg.order_type = OrderType::Market;
        let intent = sizer
            .size(&trigger(dec!(50000)), &balance(dec!(9000)), &cfg, &filters())
            .unwrap();
        assert_eq!(intent.order_type, OrderType::Market);
        assert!(intent.price.is_none());
    }

    #[test]
    fn test_leverage_scales_margin_not_quantity() {
        let sizer = ReserveGuardSizer::new();
        let mut cfg = config(SizingMode::Fixed(dec!(100)));
        cfg.leverage = 5;
        let intent = sizer
            .size(&trigger(dec!(50000)), &balance(dec!(9000)), &cfg, &filters())
            .unwrap();
        assert_eq!(intent.quantity, dec!(0.002));
        assert_eq!(intent.notional, dec!(100));
        assert_eq!(intent.margin, dec!(20));
    }

    #[test]
    fn test_leveraged_reserve_check_uses_notional() {
        let sizer = ReserveGuardSizer::new();
        let mut cfg = config(SizingMode::Fixed(dec!(100)));
        cfg.leverage = 5;
        // Only 20 would be locked, but the 100 notional still breaches the floor
        let outcome = sizer.size(&trigger(dec!(50000)), &balance(dec!(2020)), &cfg, &filters());
        assert!(matches!(
            outcome,
            Err(Rejection::ReserveBreach { required, .. }) if required == dec!(100)
        ));
        assert!(sizer
            .size(&trigger(dec!(50000)), &balance(dec!(2100)), &cfg, &filters())
            .is_ok());
    }
}
