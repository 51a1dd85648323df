use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::common::types::{OrderType, TradingMode};

/// Fee configuration for a trading mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub mode: TradingMode,
    /// Maker fee (resting limit orders) as a fraction of notional
    pub maker_rate: Decimal,
    /// Taker fee (market and triggered orders) as a fraction of notional
    pub taker_rate: Decimal,
}

impl FeeSchedule {
    /// Binance spot base tier
    /// - 0.1% maker
    /// - 0.1% taker
    pub fn spot() -> Self {
        Self {
            mode: TradingMode::Spot,
            maker_rate: dec!(0.001),
            taker_rate: dec!(0.001),
        }
    }

    /// Binance USDⓈ-M futures base tier
    /// - 0.02% maker
    /// - 0.05% taker
    pub fn futures() -> Self {
        Self {
            mode: TradingMode::Futures,
            maker_rate: dec!(0.0002),
            taker_rate: dec!(0.0005),
        }
    }

    /// Get fees for a mode
    pub fn for_mode(mode: TradingMode) -> Self {
        match mode {
            TradingMode::Spot => Self::spot(),
            TradingMode::Futures => Self::futures(),
        }
    }

    /// Flat schedule, used by the paper exchange
    pub fn flat(mode: TradingMode, rate: Decimal) -> Self {
        Self {
            mode,
            maker_rate: rate,
            taker_rate: rate,
        }
    }

    pub fn rate_for(&self, order_type: OrderType) -> Decimal {
        match order_type {
            OrderType::Limit => self.maker_rate,
            OrderType::Market | OrderType::StopMarket | OrderType::TakeProfitMarket => {
                self.taker_rate
            }
        }
    }
}

/// Fee calculation utilities
///
/// Used when the exchange omits the commission of a fill.
pub struct FeeCalculator;

impl FeeCalculator {
    /// Estimated fee, in quote units, for a fill of `quantity` at `price`
    pub fn fee(schedule: &FeeSchedule, order_type: OrderType, price: Decimal, quantity: Decimal) -> Decimal {
        price * quantity * schedule.rate_for(order_type)
    }

    /// Realized P&L of closing a long position
    ///
    /// `(exit - entry) × quantity - fees`
    pub fn realized_pnl(entry_price: Decimal, exit_price: Decimal, quantity: Decimal, fees: Decimal) -> Decimal {
        (exit_price - entry_price) * quantity - fees
    }
}
