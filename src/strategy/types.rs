use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::errors::TraderError;
use crate::common::types::{OrderType, PeriodKind, Side};

/// Drop fractions observed for one symbol at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct DropReport {
    pub symbol: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
    /// Kind → `(reference - price) / reference`, never negative
    pub drops: BTreeMap<PeriodKind, Decimal>,
    /// Kind → reference open of the active window
    pub references: BTreeMap<PeriodKind, Decimal>,
    /// Kinds whose window was opened by this observation
    pub opened: Vec<WindowOpened>,
}

impl DropReport {
    pub fn drop_for(&self, kind: PeriodKind) -> Decimal {
        self.drops.get(&kind).copied().unwrap_or_default()
    }
}

/// A window replaced at a boundary crossing (or opened on first sight)
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOpened {
    pub kind: PeriodKind,
    pub start: DateTime<Utc>,
    pub reference: Decimal,
    /// Reference of the window this one replaced, if any
    pub previous_reference: Option<Decimal>,
}

/// Identifies the ladder tier an order originated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRef {
    pub kind: PeriodKind,
    /// 1-based position in the ladder
    pub level: usize,
    pub window_start: DateTime<Utc>,
}

impl std::fmt::Display for TierRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} tier {}", self.kind, self.level)
    }
}

/// A tier that fired during ladder evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub symbol: String,
    pub tier: TierRef,
    /// Drop required by the tier
    pub threshold: Decimal,
    /// Drop actually observed
    pub drop: Decimal,
    pub price: Decimal,
    pub reference: Decimal,
}

/// Stop-loss / take-profit trigger prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtectiveLevels {
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl ProtectiveLevels {
    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.take_profit.is_none()
    }
}

/// Sized order waiting for authorization and submission
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Limit price, `None` for market orders
    pub price: Option<Decimal>,
    /// Price observed when the tier fired
    pub reference_price: Decimal,
    /// Quantity × execution price estimate
    pub notional: Decimal,
    /// Quote funds the order commits (notional / leverage)
    pub margin: Decimal,
    pub leverage: u32,
    pub tier: TierRef,
    /// Attached by the risk manager in futures mode
    pub protective: Option<ProtectiveLevels>,
}

impl OrderIntent {
    /// Price used for notional estimates
    pub fn execution_price(&self) -> Decimal {
        self.price.unwrap_or(self.reference_price)
    }
}

/// Balance Snapshot of the quote asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub reserve: Decimal,
    pub taken_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    /// Free funds above the reserve floor
    pub fn spendable(&self) -> Decimal {
        (self.free - self.reserve).max(Decimal::ZERO)
    }
}

/// Why the risk manager refused an intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskRejection {
    MaxPositions { open: usize, max: usize },
    PerTradeRisk { amount: Decimal, limit: Decimal },
    DailyLossLimit { loss: Decimal, limit: Decimal },
    MaxPositionSize { exposure: Decimal, max: Decimal },
}

impl std::fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskRejection::MaxPositions { open, max } => {
                write!(f, "max positions reached ({}/{})", open, max)
            }
            RiskRejection::PerTradeRisk { amount, limit } => {
                write!(f, "trade commits {} above per-trade limit {}", amount, limit)
            }
            RiskRejection::DailyLossLimit { loss, limit } => {
                write!(f, "daily loss {} reached limit {}", loss, limit)
            }
            RiskRejection::MaxPositionSize { exposure, max } => {
                write!(f, "position size {} would exceed {}", exposure, max)
            }
        }
    }
}

/// Terminal refusal of a trigger; the tier stays Fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ReserveBreach {
        required: Decimal,
        available: Decimal,
        reserve: Decimal,
    },
    Risk(RiskRejection),
    /// Quantity or notional under the instrument minimums
    BelowMinimum(String),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::ReserveBreach {
                required,
                available,
                reserve,
            } => write!(
                f,
                "reserve breach: needs {}, free {}, reserve {}",
                required, available, reserve
            ),
            Rejection::Risk(reason) => write!(f, "risk: {}", reason),
            Rejection::BelowMinimum(reason) => write!(f, "below minimum: {}", reason),
        }
    }
}

impl From<RiskRejection> for Rejection {
    fn from(reason: RiskRejection) -> Self {
        Rejection::Risk(reason)
    }
}

impl From<Rejection> for TraderError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::ReserveBreach {
                required,
                available,
                reserve,
            } => TraderError::ReserveBreach {
                required,
                available,
                reserve,
            },
            Rejection::Risk(reason) => TraderError::RiskLimitExceeded(reason.to_string()),
            Rejection::BelowMinimum(reason) => TraderError::InvalidParameter(reason),
        }
    }
}
