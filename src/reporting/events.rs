//! Events pushed to notification channels

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::common::types::{OrderType, PeriodKind, Side, TradingMode};
use crate::execution::orders::OrderRole;
use crate::strategy::TierRef;

/// Everything the engine reports outward
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    Startup {
        mode: TradingMode,
        exchange: String,
        symbols: Vec<String>,
        dry_run: bool,
    },
    ThresholdTriggered {
        symbol: String,
        tier: TierRef,
        threshold: Decimal,
        drop: Decimal,
        price: Decimal,
        reference: Decimal,
    },
    OrderPlaced {
        symbol: String,
        order_id: String,
        order_type: OrderType,
        role: OrderRole,
        quantity: Decimal,
        price: Option<Decimal>,
        tier: Option<TierRef>,
    },
    TradeExecuted {
        symbol: String,
        order_id: String,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
        realized_pnl: Option<Decimal>,
    },
    OrderExpired {
        symbol: String,
        order_id: String,
        quantity: Decimal,
        filled_qty: Decimal,
    },
    OrderCancelled {
        symbol: String,
        order_id: String,
        reason: String,
    },
    IntentRejected {
        symbol: String,
        tier: TierRef,
        reason: String,
    },
    WindowReset {
        symbol: String,
        kind: PeriodKind,
        reference: Decimal,
        previous_reference: Decimal,
    },
    PositionClosed {
        symbol: String,
        quantity: Decimal,
        entry_price: Decimal,
        exit_price: Decimal,
        realized_pnl: Decimal,
    },
    BalanceSnapshot {
        asset: String,
        free: Decimal,
        locked: Decimal,
        reserve: Decimal,
        equity: Decimal,
    },
    OperationFailed {
        operation: String,
        symbol: Option<String>,
        error: String,
    },
    SymbolDisabled {
        symbol: String,
        reason: String,
    },
}

impl NotificationEvent {
    /// Stable name for logs and filtering
    pub fn name(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "startup",
            Self::ThresholdTriggered { .. } => "threshold_triggered",
            Self::OrderPlaced { .. } => "order_placed",
            Self::TradeExecuted { .. } => "trade_executed",
            Self::OrderExpired { .. } => "order_expired",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::IntentRejected { .. } => "intent_rejected",
            Self::WindowReset { .. } => "window_reset",
            Self::PositionClosed { .. } => "position_closed",
            Self::BalanceSnapshot { .. } => "balance_snapshot",
            Self::OperationFailed { .. } => "operation_failed",
            Self::SymbolDisabled { .. } => "symbol_disabled",
        }
    }

    /// Failures and disabled symbols
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Self::OperationFailed { .. } | Self::SymbolDisabled { .. }
        )
    }
}

pub(crate) fn pct(fraction: Decimal) -> String {
    format!("{}%", (fraction * Decimal::ONE_HUNDRED).round_dp(2).normalize())
}

pub(crate) fn quote(amount: Decimal) -> String {
    amount.round_dp(2).to_string()
}

/// Plain-text rendering used by chat channels
impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup {
                mode,
                exchange,
                symbols,
                dry_run,
            } => {
                write!(f, "🤖 Bot started ({} on {})", mode, exchange)?;
                if *dry_run {
                    write!(f, " [dry run]")?;
                }
                write!(f, "\nSymbols: {}", symbols.join(", "))
            }
            Self::ThresholdTriggered {
                symbol,
                tier,
                threshold,
                drop,
                price,
                reference,
            } => write!(
                f,
                "📉 {} {} hit\nDrop: {} (threshold {})\nPrice: {}\nReference: {}",
                symbol,
                tier,
                pct(*drop),
                pct(*threshold),
                price.normalize(),
                reference.normalize()
            ),
            Self::OrderPlaced {
                symbol,
                order_id,
                order_type,
                role,
                quantity,
                price,
                ..
            } => {
                write!(
                    f,
                    "✅ {} order placed\nSymbol: {}\nType: {}\nQuantity: {}",
                    role,
                    symbol,
                    order_type,
                    quantity.normalize()
                )?;
                if let Some(price) = price {
                    write!(f, "\nPrice: {}", price.normalize())?;
                }
                write!(f, "\nOrder ID: {}", order_id)
            }
            Self::TradeExecuted {
                symbol,
                side,
                quantity,
                price,
                fee,
                realized_pnl,
                ..
            } => {
                write!(
                    f,
                    "💰 {} {} {} @ {}\nTotal: {}\nFee: {}",
                    side,
                    quantity.normalize(),
                    symbol,
                    price.normalize(),
                    quote(*quantity * *price),
                    fee.normalize()
                )?;
                if let Some(pnl) = realized_pnl {
                    write!(f, "\nP&L: {}", quote(*pnl))?;
                }
                Ok(())
            }
            Self::OrderExpired {
                symbol,
                order_id,
                quantity,
                filled_qty,
            } => write!(
                f,
                "🕒 Order expired and cancelled\nSymbol: {}\nFilled: {} of {}\nOrder ID: {}",
                symbol,
                filled_qty.normalize(),
                quantity.normalize(),
                order_id
            ),
            Self::OrderCancelled {
                symbol,
                order_id,
                reason,
            } => write!(
                f,
                "❎ Order cancelled\nSymbol: {}\nReason: {}\nOrder ID: {}",
                symbol, reason, order_id
            ),
            Self::IntentRejected {
                symbol,
                tier,
                reason,
            } => write!(f, "⛔ {} {} skipped: {}", symbol, tier, reason),
            Self::WindowReset {
                symbol,
                kind,
                reference,
                previous_reference,
            } => write!(
                f,
                "🔄 {} new {} window\nReference: {} (was {})",
                symbol,
                kind,
                reference.normalize(),
                previous_reference.normalize()
            ),
            Self::PositionClosed {
                symbol,
                quantity,
                entry_price,
                exit_price,
                realized_pnl,
            } => write!(
                f,
                "🏁 {} position closed\nQuantity: {}\nEntry: {}\nExit: {}\nP&L: {}",
                symbol,
                quantity.normalize(),
                entry_price.normalize(),
                exit_price.normalize(),
                quote(*realized_pnl)
            ),
            Self::BalanceSnapshot {
                asset,
                free,
                locked,
                reserve,
                equity,
            } => write!(
                f,
                "📊 Balance\nFree: {} {}\nLocked: {} {}\nReserve: {} {}\nEquity: {} {}",
                quote(*free),
                asset,
                quote(*locked),
                asset,
                quote(*reserve),
                asset,
                quote(*equity),
                asset
            ),
            Self::OperationFailed {
                operation,
                symbol,
                error,
            } => match symbol {
                Some(symbol) => write!(f, "⚠️ {} failed for {}: {}", operation, symbol, error),
                None => write!(f, "⚠️ {} failed: {}", operation, error),
            },
            Self::SymbolDisabled { symbol, reason } => {
                write!(f, "⚠️ {} disabled: {}", symbol, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_threshold_message() {
        let event = NotificationEvent::ThresholdTriggered {
            symbol: "BTCUSDT".into(),
            tier: TierRef {
                kind: PeriodKind::Daily,
                level: 1,
                window_start: Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap(),
            },
            threshold: dec!(0.01),
            drop: dec!(0.012),
            price: dec!(49400),
            reference: dec!(50000),
        };
        let text = event.to_string();
        assert!(text.contains("BTCUSDT daily tier 1 hit"));
        assert!(text.contains("Drop: 1.2% (threshold 1%)"));
        assert_eq!(event.name(), "threshold_triggered");
    }

    #[test]
    fn test_serializes_with_event_tag() {
        let event = NotificationEvent::SymbolDisabled {
            symbol: "FOOUSDT".into(),
            reason: "Invalid symbol".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "symbol_disabled");
        assert!(event.is_alert());
    }
}
