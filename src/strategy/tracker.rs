//! Reference Price Tracker
//!
//! Keeps one [`PeriodWindow`] per period kind for a symbol. The first
//! observation inside a new day/week/month opens a window whose reference is
//! that observed price; missed ticks never reset anything.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::common::types::PeriodKind;
use crate::strategy::types::{DropReport, WindowOpened};

/// Active reference interval for one period kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub kind: PeriodKind,
    pub start: DateTime<Utc>,
    pub reference: Decimal,
}

impl PeriodWindow {
    /// Fractional drop of `price` below the reference, clamped at zero
    pub fn drop_fraction(&self, price: Decimal) -> Decimal {
        if self.reference <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.reference - price) / self.reference).max(Decimal::ZERO)
    }
}

/// Per-symbol reference prices
#[derive(Debug, Clone)]
pub struct ReferenceTracker {
    symbol: String,
    kinds: Vec<PeriodKind>,
    windows: BTreeMap<PeriodKind, PeriodWindow>,
    last_price: Option<Decimal>,
    last_observed_at: Option<DateTime<Utc>>,
}

impl ReferenceTracker {
    pub fn new(symbol: impl Into<String>, kinds: impl IntoIterator<Item = PeriodKind>) -> Self {
        let mut kinds: Vec<PeriodKind> = kinds.into_iter().collect();
        kinds.sort();
        kinds.dedup();
        Self {
            symbol: symbol.into(),
            kinds,
            windows: BTreeMap::new(),
            last_price: None,
            last_observed_at: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn window(&self, kind: PeriodKind) -> Option<&PeriodWindow> {
        self.windows.get(&kind)
    }

    pub fn windows(&self) -> impl Iterator<Item = &PeriodWindow> {
        self.windows.values()
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn last_observed_at(&self) -> Option<DateTime<Utc>> {
        self.last_observed_at
    }

    /// Record a price and report the drop per tracked kind.
    ///
    /// Windows whose boundary has been crossed are replaced before the drop
    /// is computed, so the crossing observation reports zero drop for them.
    pub fn observe(&mut self, price: Decimal, at: DateTime<Utc>) -> DropReport {
        let mut opened = Vec::new();
        let mut drops = BTreeMap::new();
        let mut references = BTreeMap::new();

        for kind in &self.kinds {
            let start = kind.window_start(at);
            let stale = self
                .windows
                .get(kind)
                .map(|w| start > w.start)
                .unwrap_or(true);

            if stale {
                let previous = self.windows.insert(
                    *kind,
                    PeriodWindow {
                        kind: *kind,
                        start,
                        reference: price,
                    },
                );
                debug!(
                    symbol = %self.symbol,
                    kind = %kind,
                    reference = %price,
                    "Opened reference window"
                );
                opened.push(WindowOpened {
                    kind: *kind,
                    start,
                    reference: price,
                    previous_reference: previous.map(|w| w.reference),
                });
            }

            if let Some(window) = self.windows.get(kind) {
                drops.insert(*kind, window.drop_fraction(price));
                references.insert(*kind, window.reference);
            }
        }

        self.last_price = Some(price);
        self.last_observed_at = Some(at);

        DropReport {
            symbol: self.symbol.clone(),
            price,
            observed_at: at,
            drops,
            references,
            opened,
        }
    }

    /// Reinstate windows saved before a restart.
    ///
    /// Windows for kinds no longer tracked are ignored. Stale windows are
    /// kept as-is and roll over on the next observation.
    pub fn restore(&mut self, windows: impl IntoIterator<Item = PeriodWindow>) {
        for window in windows {
            if self.kinds.contains(&window.kind) {
                self.windows.insert(window.kind, window);
            }
        }
    }
}
