//! Per-symbol tracker + ladder pair
//!
//! The engine keeps each monitor behind its own lock so a window rollover and
//! the ladder evaluation that follows it happen as one step.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::common::types::PeriodKind;
use crate::config::types::SymbolConfig;
use crate::strategy::ladder::{ThresholdLadder, Tier};
use crate::strategy::tracker::{PeriodWindow, ReferenceTracker};
use crate::strategy::types::{DropReport, TriggerEvent};

/// Persisted windows and Fired flags of one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub windows: Vec<PeriodWindow>,
    #[serde(default)]
    pub fired: BTreeMap<PeriodKind, Vec<usize>>,
}

/// Read-only view used by `/positions`
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorView {
    pub symbol: String,
    pub last_price: Option<Decimal>,
    pub last_observed_at: Option<DateTime<Utc>>,
    pub kinds: Vec<KindView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KindView {
    pub kind: PeriodKind,
    pub reference: Option<Decimal>,
    pub drop: Decimal,
    pub tiers: Vec<Tier>,
}

/// Monitor shared between the tick loop and command queries
pub type SharedMonitor = Arc<Mutex<SymbolMonitor>>;

pub struct SymbolMonitor {
    config: SymbolConfig,
    tracker: ReferenceTracker,
    ladder: ThresholdLadder,
}

impl SymbolMonitor {
    pub fn new(config: SymbolConfig) -> Self {
        let tracker = ReferenceTracker::new(config.symbol.clone(), config.ladders.keys().copied());
        let ladder = ThresholdLadder::new(config.symbol.clone(), &config.ladders);
        Self {
            config,
            tracker,
            ladder,
        }
    }

    pub fn into_shared(self) -> SharedMonitor {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &SymbolConfig {
        &self.config
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// Observe a price, re-arm rolled kinds, then evaluate the ladder
    pub fn on_price(&mut self, price: Decimal, at: DateTime<Utc>) -> (DropReport, Vec<TriggerEvent>) {
        let report = self.tracker.observe(price, at);
        for opened in &report.opened {
            if opened.previous_reference.is_some() {
                info!(
                    symbol = %self.config.symbol,
                    kind = %opened.kind,
                    reference = %opened.reference,
                    "Window rolled over, tiers re-armed"
                );
            }
            self.ladder.rearm(opened.kind, opened.start);
        }
        let triggers = self.ladder.evaluate(&report);
        (report, triggers)
    }

    pub fn snapshot(&self) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: self.config.symbol.clone(),
            windows: self.tracker.windows().cloned().collect(),
            fired: self
                .ladder
                .kinds()
                .map(|kind| (kind, self.ladder.fired_levels(kind)))
                .filter(|(_, levels)| !levels.is_empty())
                .collect(),
        }
    }

    /// Reinstate saved windows and their Fired flags.
    ///
    /// A stale window keeps its flags until the next observation rolls it
    /// over, at which point the tiers are re-armed as usual.
    pub fn restore(&mut self, snapshot: &SymbolSnapshot) {
        for window in &snapshot.windows {
            let fired = snapshot
                .fired
                .get(&window.kind)
                .map(|l| l.as_slice())
                .unwrap_or(&[]);
            self.ladder.restore_fired(window.kind, window.start, fired);
        }
        self.tracker.restore(snapshot.windows.iter().cloned());
    }

    pub fn view(&self) -> MonitorView {
        let last_price = self.tracker.last_price();
        MonitorView {
            symbol: self.config.symbol.clone(),
            last_price,
            last_observed_at: self.tracker.last_observed_at(),
            kinds: self
                .ladder
                .kinds()
                .map(|kind| {
                    let window = self.tracker.window(kind);
                    KindView {
                        kind,
                        reference: window.map(|w| w.reference),
                        drop: match (window, last_price) {
                            (Some(w), Some(p)) => w.drop_fraction(p),
                            _ => Decimal::ZERO,
                        },
                        tiers: self.ladder.tiers(kind).to_vec(),
                    }
                })
                .collect(),
        }
    }
}
