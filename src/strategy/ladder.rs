//! Threshold Ladder
//!
//! Each period kind owns an ascending list of tiers. A tier fires once per
//! window when the observed drop reaches its threshold; every qualifying
//! Armed tier fires in the same pass, lowest first.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::types::PeriodKind;
use crate::strategy::types::{DropReport, TierRef, TriggerEvent};

/// Tier state within the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierState {
    Armed,
    Fired,
}

/// A single trigger level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// 1-based position in the ladder
    pub level: usize,
    pub threshold: Decimal,
    pub state: TierState,
}

#[derive(Debug, Clone)]
struct KindLadder {
    tiers: Vec<Tier>,
    /// Window the tier states belong to
    window_start: Option<DateTime<Utc>>,
}

/// Tiered triggers for one symbol
#[derive(Debug, Clone)]
pub struct ThresholdLadder {
    symbol: String,
    ladders: BTreeMap<PeriodKind, KindLadder>,
}

impl ThresholdLadder {
    /// Build a ladder with every tier Armed.
    ///
    /// Levels are sorted ascending before tiers are numbered.
    pub fn new(symbol: impl Into<String>, thresholds: &BTreeMap<PeriodKind, Vec<Decimal>>) -> Self {
        let ladders = thresholds
            .iter()
            .map(|(kind, levels)| {
                let mut levels = levels.clone();
                levels.sort();
                let tiers = levels
                    .into_iter()
                    .enumerate()
                    .map(|(i, threshold)| Tier {
                        level: i + 1,
                        threshold,
                        state: TierState::Armed,
                    })
                    .collect();
                (
                    *kind,
                    KindLadder {
                        tiers,
                        window_start: None,
                    },
                )
            })
            .collect();

        Self {
            symbol: symbol.into(),
            ladders,
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = PeriodKind> + '_ {
        self.ladders.keys().copied()
    }

    pub fn tiers(&self, kind: PeriodKind) -> &[Tier] {
        self.ladders
            .get(&kind)
            .map(|l| l.tiers.as_slice())
            .unwrap_or(&[])
    }

    pub fn window_start(&self, kind: PeriodKind) -> Option<DateTime<Utc>> {
        self.ladders.get(&kind).and_then(|l| l.window_start)
    }

    /// Levels currently Fired for `kind`
    pub fn fired_levels(&self, kind: PeriodKind) -> Vec<usize> {
        self.tiers(kind)
            .iter()
            .filter(|t| t.state == TierState::Fired)
            .map(|t| t.level)
            .collect()
    }

    /// Arm every tier of `kind` for the window starting at `window_start`
    pub fn rearm(&mut self, kind: PeriodKind, window_start: DateTime<Utc>) {
        if let Some(ladder) = self.ladders.get_mut(&kind) {
            for tier in &mut ladder.tiers {
                tier.state = TierState::Armed;
            }
            ladder.window_start = Some(window_start);
        }
    }

    /// Restore Fired flags saved for the window starting at `window_start`
    pub fn restore_fired(&mut self, kind: PeriodKind, window_start: DateTime<Utc>, fired: &[usize]) {
        if let Some(ladder) = self.ladders.get_mut(&kind) {
            ladder.window_start = Some(window_start);
            for tier in &mut ladder.tiers {
                tier.state = if fired.contains(&tier.level) {
                    TierState::Fired
                } else {
                    TierState::Armed
                };
            }
        }
    }

    /// Fire every Armed tier whose threshold the report's drop reaches
    pub fn evaluate(&mut self, report: &DropReport) -> Vec<TriggerEvent> {
        let mut events = Vec::new();

        for (kind, ladder) in self.ladders.iter_mut() {
            let Some(drop) = report.drops.get(kind).copied() else {
                continue;
            };
            let Some(window_start) = ladder.window_start else {
                continue;
            };
            let reference = report.references.get(kind).copied().unwrap_or(report.price);

            for tier in ladder.tiers.iter_mut() {
                if tier.threshold > drop {
                    break;
                }
                if tier.state == TierState::Armed {
                    tier.state = TierState::Fired;
                    events.push(TriggerEvent {
                        symbol: self.symbol.clone(),
                        tier: TierRef {
                            kind: *kind,
                            level: tier.level,
                            window_start,
                        },
                        threshold: tier.threshold,
                        drop,
                        price: report.price,
                        reference,
                    });
                }
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap()
    }

    fn daily_ladder() -> ThresholdLadder {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(PeriodKind::Daily, vec![dec!(0.01), dec!(0.02), dec!(0.03)]);
        let mut ladder = ThresholdLadder::new("BTCUSDT", &thresholds);
        ladder.rearm(PeriodKind::Daily, start());
        ladder
    }

    fn report(drop: Decimal) -> DropReport {
        DropReport {
            symbol: "BTCUSDT".into(),
            price: dec!(50000) * (Decimal::ONE - drop),
            observed_at: start(),
            drops: [(PeriodKind::Daily, drop)].into_iter().collect(),
            references: [(PeriodKind::Daily, dec!(50000))].into_iter().collect(),
            opened: vec![],
        }
    }

    #[test]
    fn test_tier_fires_at_exact_threshold() {
        let mut ladder = daily_ladder();
        let events = ladder.evaluate(&report(dec!(0.01)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tier.level, 1);
    }

    #[test]
    fn test_below_threshold_does_not_fire() {
        let mut ladder = daily_ladder();
        assert!(ladder.evaluate(&report(dec!(0.0099))).is_empty());
        assert!(ladder.fired_levels(PeriodKind::Daily).is_empty());
    }

    #[test]
    fn test_gap_down_fires_all_levels_ascending() {
        let mut ladder = daily_ladder();
        let events = ladder.evaluate(&report(dec!(0.05)));
        let levels: Vec<usize> = events.iter().map(|e| e.tier.level).collect();
        assert_eq!(levels, vec![1, 2, 3]);
    }

    #[test]
    fn test_fired_tier_never_refires_in_window() {
        let mut ladder = daily_ladder();
        assert_eq!(ladder.evaluate(&report(dec!(0.015))).len(), 1);
        assert!(ladder.evaluate(&report(dec!(0.015))).is_empty());
        assert!(ladder.evaluate(&report(dec!(0.012))).is_empty());
    }

    #[test]
    fn test_rearm_resets_tiers() {
        let mut ladder = daily_ladder();
        ladder.evaluate(&report(dec!(0.05)));
        assert_eq!(ladder.fired_levels(PeriodKind::Daily), vec![1, 2, 3]);

        ladder.rearm(PeriodKind::Daily, start() + chrono::Duration::days(1));
        assert!(ladder.fired_levels(PeriodKind::Daily).is_empty());
        assert_eq!(ladder.evaluate(&report(dec!(0.01))).len(), 1);
    }

    #[test]
    fn test_restore_fired_flags() {
        let mut ladder = daily_ladder();
        ladder.restore_fired(PeriodKind::Daily, start(), &[1, 2]);
        let events = ladder.evaluate(&report(dec!(0.05)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tier.level, 3);
    }

    #[test]
    fn test_event_carries_reference() {
        let mut ladder = daily_ladder();
        let events = ladder.evaluate(&report(dec!(0.012)));
        assert_eq!(events[0].price, dec!(49400));
        assert_eq!(events[0].reference, dec!(50000));
    }
}
