//! Strategy module: from observed price to authorized order intent
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              PER SYMBOL (behind the symbol's lock)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  price tick                                                 │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  ReferenceTracker.observe() → DropReport (+ rolled windows) │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  ThresholdLadder.rearm() / evaluate() → TriggerEvent*       │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │              PORTFOLIO (single writer)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SizeCalculator.size()   → OrderIntent | ReserveBreach      │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  RiskManager.authorize() → OrderIntent' | Risk(reason)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`ReferenceTracker`]: period windows and drop fractions
//! - [`ThresholdLadder`]: Armed/Fired tiers per period kind
//! - [`SymbolMonitor`]: the two above, updated as one step
//! - [`SizeCalculator`]: quantity from fixed or percentage sizing, reserve guard
//! - [`RiskManager`]: portfolio limits and protective levels
//! - [`FeeCalculator`]: fee estimates when the exchange omits commission

mod fees;
mod ladder;
mod monitor;
mod risk;
mod size_calculator;
mod tracker;
mod types;

pub use types::{
    BalanceSnapshot,
    DropReport,
    OrderIntent,
    ProtectiveLevels,
    Rejection,
    RiskRejection,
    TierRef,
    TriggerEvent,
    WindowOpened,
};

pub use tracker::{PeriodWindow, ReferenceTracker};

pub use ladder::{ThresholdLadder, Tier, TierState};

pub use monitor::{KindView, MonitorView, SharedMonitor, SymbolMonitor, SymbolSnapshot};

pub use size_calculator::{
    BoxedSizeCalculator,
    ReserveGuardSizer,
    SizeCalculator,
    SizingOutcome,
};

pub use risk::{RiskManager, RiskState};

pub use fees::{FeeCalculator, FeeSchedule};
