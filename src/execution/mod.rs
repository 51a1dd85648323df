//! Execution: funds, orders and the state that survives restarts

pub mod ledger;
pub mod orders;
pub mod store;

pub use ledger::{Holding, LedgerState, Portfolio, SharedPortfolio, TradeRecord};
pub use orders::{OrderManager, OrderRecord, OrderRole, OrderState, ReconcileSummary};
pub use store::{PersistedState, StateStore, STATE_VERSION};
