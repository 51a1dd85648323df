//! JSON state file written atomically between cycles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::common::errors::{Result, TraderError};
use crate::execution::ledger::LedgerState;
use crate::execution::orders::OrderRecord;
use crate::strategy::SymbolSnapshot;

/// Current on-disk format
pub const STATE_VERSION: u32 = 1;

/// Everything needed to resume after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub symbols: Vec<SymbolSnapshot>,
    /// Non-terminal orders only
    pub orders: Vec<OrderRecord>,
    pub ledger: LedgerState,
}

/// Reads and writes [`PersistedState`] at a fixed path
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved state; `None` when no file exists yet
    pub async fn load(&self) -> Result<Option<PersistedState>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let state: PersistedState = serde_json::from_slice(&raw).map_err(|e| {
            TraderError::Persistence(format!("{} is unreadable: {}", self.path.display(), e))
        })?;
        if state.version != STATE_VERSION {
            return Err(TraderError::Persistence(format!(
                "{} has version {}, expected {}",
                self.path.display(),
                state.version,
                STATE_VERSION
            )));
        }

        info!(
            path = %self.path.display(),
            saved_at = %state.saved_at,
            symbols = state.symbols.len(),
            orders = state.orders.len(),
            "Loaded saved state"
        );
        Ok(Some(state))
    }

    /// Write via a temp file and rename so a crash never leaves a torn file
    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let payload = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, payload).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!(path = %self.path.display(), orders = state.orders.len(), "State saved");
        Ok(())
    }
}
