/// Persistent daily call budget shared by every vendor request
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::data::write_json_atomic;
use crate::error::{Result, SyncError};
use crate::utils::Clock;

/// Persisted counter, `{"date": "2024-06-15", "count": 1234}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetState {
    pub date: NaiveDate,
    pub count: u64,
}

/// Gate for rate-limited vendor calls.
///
/// Check, increment and persist happen under one lock. The lock is never held
/// across a vendor request.
pub struct CallBudget {
    limit: u64,
    state_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    state: Mutex<BudgetState>,
}

impl CallBudget {
    /// Budget kept only in memory
    pub fn in_memory(limit: u64, clock: Arc<dyn Clock>) -> Self {
        let today = clock.today();
        CallBudget {
            limit,
            state_path: None,
            clock,
            state: Mutex::new(BudgetState { date: today, count: 0 }),
        }
    }

    /// Load the persisted counter; a missing or unreadable file counts as zero usage
    pub async fn open(limit: u64, state_path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let state_path = state_path.into();
        let today = clock.today();

        let state = match tokio::fs::read_to_string(&state_path).await {
            Ok(content) => match serde_json::from_str::<BudgetState>(&content) {
                Ok(stored) if stored.date == today => stored,
                Ok(stored) => {
                    debug!("Call budget from {} is stale, starting fresh for {}", stored.date, today);
                    BudgetState { date: today, count: 0 }
                }
                Err(e) => {
                    warn!("⚠️  Ignoring unreadable call budget {}: {}", state_path.display(), e);
                    BudgetState { date: today, count: 0 }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BudgetState { date: today, count: 0 },
            Err(e) => {
                warn!("⚠️  Cannot read call budget {}: {}", state_path.display(), e);
                BudgetState { date: today, count: 0 }
            }
        };

        info!(
            "💰 Call budget: {}/{} used on {}",
            state.count, limit, state.date
        );

        CallBudget {
            limit,
            state_path: Some(state_path),
            clock,
            state: Mutex::new(state),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Reserve `cost` calls for today.
    ///
    /// Fails with `QuotaExceeded` and leaves the counter untouched when the
    /// reservation would go over the limit.
    pub async fn consume(&self, cost: u64) -> Result<()> {
        if cost == 0 {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let today = self.clock.today();
        if state.date != today {
            debug!("Call budget rollover {} -> {}", state.date, today);
            *state = BudgetState { date: today, count: 0 };
        }

        if state.count.checked_add(cost).map_or(true, |total| total > self.limit) {
            return Err(SyncError::QuotaExceeded {
                consumed: state.count,
                cost,
                limit: self.limit,
            });
        }

        state.count += cost;

        if let Some(path) = &self.state_path {
            if let Err(e) = write_json_atomic(path, &*state).await {
                warn!("⚠️  Failed to persist call budget to {}: {}", path.display(), e);
            }
        }

        Ok(())
    }

    /// Counter as of today (a stale date reads as zero usage)
    pub async fn snapshot(&self) -> BudgetState {
        let state = self.state.lock().await;
        let today = self.clock.today();
        if state.date != today {
            BudgetState { date: today, count: 0 }
        } else {
            *state
        }
    }

    pub async fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.snapshot().await.count)
    }
}
