//! Trade ledger storage.
//!
//! Trades are keyed by `(variant, trade_id)` and written with idempotent
//! upserts, so re-running a variant overwrites its rows instead of adding
//! new ones. Daily marks are keyed by `(variant, trade_id, mark_date)`.

pub mod memory;
pub mod sqlite;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

use crate::backtest::{DailyMark, Trade};

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

/// Ledger storage failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt ledger row {trade_id}: {reason}")]
    CorruptRow { trade_id: String, reason: String },
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Stored row already identical.
    Unchanged,
    /// Stored row overwritten. `conflict` marks a divergent overwrite of a
    /// closed trade or of its entry credit.
    Updated { conflict: bool },
}

/// Compare the stored row (if any) with the incoming one.
pub fn classify(previous: Option<&Trade>, incoming: &Trade) -> UpsertOutcome {
    match previous {
        None => UpsertOutcome::Inserted,
        Some(prev) if prev == incoming => UpsertOutcome::Unchanged,
        Some(prev) => {
            let conflict = prev.entry_credit != incoming.entry_credit
                || prev.expiration_date != incoming.expiration_date
                || !prev.is_open();
            if conflict {
                warn!(
                    variant = %incoming.variant,
                    trade_id = %incoming.trade_id,
                    stored_status = prev.status.as_str(),
                    stored_pnl = ?prev.realized_pnl,
                    new_status = incoming.status.as_str(),
                    new_pnl = ?incoming.realized_pnl,
                    "Persistence conflict: overwriting divergent ledger row"
                );
            }
            UpsertOutcome::Updated { conflict }
        }
    }
}

/// Durable (or in-memory) trade ledger.
pub trait Ledger {
    /// Insert or overwrite a trade keyed by `(variant, trade_id)`.
    fn upsert(&mut self, trade: &Trade) -> Result<UpsertOutcome, LedgerError>;

    /// Insert or overwrite a daily mark.
    fn record_mark(&mut self, mark: &DailyMark) -> Result<(), LedgerError>;

    /// Open trades of a variant, ordered by entry date.
    fn load_open_trades(&self, variant: &str) -> Result<Vec<Trade>, LedgerError>;

    /// All trades, optionally restricted to one variant.
    fn load_all(&self, variant: Option<&str>) -> Result<Vec<Trade>, LedgerError>;

    /// Marks of one trade, ordered by date.
    fn load_marks(&self, variant: &str, trade_id: &str) -> Result<Vec<DailyMark>, LedgerError>;

    /// Latest entry date of a variant, whatever the trade's status.
    fn last_entry_date(&self, variant: &str) -> Result<Option<NaiveDate>, LedgerError>;

    /// Distinct variants present.
    fn variants(&self) -> Result<Vec<String>, LedgerError>;

    /// Number of stored trades.
    fn trade_count(&self) -> Result<usize, LedgerError> {
        Ok(self.load_all(None)?.len())
    }

    fn begin_batch(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }

    fn rollback_batch(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}
