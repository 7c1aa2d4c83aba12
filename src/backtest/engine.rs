//! Run driver.
//!
//! Walks the quote store's trading days in ascending order for one
//! configuration. Each day:
//! 1. Mark open trades to market and apply exits
//! 2. Check the volatility filter
//! 3. Build the day's straddle candidate
//! 4. Admit it under the concurrency and cool-down limits
//!
//! Exits run before entries, so no trade opens and closes on the same day.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::analytics::VolatilityFilter;
use crate::data::QuoteStore;
use crate::ledger::{InMemoryLedger, Ledger, LedgerError, UpsertOutcome};

use super::admission::{AdmissionController, AdmissionResult, RejectReason};
use super::config::{ConfigError, RunConfig};
use super::entry::EntryEvaluator;
use super::lifecycle::{LifecycleManager, MarkOutcome};
use super::trade::{DailyMark, Trade, TradeStatus};

/// Failures that stop a run.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Counters collected during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub trading_days: usize,
    pub entries: usize,
    pub no_candidate: usize,
    pub rejected_max_open: usize,
    pub rejected_delay: usize,
    pub rejected_volatility: usize,
    pub data_gaps: usize,
    pub closed_profit_take: usize,
    pub closed_stop_loss: usize,
    pub closed_expired: usize,
    pub still_open: usize,
}

/// Everything one run produced: the ledger delta plus statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub variant: String,
    pub config: RunConfig,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    /// Trades ordered by entry date.
    pub trades: Vec<Trade>,
    /// Marks ordered by trade then date.
    pub marks: Vec<DailyMark>,
    pub stats: RunStats,
}

impl RunResult {
    pub fn summary(&self) -> String {
        let s = &self.stats;
        format!(
            "{} ({} to {})\n\
             ----------------------------------------\n\
             Trading days: {}\n\
             Entries: {}  (no candidate: {}, max-open: {}, delay: {}, vol filter: {})\n\
             Closed: profit-take {}, stop-loss {}, expired {}\n\
             Still open: {}  Data gaps: {}",
            self.variant,
            self.first_day.map_or("-".to_string(), |d| d.to_string()),
            self.last_day.map_or("-".to_string(), |d| d.to_string()),
            s.trading_days,
            s.entries,
            s.no_candidate,
            s.rejected_max_open,
            s.rejected_delay,
            s.rejected_volatility,
            s.closed_profit_take,
            s.closed_stop_loss,
            s.closed_expired,
            s.still_open,
            s.data_gaps,
        )
    }
}

/// Outcome of writing a run to a ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    pub marks: usize,
}

/// Simulation engine for one configuration over one quote store.
pub struct BacktestEngine<'a> {
    store: &'a QuoteStore,
    config: RunConfig,
    variant: String,
    filter: VolatilityFilter,
}

impl<'a> BacktestEngine<'a> {
    /// Validate `config` and prepare the volatility filter.
    pub fn new(store: &'a QuoteStore, config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let filter = VolatilityFilter::build(&config.volatility_filter, store);
        Ok(Self::with_filter(store, config, filter))
    }

    /// Use a prebuilt filter. `config` must already be valid.
    pub fn with_filter(store: &'a QuoteStore, config: RunConfig, filter: VolatilityFilter) -> Self {
        let variant = config.variant();
        Self {
            store,
            config,
            variant,
            filter,
        }
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Trading days inside the configured date range.
    fn trading_days(&self) -> Vec<NaiveDate> {
        self.store
            .trading_days()
            .into_iter()
            .filter(|d| self.config.start_date.map_or(true, |s| *d >= s))
            .filter(|d| self.config.end_date.map_or(true, |e| *d <= e))
            .collect()
    }

    /// Run against an in-memory ledger and return the delta.
    pub fn run(&self) -> Result<RunResult, LedgerError> {
        let mut ledger = InMemoryLedger::new();
        let days = self.trading_days();
        let stats = self.run_with(&mut ledger, &days)?;
        let (trades, marks) = ledger.into_parts();

        Ok(RunResult {
            variant: self.variant.clone(),
            config: self.config.clone(),
            first_day: days.first().copied(),
            last_day: days.last().copied(),
            trades,
            marks,
            stats,
        })
    }

    /// Day loop over any ledger.
    pub fn run_with<L: Ledger>(
        &self,
        ledger: &mut L,
        days: &[NaiveDate],
    ) -> Result<RunStats, LedgerError> {
        let lifecycle = LifecycleManager::new(self.store);
        let evaluator = EntryEvaluator::new(self.store, self.config.dte_tolerance);
        let admission = AdmissionController::new(&self.config, &self.variant);
        let mut stats = RunStats::default();

        info!(
            variant = %self.variant,
            days = days.len(),
            vol_filter = self.filter.is_enabled(),
            "Starting run"
        );

        for &day in days {
            stats.trading_days += 1;

            // Exits first
            for mut trade in ledger.load_open_trades(&self.variant)? {
                match lifecycle.evaluate(&mut trade, day) {
                    MarkOutcome::Held(mark) => {
                        ledger.record_mark(&mark)?;
                        ledger.upsert(&trade)?;
                    }
                    MarkOutcome::Closed { status, mark } => {
                        ledger.record_mark(&mark)?;
                        ledger.upsert(&trade)?;
                        match status {
                            TradeStatus::ClosedProfitTake => stats.closed_profit_take += 1,
                            TradeStatus::ClosedStopLoss => stats.closed_stop_loss += 1,
                            TradeStatus::ClosedExpired => stats.closed_expired += 1,
                            TradeStatus::Open => {}
                        }
                    }
                    MarkOutcome::Gap(_) => stats.data_gaps += 1,
                    MarkOutcome::Skipped => {}
                }
            }

            // Then at most one entry
            if !self.filter.admits(day) {
                debug!(date = %day, percentile = ?self.filter.percentile(day), "Volatility filter rejected entry");
                stats.rejected_volatility += 1;
                continue;
            }

            let candidate = match evaluator.evaluate_candidate(day, self.config.dte_target) {
                Ok(candidate) => candidate,
                Err(gap) => {
                    debug!(date = %day, "No candidate: {}", gap);
                    stats.no_candidate += 1;
                    continue;
                }
            };

            let open = ledger.load_open_trades(&self.variant)?;
            let last_entry = ledger.last_entry_date(&self.variant)?;
            match admission.try_admit(&candidate, &open, last_entry) {
                AdmissionResult::Accepted(trade) => {
                    ledger.upsert(&trade)?;
                    stats.entries += 1;
                    info!(
                        trade_id = %trade.trade_id,
                        strike = %trade.strike,
                        credit = %trade.entry_credit,
                        "Opened trade"
                    );
                }
                AdmissionResult::Rejected(reason) => {
                    debug!(date = %day, ?reason, "Candidate rejected");
                    match reason {
                        RejectReason::MaxOpenTrades { .. } => stats.rejected_max_open += 1,
                        RejectReason::TradeDelay { .. } => stats.rejected_delay += 1,
                    }
                }
            }
        }

        stats.still_open = ledger.load_open_trades(&self.variant)?.len();
        info!(
            variant = %self.variant,
            entries = stats.entries,
            still_open = stats.still_open,
            "Finished run"
        );
        Ok(stats)
    }
}

/// Pure simulation of one configuration.
pub fn simulate(store: &QuoteStore, config: &RunConfig) -> Result<RunResult, BacktestError> {
    Ok(BacktestEngine::new(store, config.clone())?.run()?)
}

/// Upsert a run's trades and marks inside one ledger transaction.
pub fn persist<L: Ledger>(result: &RunResult, ledger: &mut L) -> Result<PersistStats, LedgerError> {
    ledger.begin_batch()?;
    match write_all(result, ledger) {
        Ok(stats) => {
            ledger.commit_batch()?;
            info!(
                variant = %result.variant,
                inserted = stats.inserted,
                updated = stats.updated,
                unchanged = stats.unchanged,
                conflicts = stats.conflicts,
                "Persisted run"
            );
            Ok(stats)
        }
        Err(e) => {
            ledger.rollback_batch()?;
            Err(e)
        }
    }
}

fn write_all<L: Ledger>(result: &RunResult, ledger: &mut L) -> Result<PersistStats, LedgerError> {
    let mut stats = PersistStats::default();
    for trade in &result.trades {
        match ledger.upsert(trade)? {
            UpsertOutcome::Inserted => stats.inserted += 1,
            UpsertOutcome::Unchanged => stats.unchanged += 1,
            UpsertOutcome::Updated { conflict } => {
                stats.updated += 1;
                if conflict {
                    stats.conflicts += 1;
                }
            }
        }
    }
    for mark in &result.marks {
        ledger.record_mark(mark)?;
        stats.marks += 1;
    }
    Ok(stats)
}
