//! Ledger performance metrics.
//!
//! Provides per-variant summaries computed from stored trades:
//! - Win rate, average and largest winners/losers
//! - Expectancy ratio
//! - Exit-reason breakdown
//! - Max drawdown of cumulative realized P&L

pub mod calculator;

pub use calculator::{LedgerSummary, MetricsCalculator, MonthlyPnl, VariantReport};
