//! Short-straddle backtesting.
//!
//! - Entry evaluation (expiration, ATM strike, credit)
//! - Admission control (max open trades, trade delay)
//! - Trade lifecycle (mark-to-market, profit-take, stop-loss, expiry)
//! - Run driver and ledger persistence

pub mod admission;
pub mod config;
pub mod data_gap;
pub mod engine;
pub mod entry;
pub mod lifecycle;
pub mod trade;

pub use admission::{AdmissionController, AdmissionResult, RejectReason};
pub use config::{ConfigError, RunConfig};
pub use data_gap::DataGap;
pub use engine::{persist, simulate, BacktestEngine, BacktestError, PersistStats, RunResult, RunStats};
pub use entry::{Candidate, EntryEvaluator};
pub use lifecycle::{exit_signal, ClosingDebit, LifecycleManager, MarkOutcome};
pub use trade::{DailyMark, Trade, TradeStatus};
