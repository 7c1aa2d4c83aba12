//! Short-straddle options backtesting engine.
//!
//! Simulates selling at-the-money straddles at a target days-to-expiration
//! on every trading day of an end-of-day quote history, managing each trade
//! to profit-take, stop-loss or expiry, and stores trades per variant in an
//! idempotent SQLite ledger.

pub mod analytics;
pub mod backtest;
pub mod data;
pub mod ledger;
pub mod metrics;
pub mod sweep;

// Re-export commonly used types
pub use analytics::{BlackScholes, VolatilityFilter, VolatilityFilterConfig, VolatilityMeasure};
pub use backtest::{persist, simulate, BacktestEngine, RunConfig, RunResult, Trade, TradeStatus};
pub use data::{DataLoader, OptionQuote, OptionType, OptionsSnapshot, QuoteStore, UnderlyingClose};
pub use ledger::{InMemoryLedger, Ledger, LedgerError, SqliteLedger};
pub use metrics::{LedgerSummary, MetricsCalculator};
pub use sweep::{run_sweep, SweepConfig};
