//! Straddle trades and daily marks.
//!
//! A `Trade` is created `Open` on admission, marked daily, and frozen in one
//! of the closed states on its first exit. `entry_credit` never changes.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::RunConfig;
use super::entry::Candidate;

/// Lifecycle state of a short straddle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    /// Closed after capturing the profit-take share of the credit.
    ClosedProfitTake,
    /// Closed after losing the stop-loss share of the credit.
    ClosedStopLoss,
    /// Settled at intrinsic value on expiration.
    ClosedExpired,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::ClosedProfitTake => "PROFIT_TAKE",
            Self::ClosedStopLoss => "STOP_LOSS",
            Self::ClosedExpired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "PROFIT_TAKE" => Some(Self::ClosedProfitTake),
            "STOP_LOSS" => Some(Self::ClosedStopLoss),
            "EXPIRED" => Some(Self::ClosedExpired),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A short straddle position and its ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Parameter-set key shared by every trade of one run.
    pub variant: String,
    /// `{symbol}-{entry}-{expiration}-D{dte_target}`, stable across re-runs.
    pub trade_id: String,
    pub symbol: String,

    pub entry_date: NaiveDate,
    pub expiration_date: NaiveDate,
    pub dte_target: i64,
    /// Actual calendar days between entry and expiration.
    pub entry_dte: i64,

    pub strike: Decimal,
    pub entry_call_price: Decimal,
    pub entry_put_price: Decimal,
    pub entry_underlying: Decimal,
    /// Premium received: call mid + put mid.
    pub entry_credit: Decimal,

    pub status: TradeStatus,
    pub exit_date: Option<NaiveDate>,
    /// Cost to close, or intrinsic value at expiration.
    pub exit_debit: Option<Decimal>,
    pub exit_underlying: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,

    /// Most recent successful mark.
    pub last_mark_date: Option<NaiveDate>,
    pub last_mark_debit: Option<Decimal>,

    // Parameters at entry
    pub max_open_trades_at_entry: usize,
    pub profit_take_pct: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub trade_delay: i64,
    pub volatility_filter: bool,
}

impl Trade {
    /// Deterministic trade identifier.
    pub fn make_id(
        symbol: &str,
        entry_date: NaiveDate,
        expiration_date: NaiveDate,
        dte_target: i64,
    ) -> String {
        format!(
            "{}-{}-{}-D{}",
            symbol,
            entry_date.format("%Y%m%d"),
            expiration_date.format("%Y%m%d"),
            dte_target
        )
    }

    /// Open a new straddle from an admitted candidate.
    pub fn open(candidate: &Candidate, config: &RunConfig, variant: &str) -> Self {
        Self {
            variant: variant.to_string(),
            trade_id: Self::make_id(
                &config.symbol,
                candidate.trading_day,
                candidate.expiration,
                config.dte_target,
            ),
            symbol: config.symbol.clone(),
            entry_date: candidate.trading_day,
            expiration_date: candidate.expiration,
            dte_target: config.dte_target,
            entry_dte: candidate.dte,
            strike: candidate.strike,
            entry_call_price: candidate.call_price,
            entry_put_price: candidate.put_price,
            entry_underlying: candidate.underlying_close,
            entry_credit: candidate.credit(),
            status: TradeStatus::Open,
            exit_date: None,
            exit_debit: None,
            exit_underlying: None,
            realized_pnl: None,
            last_mark_date: None,
            last_mark_debit: None,
            max_open_trades_at_entry: config.max_open_trades,
            profit_take_pct: config.profit_take_pct,
            stop_loss_pct: config.stop_loss_pct,
            trade_delay: config.trade_delay,
            volatility_filter: config.volatility_filter.enabled,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Freeze the trade in a closed state.
    ///
    /// Has no effect on a trade that is already closed.
    pub fn close(
        &mut self,
        status: TradeStatus,
        exit_date: NaiveDate,
        exit_debit: Decimal,
        exit_underlying: Option<Decimal>,
    ) {
        if !self.is_open() || status.is_open() {
            return;
        }
        self.status = status;
        self.exit_date = Some(exit_date);
        self.exit_debit = Some(exit_debit);
        self.exit_underlying = exit_underlying;
        self.realized_pnl = Some(self.entry_credit - exit_debit);
    }

    /// Record a successful daily mark.
    pub fn record_mark(&mut self, date: NaiveDate, debit: Decimal) {
        self.last_mark_date = Some(date);
        self.last_mark_debit = Some(debit);
    }

    /// Realized P&L as a percentage of the credit.
    pub fn pnl_pct(&self) -> Option<f64> {
        let pnl = self.realized_pnl?;
        if self.entry_credit.is_zero() {
            return None;
        }
        (pnl / self.entry_credit * Decimal::ONE_HUNDRED).to_f64()
    }

    /// Calendar days from entry to exit (or to the last mark while open).
    pub fn days_held(&self) -> Option<i64> {
        let end = self.exit_date.or(self.last_mark_date)?;
        Some((end - self.entry_date).num_days())
    }

    pub fn is_winner(&self) -> bool {
        self.realized_pnl.is_some_and(|p| p > Decimal::ZERO)
    }
}

/// One day's valuation of an open straddle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMark {
    pub variant: String,
    pub trade_id: String,
    pub date: NaiveDate,
    pub underlying_close: Option<Decimal>,
    pub call_price: Decimal,
    pub put_price: Decimal,
    /// Cost to buy back both legs.
    pub debit: Decimal,
    /// A leg was priced by the closing-cost proxy.
    pub proxied: bool,
}
