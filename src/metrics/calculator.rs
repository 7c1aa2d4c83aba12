//! Ledger summary calculator.
//!
//! Computes per-variant trading statistics from ledger rows without
//! re-simulating.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::{Trade, TradeStatus};
use crate::ledger::{Ledger, LedgerError};

/// Performance summary of one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub variant: String,

    // Counts
    pub total_trades: usize,
    pub closed_trades: usize,
    pub open_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L
    pub total_pnl: Decimal,
    pub avg_winner: Decimal,
    pub largest_winner: Decimal,
    /// Average loss as a positive amount.
    pub avg_loser: Decimal,
    /// Largest loss as a positive amount.
    pub largest_loser: Decimal,
    /// `((win% * avg_win) - (loss% * avg_loss)) / avg_loss`; `None` without losers.
    pub expectancy: Option<f64>,

    // Exits
    pub profit_take_exits: usize,
    pub stop_loss_exits: usize,
    pub expired_exits: usize,

    pub avg_days_in_trade: f64,
    /// Deepest fall of cumulative realized P&L from its running peak.
    pub max_drawdown: Decimal,
    pub max_drawdown_date: Option<NaiveDate>,

    pub first_entry: Option<NaiveDate>,
    pub last_exit: Option<NaiveDate>,
}

impl LedgerSummary {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        format!(
            "{}\n\
             ====================\n\
             Trades: {} (closed: {}, open: {})\n\
             Winners: {}  Losers: {}  Win Rate: {:.1}%\n\
             \n\
             Total P&L: {:.2}\n\
             Avg Winner: {:.2}  Largest: {:.2}\n\
             Avg Loser: {:.2}  Largest: {:.2}\n\
             Expectancy: {}\n\
             \n\
             Exits: profit-take {}, stop-loss {}, expired {}\n\
             Avg Days in Trade: {:.1}\n\
             Max Drawdown: {:.2}",
            self.variant,
            self.total_trades,
            self.closed_trades,
            self.open_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate * 100.0,
            self.total_pnl,
            self.avg_winner,
            self.largest_winner,
            self.avg_loser,
            self.largest_loser,
            self.expectancy
                .map_or("n/a".to_string(), |e| format!("{e:.3}")),
            self.profit_take_exits,
            self.stop_loss_exits,
            self.expired_exits,
            self.avg_days_in_trade,
            self.max_drawdown,
        )
    }
}

/// Realized P&L of trades closed in one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPnl {
    pub year: i32,
    pub month: u32,
    pub pnl: Decimal,
    pub trades: usize,
    pub win_rate: f64,
}

/// Summary of one variant with an optional monthly breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantReport {
    #[serde(flatten)]
    pub summary: LedgerSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly: Option<Vec<MonthlyPnl>>,
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Summarize the trades of one variant.
    pub fn summarize(variant: &str, trades: &[Trade]) -> LedgerSummary {
        let closed: Vec<&Trade> = trades.iter().filter(|t| !t.is_open()).collect();
        let pnls: Vec<Decimal> = closed.iter().filter_map(|t| t.realized_pnl).collect();

        let winners: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losers: Vec<Decimal> = pnls
            .iter()
            .copied()
            .filter(|p| *p < Decimal::ZERO)
            .map(|p| -p)
            .collect();

        let win_rate = ratio(winners.len(), closed.len());
        let loss_rate = ratio(losers.len(), closed.len());
        let avg_winner = mean(&winners);
        let avg_loser = mean(&losers);

        let count_status = |status: TradeStatus| closed.iter().filter(|t| t.status == status).count();

        let held: Vec<i64> = closed.iter().filter_map(|t| t.days_held()).collect();
        let avg_days_in_trade = if held.is_empty() {
            0.0
        } else {
            held.iter().sum::<i64>() as f64 / held.len() as f64
        };

        let (max_drawdown, max_drawdown_date) = Self::max_drawdown(trades);

        LedgerSummary {
            variant: variant.to_string(),
            total_trades: trades.len(),
            closed_trades: closed.len(),
            open_trades: trades.len() - closed.len(),
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate,
            total_pnl: pnls.iter().copied().sum(),
            avg_winner,
            largest_winner: winners.iter().copied().max().unwrap_or(Decimal::ZERO),
            avg_loser,
            largest_loser: losers.iter().copied().max().unwrap_or(Decimal::ZERO),
            expectancy: Self::expectancy(win_rate, avg_winner, loss_rate, avg_loser),
            profit_take_exits: count_status(TradeStatus::ClosedProfitTake),
            stop_loss_exits: count_status(TradeStatus::ClosedStopLoss),
            expired_exits: count_status(TradeStatus::ClosedExpired),
            avg_days_in_trade,
            max_drawdown,
            max_drawdown_date,
            first_entry: trades.iter().map(|t| t.entry_date).min(),
            last_exit: closed.iter().filter_map(|t| t.exit_date).max(),
        }
    }

    /// Summaries for one variant, or for every variant in the ledger.
    pub fn summarize_ledger<L: Ledger>(
        ledger: &L,
        variant: Option<&str>,
    ) -> Result<Vec<LedgerSummary>, LedgerError> {
        Ok(Self::report_ledger(ledger, variant, false)?
            .into_iter()
            .map(|r| r.summary)
            .collect())
    }

    /// Per-variant reports, with monthly P&L when `monthly` is set.
    pub fn report_ledger<L: Ledger>(
        ledger: &L,
        variant: Option<&str>,
        monthly: bool,
    ) -> Result<Vec<VariantReport>, LedgerError> {
        let variants = match variant {
            Some(v) => vec![v.to_string()],
            None => ledger.variants()?,
        };
        variants
            .iter()
            .map(|v| {
                let trades = ledger.load_all(Some(v))?;
                Ok(VariantReport {
                    summary: Self::summarize(v, &trades),
                    monthly: monthly.then(|| Self::monthly_pnl(&trades)),
                })
            })
            .collect()
    }

    /// Expectancy ratio: edge per unit of average loss.
    fn expectancy(win_rate: f64, avg_win: Decimal, loss_rate: f64, avg_loss: Decimal) -> Option<f64> {
        let avg_loss = avg_loss.to_f64().filter(|l| *l > 0.0)?;
        let avg_win = avg_win.to_f64()?;
        Some((win_rate * avg_win - loss_rate * avg_loss) / avg_loss)
    }

    /// Max drawdown of cumulative realized P&L, ordered by exit date.
    fn max_drawdown(trades: &[Trade]) -> (Decimal, Option<NaiveDate>) {
        let mut closes: Vec<(NaiveDate, &str, Decimal)> = trades
            .iter()
            .filter_map(|t| Some((t.exit_date?, t.trade_id.as_str(), t.realized_pnl?)))
            .collect();
        closes.sort();

        let mut cumulative = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_drawdown = Decimal::ZERO;
        let mut max_date = None;

        for (date, _, pnl) in closes {
            cumulative += pnl;
            if cumulative > peak {
                peak = cumulative;
            }
            let drawdown = peak - cumulative;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                max_date = Some(date);
            }
        }

        (max_drawdown, max_date)
    }

    /// Realized P&L grouped by exit month.
    pub fn monthly_pnl(trades: &[Trade]) -> Vec<MonthlyPnl> {
        let mut monthly: BTreeMap<(i32, u32), Vec<Decimal>> = BTreeMap::new();
        for trade in trades {
            if let (Some(exit), Some(pnl)) = (trade.exit_date, trade.realized_pnl) {
                monthly.entry((exit.year(), exit.month())).or_default().push(pnl);
            }
        }

        monthly
            .into_iter()
            .map(|((year, month), pnls)| {
                let winners = pnls.iter().filter(|p| **p > Decimal::ZERO).count();
                MonthlyPnl {
                    year,
                    month,
                    pnl: pnls.iter().copied().sum(),
                    trades: pnls.len(),
                    win_rate: ratio(winners, pnls.len()),
                }
            })
            .collect()
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as i64)
}
