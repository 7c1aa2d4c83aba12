//! Position admission.
//!
//! Greedy policy: the day's single candidate is accepted when there is room
//! under `max_open_trades` and the cool-down since the last entry has passed.

use chrono::NaiveDate;

use super::config::RunConfig;
use super::entry::Candidate;
use super::trade::Trade;

/// Why a candidate was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MaxOpenTrades { open: usize, max: usize },
    TradeDelay { days_since_last: i64, delay: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionResult {
    Accepted(Box<Trade>),
    Rejected(RejectReason),
}

impl AdmissionResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Enforces concurrency and cool-down limits for one run.
#[derive(Debug, Clone)]
pub struct AdmissionController<'a> {
    config: &'a RunConfig,
    variant: &'a str,
}

impl<'a> AdmissionController<'a> {
    pub fn new(config: &'a RunConfig, variant: &'a str) -> Self {
        Self { config, variant }
    }

    /// Admit or reject `candidate`.
    ///
    /// `open_trades` may contain closed trades; only open ones count.
    /// On acceptance the caller records the entry date as the new
    /// `last_entry_date`.
    pub fn try_admit(
        &self,
        candidate: &Candidate,
        open_trades: &[Trade],
        last_entry_date: Option<NaiveDate>,
    ) -> AdmissionResult {
        let open = open_trades.iter().filter(|t| t.is_open()).count();
        if open >= self.config.max_open_trades {
            return AdmissionResult::Rejected(RejectReason::MaxOpenTrades {
                open,
                max: self.config.max_open_trades,
            });
        }

        if self.config.trade_delay > 0 {
            if let Some(last) = last_entry_date {
                let days_since_last = (candidate.trading_day - last).num_days();
                if days_since_last < self.config.trade_delay {
                    return AdmissionResult::Rejected(RejectReason::TradeDelay {
                        days_since_last,
                        delay: self.config.trade_delay,
                    });
                }
            }
        }

        AdmissionResult::Accepted(Box::new(Trade::open(candidate, self.config, self.variant)))
    }
}
