//! Entry evaluation.
//!
//! For one trading day and DTE target, picks the expiration closest to the
//! target, the at-the-money strike, and prices the short straddle credit.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::data::{OptionType, OptionsChain, OptionsSnapshot, QuoteStore};

use super::data_gap::DataGap;

/// A priced straddle that may become a trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub trading_day: NaiveDate,
    pub expiration: NaiveDate,
    /// Calendar days from `trading_day` to `expiration`.
    pub dte: i64,
    pub strike: Decimal,
    pub underlying_close: Decimal,
    pub call_price: Decimal,
    pub put_price: Decimal,
}

impl Candidate {
    /// Premium received for selling both legs.
    pub fn credit(&self) -> Decimal {
        self.call_price + self.put_price
    }
}

/// Builds straddle candidates from the quote store.
#[derive(Debug, Clone, Copy)]
pub struct EntryEvaluator<'a> {
    store: &'a QuoteStore,
    dte_tolerance: i64,
}

impl<'a> EntryEvaluator<'a> {
    pub fn new(store: &'a QuoteStore, dte_tolerance: i64) -> Self {
        Self {
            store,
            dte_tolerance,
        }
    }

    /// Price the straddle for `dte_target` on `trading_day`.
    pub fn evaluate_candidate(
        &self,
        trading_day: NaiveDate,
        dte_target: i64,
    ) -> Result<Candidate, DataGap> {
        let snapshot = self
            .store
            .snapshot(trading_day)
            .ok_or(DataGap::NoQuotes(trading_day))?;

        let (expiration, dte) = select_expiration(snapshot, dte_target, self.dte_tolerance)
            .ok_or(DataGap::NoExpiration {
                date: trading_day,
                target: dte_target,
                tolerance: self.dte_tolerance,
            })?;

        let underlying_close = self
            .store
            .underlying_close(trading_day)
            .ok_or(DataGap::NoUnderlyingClose(trading_day))?;

        let chain = snapshot
            .chain_at_expiration(expiration)
            .ok_or(DataGap::NoExpiration {
                date: trading_day,
                target: dte_target,
                tolerance: self.dte_tolerance,
            })?;

        let strike = atm_strike(chain, underlying_close).ok_or(DataGap::NoStrikes {
            date: trading_day,
            expiration,
        })?;

        let leg_price = |option_type: OptionType| {
            chain
                .quote(strike, option_type)
                .filter(|q| q.is_priced())
                .map(|q| q.mid)
                .ok_or(DataGap::UnpricedLeg {
                    date: trading_day,
                    expiration,
                    strike,
                    option_type,
                })
        };
        let call_price = leg_price(OptionType::Call)?;
        let put_price = leg_price(OptionType::Put)?;

        Ok(Candidate {
            trading_day,
            expiration,
            dte,
            strike,
            underlying_close,
            call_price,
            put_price,
        })
    }
}

/// Expiration strictly after the snapshot date closest to `dte_target`.
///
/// Exact ties prefer the nearer expiration. Returns `None` when the best
/// match is more than `tolerance` calendar days from the target.
pub fn select_expiration(
    snapshot: &OptionsSnapshot,
    dte_target: i64,
    tolerance: i64,
) -> Option<(NaiveDate, i64)> {
    snapshot
        .future_expirations()
        .into_iter()
        .min_by_key(|(_, dte)| ((dte - dte_target).abs(), *dte))
        .filter(|(_, dte)| (dte - dte_target).abs() <= tolerance)
}

/// Strike closest to the underlying close; ties pick the lower strike.
pub fn atm_strike(chain: &OptionsChain, underlying_close: Decimal) -> Option<Decimal> {
    chain
        .strikes()
        .into_iter()
        .min_by_key(|strike| ((*strike - underlying_close).abs(), *strike))
}
