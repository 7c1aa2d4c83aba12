//! In-memory, read-only quote store.
//!
//! Holds one underlying's option snapshots indexed by trade date together
//! with the daily underlying series. Built once per process and shared
//! read-only between simulation runs.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::types::{OptionQuote, OptionType, OptionsChain, OptionsSnapshot, UnderlyingClose};

/// Read-only quote store for a single underlying.
#[derive(Debug, Clone, Default)]
pub struct QuoteStore {
    snapshots: BTreeMap<NaiveDate, OptionsSnapshot>,
    underlying: BTreeMap<NaiveDate, UnderlyingClose>,
}

impl QuoteStore {
    /// Build a store from raw quote rows and the underlying series.
    ///
    /// Rows for other symbols are ignored. Duplicate contract keys keep the
    /// last row supplied.
    pub fn from_parts(
        symbol: &str,
        quotes: impl IntoIterator<Item = OptionQuote>,
        underlying: impl IntoIterator<Item = UnderlyingClose>,
    ) -> Self {
        let underlying: BTreeMap<NaiveDate, UnderlyingClose> =
            underlying.into_iter().map(|u| (u.date, u)).collect();

        let mut unique: BTreeMap<(NaiveDate, NaiveDate, Decimal, OptionType), OptionQuote> =
            BTreeMap::new();
        for quote in quotes.into_iter().filter(|q| q.symbol == symbol) {
            unique.insert(
                (quote.trade_date, quote.expiration, quote.strike, quote.option_type),
                quote,
            );
        }

        let mut snapshots: BTreeMap<NaiveDate, OptionsSnapshot> = BTreeMap::new();
        for ((date, expiration, _, _), quote) in unique {
            let snapshot = snapshots.entry(date).or_insert_with(|| {
                let close = underlying.get(&date).map(|u| u.close);
                OptionsSnapshot::new(date, symbol.to_string(), close)
            });
            if snapshot.underlying_close.is_none() && quote.underlying_close > Decimal::ZERO {
                snapshot.underlying_close = Some(quote.underlying_close);
            }
            // BTreeMap order means chains arrive sorted by expiration.
            match snapshot.chains.last_mut() {
                Some(chain) if chain.expiration == expiration => chain.add_quote(quote),
                _ => {
                    let mut chain = OptionsChain::new(expiration, (expiration - date).num_days());
                    chain.add_quote(quote);
                    snapshot.chains.push(chain);
                }
            }
        }

        Self {
            snapshots,
            underlying,
        }
    }

    /// Quote dates in ascending order.
    pub fn trading_days(&self) -> Vec<NaiveDate> {
        self.snapshots.keys().copied().collect()
    }

    /// First and last quote date.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.snapshots.keys().next()?;
        let last = self.snapshots.keys().next_back()?;
        Some((*first, *last))
    }

    pub fn snapshot(&self, date: NaiveDate) -> Option<&OptionsSnapshot> {
        self.snapshots.get(&date)
    }

    /// Look up one contract.
    pub fn quote(
        &self,
        date: NaiveDate,
        expiration: NaiveDate,
        strike: Decimal,
        option_type: OptionType,
    ) -> Option<&OptionQuote> {
        self.snapshots
            .get(&date)?
            .chain_at_expiration(expiration)?
            .quote(strike, option_type)
    }

    /// Underlying close on a date: the daily series first, then the close
    /// carried on that day's quotes.
    pub fn underlying_close(&self, date: NaiveDate) -> Option<Decimal> {
        self.underlying
            .get(&date)
            .map(|u| u.close)
            .filter(|c| *c > Decimal::ZERO)
            .or_else(|| self.snapshots.get(&date).and_then(|s| s.underlying_close))
    }

    /// Most recent underlying close on or before `date`.
    pub fn close_on_or_before(&self, date: NaiveDate) -> Option<(NaiveDate, Decimal)> {
        let from_series = self
            .underlying
            .range(..=date)
            .rev()
            .find(|(_, u)| u.close > Decimal::ZERO)
            .map(|(d, u)| (*d, u.close));
        let from_quotes = self
            .snapshots
            .range(..=date)
            .rev()
            .find_map(|(d, s)| s.underlying_close.map(|c| (*d, c)));

        match (from_series, from_quotes) {
            (Some(a), Some(b)) => Some(if b.0 > a.0 { b } else { a }),
            (a, b) => a.or(b),
        }
    }

    /// Reference volatility from the underlying series.
    pub fn reference_volatility(&self, date: NaiveDate) -> Option<f64> {
        self.underlying
            .get(&date)
            .and_then(|u| u.volatility)
            .filter(|v| v.is_finite() && *v > 0.0)
    }

    /// Total number of option quotes held.
    pub fn total_quotes(&self) -> usize {
        self.snapshots.values().map(|s| s.total_quotes()).sum()
    }
}
