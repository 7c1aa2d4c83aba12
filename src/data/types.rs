//! Core data types for the straddle backtester.
//!
//! These mirror the normalized quote tables written by the importer: one row
//! per option contract per trade date, plus a daily underlying series.

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }

    /// Intrinsic value of one option of this type.
    pub fn intrinsic(&self, spot: Decimal, strike: Decimal) -> Decimal {
        match self {
            Self::Call => (spot - strike).max(Decimal::ZERO),
            Self::Put => (strike - spot).max(Decimal::ZERO),
        }
    }
}

/// Convert a stored floating point price into a `Decimal`.
///
/// Values are rounded to six decimal places so that binary noise from the
/// importer never leaks into credits, debits or trade identifiers.
pub fn price_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp(6).normalize())
}

/// A single option quote on one trade date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Underlying symbol (e.g., "SPX")
    pub symbol: String,

    /// Date of the quote (trade date)
    pub trade_date: NaiveDate,

    /// Option expiration date
    pub expiration: NaiveDate,

    /// Strike price
    pub strike: Decimal,

    /// Option type (call or put)
    pub option_type: OptionType,

    /// Bid price
    pub bid: Decimal,

    /// Ask price
    pub ask: Decimal,

    /// Mid price (stored, or derived from bid/ask)
    pub mid: Decimal,

    /// Implied volatility, when the vendor supplied one
    pub implied_volatility: Option<f64>,

    /// Underlying close on the trade date
    pub underlying_close: Decimal,
}

impl OptionQuote {
    /// Derive the mid price used for marking.
    ///
    /// A stored positive mid wins; otherwise the bid/ask midpoint is used as
    /// long as the ask is positive. Anything else is unpriced (zero).
    pub fn derive_mid(bid: Decimal, ask: Decimal, stored_mid: Option<Decimal>) -> Decimal {
        match stored_mid {
            Some(mid) if mid > Decimal::ZERO => mid,
            _ if ask > Decimal::ZERO && bid >= Decimal::ZERO => (bid + ask) / Decimal::TWO,
            _ => Decimal::ZERO,
        }
    }

    /// Calendar days from the trade date to expiration.
    pub fn dte(&self) -> i64 {
        (self.expiration - self.trade_date).num_days()
    }

    /// Whether the quote carries a usable (positive) mid price.
    pub fn is_priced(&self) -> bool {
        self.mid > Decimal::ZERO
    }
}

/// All options for a single expiration date.
#[derive(Debug, Clone, Default)]
pub struct OptionsChain {
    /// Expiration date for this chain
    pub expiration: NaiveDate,

    /// Days to expiration
    pub dte: i64,

    /// Call options sorted by strike
    pub calls: Vec<OptionQuote>,

    /// Put options sorted by strike
    pub puts: Vec<OptionQuote>,
}

impl OptionsChain {
    /// Create a new empty chain.
    pub fn new(expiration: NaiveDate, dte: i64) -> Self {
        Self {
            expiration,
            dte,
            calls: Vec::new(),
            puts: Vec::new(),
        }
    }

    /// Add a quote to the appropriate side.
    pub fn add_quote(&mut self, quote: OptionQuote) {
        match quote.option_type {
            OptionType::Call => self.calls.push(quote),
            OptionType::Put => self.puts.push(quote),
        }
    }

    /// Get all strikes available in this chain.
    pub fn strikes(&self) -> Vec<Decimal> {
        let mut strikes: Vec<_> = self
            .calls
            .iter()
            .chain(self.puts.iter())
            .map(|q| q.strike)
            .collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }

    /// Find a call at a specific strike.
    pub fn call_at_strike(&self, strike: Decimal) -> Option<&OptionQuote> {
        self.calls.iter().find(|q| q.strike == strike)
    }

    /// Find a put at a specific strike.
    pub fn put_at_strike(&self, strike: Decimal) -> Option<&OptionQuote> {
        self.puts.iter().find(|q| q.strike == strike)
    }

    /// Find the quote of a given type at a strike.
    pub fn quote(&self, strike: Decimal, option_type: OptionType) -> Option<&OptionQuote> {
        match option_type {
            OptionType::Call => self.call_at_strike(strike),
            OptionType::Put => self.put_at_strike(strike),
        }
    }
}

/// Complete options snapshot for one underlying on one date.
#[derive(Debug, Clone, Default)]
pub struct OptionsSnapshot {
    /// Trading date
    pub date: NaiveDate,

    /// Underlying symbol
    pub symbol: String,

    /// Underlying close, if known for this date
    pub underlying_close: Option<Decimal>,

    /// All option chains sorted by expiration
    pub chains: Vec<OptionsChain>,
}

impl OptionsSnapshot {
    /// Create a new empty snapshot.
    pub fn new(date: NaiveDate, symbol: String, underlying_close: Option<Decimal>) -> Self {
        Self {
            date,
            symbol,
            underlying_close,
            chains: Vec::new(),
        }
    }

    /// Get chain for a specific expiration.
    pub fn chain_at_expiration(&self, expiration: NaiveDate) -> Option<&OptionsChain> {
        self.chains.iter().find(|c| c.expiration == expiration)
    }

    /// Get chains within a DTE range.
    pub fn chains_by_dte(&self, min_dte: i64, max_dte: i64) -> Vec<&OptionsChain> {
        self.chains
            .iter()
            .filter(|c| c.dte >= min_dte && c.dte <= max_dte)
            .collect()
    }

    /// Expirations strictly after the snapshot date, ascending.
    pub fn future_expirations(&self) -> Vec<(NaiveDate, i64)> {
        self.chains
            .iter()
            .filter(|c| c.dte > 0)
            .map(|c| (c.expiration, c.dte))
            .collect()
    }

    /// Total number of option quotes in this snapshot.
    pub fn total_quotes(&self) -> usize {
        self.chains
            .iter()
            .map(|c| c.calls.len() + c.puts.len())
            .sum()
    }
}

/// Daily close (and optional reference volatility) of the underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderlyingClose {
    pub date: NaiveDate,
    pub close: Decimal,
    /// Reference volatility (e.g. an index implied volatility level).
    pub volatility: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_option_type_parsing() {
        assert_eq!(OptionType::from_str("C"), Some(OptionType::Call));
        assert_eq!(OptionType::from_str("P"), Some(OptionType::Put));
        assert_eq!(OptionType::from_str("call"), Some(OptionType::Call));
        assert_eq!(OptionType::from_str(" PUT "), Some(OptionType::Put));
        assert_eq!(OptionType::from_str("X"), None);
    }

    #[test]
    fn test_intrinsic_value() {
        assert_eq!(OptionType::Call.intrinsic(dec!(105), dec!(100)), dec!(5));
        assert_eq!(OptionType::Call.intrinsic(dec!(95), dec!(100)), dec!(0));
        assert_eq!(OptionType::Put.intrinsic(dec!(95), dec!(100)), dec!(5));
        assert_eq!(OptionType::Put.intrinsic(dec!(105), dec!(100)), dec!(0));
    }

    #[test]
    fn test_derive_mid() {
        assert_eq!(OptionQuote::derive_mid(dec!(1.9), dec!(2.1), None), dec!(2.0));
        assert_eq!(OptionQuote::derive_mid(dec!(1.9), dec!(2.1), Some(dec!(2.05))), dec!(2.05));
        assert_eq!(OptionQuote::derive_mid(dec!(1.9), dec!(2.1), Some(dec!(0))), dec!(2.0));
        assert_eq!(OptionQuote::derive_mid(dec!(0), dec!(0), None), dec!(0));
    }

    #[test]
    fn test_price_from_f64_rounds_noise() {
        assert_eq!(price_from_f64(2.1), Some(dec!(2.1)));
        assert_eq!(price_from_f64(0.1 + 0.2), Some(dec!(0.3)));
        assert_eq!(price_from_f64(f64::NAN), None);
    }
}
