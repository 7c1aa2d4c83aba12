use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::data::OptionType;

/// Missing or unusable market data for an entry attempt or a daily mark.
///
/// Never fatal: the day's entry is skipped or the open trade holds its state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataGap {
    #[error("no option quotes on {0}")]
    NoQuotes(NaiveDate),

    #[error("no underlying close on {0}")]
    NoUnderlyingClose(NaiveDate),

    #[error("no expiration within {tolerance} days of DTE {target} on {date}")]
    NoExpiration {
        date: NaiveDate,
        target: i64,
        tolerance: i64,
    },

    #[error("no strikes quoted for {expiration} on {date}")]
    NoStrikes {
        date: NaiveDate,
        expiration: NaiveDate,
    },

    #[error("{option_type:?} {strike} exp {expiration} missing or unpriced on {date}")]
    UnpricedLeg {
        date: NaiveDate,
        expiration: NaiveDate,
        strike: Decimal,
        option_type: OptionType,
    },

    #[error("both legs of {strike} exp {expiration} unpriced on {date}")]
    BothLegsUnpriced {
        date: NaiveDate,
        expiration: NaiveDate,
        strike: Decimal,
    },

    #[error("no settlement close on or before {0}")]
    NoSettlementClose(NaiveDate),
}
