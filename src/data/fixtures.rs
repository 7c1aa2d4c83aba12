//! Synthetic quote builders shared by unit tests.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use super::types::{OptionQuote, OptionType, UnderlyingClose};

/// Day `offset` after 2024-01-01.
pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
}

pub fn quote(
    trade_date: NaiveDate,
    expiration: NaiveDate,
    strike: Decimal,
    option_type: OptionType,
    mid: Decimal,
    underlying_close: Decimal,
) -> OptionQuote {
    OptionQuote {
        symbol: "SPX".to_string(),
        trade_date,
        expiration,
        strike,
        option_type,
        bid: mid,
        ask: mid,
        mid,
        implied_volatility: Some(0.20),
        underlying_close,
    }
}

/// Call and put at one strike.
pub fn straddle(
    trade_date: NaiveDate,
    expiration: NaiveDate,
    strike: Decimal,
    call_mid: Decimal,
    put_mid: Decimal,
    underlying_close: Decimal,
) -> Vec<OptionQuote> {
    vec![
        quote(trade_date, expiration, strike, OptionType::Call, call_mid, underlying_close),
        quote(trade_date, expiration, strike, OptionType::Put, put_mid, underlying_close),
    ]
}

pub fn underlying(date: NaiveDate, close: Decimal, volatility: Option<f64>) -> UnderlyingClose {
    UnderlyingClose {
        date,
        close,
        volatility,
    }
}
