//! Trade lifecycle state machine.
//!
//! Each trading day an open straddle is evaluated once, first match wins:
//! 1. Expiration reached: settle at intrinsic value
//! 2. Price the closing debit (proxying at most one missing leg)
//! 3. Profit-take threshold
//! 4. Stop-loss threshold
//! 5. Hold
//!
//! A day where the debit cannot be priced holds the trade unchanged.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::analytics::{normalize_volatility, BlackScholes};
use crate::data::types::price_from_f64;
use crate::data::{OptionQuote, OptionType, QuoteStore};

use super::config::pct_fraction;
use super::data_gap::DataGap;
use super::trade::{DailyMark, Trade, TradeStatus};

/// Result of one day's evaluation of an open trade.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    /// Marked and still open.
    Held(DailyMark),
    /// Closed today.
    Closed {
        status: TradeStatus,
        mark: DailyMark,
    },
    /// No usable prices; trade state unchanged.
    Gap(DataGap),
    /// Trade was not open.
    Skipped,
}

/// Cost to buy back both legs on one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosingDebit {
    pub call: Decimal,
    pub put: Decimal,
    /// One leg priced by the proxy instead of a quote.
    pub proxied: bool,
}

impl ClosingDebit {
    pub fn total(&self) -> Decimal {
        self.call + self.put
    }
}

/// Exit decision for a priced straddle.
///
/// Profit-take is checked first, so it wins when both thresholds are met.
pub fn exit_signal(
    entry_credit: Decimal,
    debit: Decimal,
    profit_take: Option<Decimal>,
    stop_loss: Option<Decimal>,
) -> Option<TradeStatus> {
    if entry_credit <= Decimal::ZERO {
        return None;
    }
    if let Some(pt) = profit_take {
        if (entry_credit - debit) / entry_credit >= pt {
            return Some(TradeStatus::ClosedProfitTake);
        }
    }
    if let Some(sl) = stop_loss {
        if (debit - entry_credit) / entry_credit >= sl {
            return Some(TradeStatus::ClosedStopLoss);
        }
    }
    None
}

/// Marks open trades to market and applies exits.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleManager<'a> {
    store: &'a QuoteStore,
    pricer: BlackScholes,
}

impl<'a> LifecycleManager<'a> {
    pub fn new(store: &'a QuoteStore) -> Self {
        Self {
            store,
            pricer: BlackScholes::default(),
        }
    }

    /// Evaluate `trade` on `day`, closing it in place when an exit fires.
    ///
    /// Thresholds come from the parameters snapshotted on the trade.
    pub fn evaluate(&self, trade: &mut Trade, day: NaiveDate) -> MarkOutcome {
        if !trade.is_open() || day < trade.entry_date {
            return MarkOutcome::Skipped;
        }

        if day >= trade.expiration_date {
            return self.settle_expired(trade);
        }

        let debit = match self.closing_debit(trade, day) {
            Ok(debit) => debit,
            Err(gap) => {
                warn!(trade_id = %trade.trade_id, date = %day, "Holding trade: {}", gap);
                return MarkOutcome::Gap(gap);
            }
        };

        let underlying = self.store.underlying_close(day);
        let mark = DailyMark {
            variant: trade.variant.clone(),
            trade_id: trade.trade_id.clone(),
            date: day,
            underlying_close: underlying,
            call_price: debit.call,
            put_price: debit.put,
            debit: debit.total(),
            proxied: debit.proxied,
        };
        trade.record_mark(day, mark.debit);

        let profit_take = trade.profit_take_pct.and_then(pct_fraction);
        let stop_loss = trade.stop_loss_pct.and_then(pct_fraction);

        match exit_signal(trade.entry_credit, mark.debit, profit_take, stop_loss) {
            Some(status) => {
                trade.close(status, day, mark.debit, underlying);
                info!(
                    trade_id = %trade.trade_id,
                    date = %day,
                    status = status.as_str(),
                    credit = %trade.entry_credit,
                    debit = %mark.debit,
                    "Closed trade"
                );
                MarkOutcome::Closed { status, mark }
            }
            None => {
                debug!(trade_id = %trade.trade_id, date = %day, debit = %mark.debit, "Holding trade");
                MarkOutcome::Held(mark)
            }
        }
    }

    /// Settle at intrinsic value using the last close on or before expiration.
    fn settle_expired(&self, trade: &mut Trade) -> MarkOutcome {
        let expiration = trade.expiration_date;
        let Some((close_date, close)) = self.store.close_on_or_before(expiration) else {
            let gap = DataGap::NoSettlementClose(expiration);
            warn!(trade_id = %trade.trade_id, "Holding expired trade: {}", gap);
            return MarkOutcome::Gap(gap);
        };
        if settlement_is_stale(close_date, expiration) {
            warn!(
                trade_id = %trade.trade_id,
                %expiration,
                %close_date,
                "Settling on a stale underlying close"
            );
        }

        let call = OptionType::Call.intrinsic(close, trade.strike);
        let put = OptionType::Put.intrinsic(close, trade.strike);
        let mark = DailyMark {
            variant: trade.variant.clone(),
            trade_id: trade.trade_id.clone(),
            date: expiration,
            underlying_close: Some(close),
            call_price: call,
            put_price: put,
            debit: call + put,
            proxied: false,
        };

        trade.record_mark(expiration, mark.debit);
        trade.close(TradeStatus::ClosedExpired, expiration, mark.debit, Some(close));
        info!(
            trade_id = %trade.trade_id,
            settlement = %close,
            debit = %mark.debit,
            "Expired trade"
        );
        MarkOutcome::Closed {
            status: TradeStatus::ClosedExpired,
            mark,
        }
    }

    /// Price both legs, replacing at most one missing leg with the proxy.
    pub fn closing_debit(&self, trade: &Trade, day: NaiveDate) -> Result<ClosingDebit, DataGap> {
        let leg = |option_type| {
            self.store
                .quote(day, trade.expiration_date, trade.strike, option_type)
                .filter(|q| q.is_priced())
        };

        match (leg(OptionType::Call), leg(OptionType::Put)) {
            (Some(call), Some(put)) => Ok(ClosingDebit {
                call: call.mid,
                put: put.mid,
                proxied: false,
            }),
            (Some(call), None) => Ok(ClosingDebit {
                call: call.mid,
                put: self.proxy_price(trade, day, OptionType::Put, call)?,
                proxied: true,
            }),
            (None, Some(put)) => Ok(ClosingDebit {
                call: self.proxy_price(trade, day, OptionType::Call, put)?,
                put: put.mid,
                proxied: true,
            }),
            (None, None) => Err(DataGap::BothLegsUnpriced {
                date: day,
                expiration: trade.expiration_date,
                strike: trade.strike,
            }),
        }
    }

    /// Black-Scholes value of the missing leg from the other leg's implied
    /// volatility (or the reference volatility), else intrinsic value.
    fn proxy_price(
        &self,
        trade: &Trade,
        day: NaiveDate,
        missing: OptionType,
        priced: &OptionQuote,
    ) -> Result<Decimal, DataGap> {
        let spot = self
            .store
            .underlying_close(day)
            .or(Some(priced.underlying_close).filter(|c| *c > Decimal::ZERO))
            .ok_or(DataGap::UnpricedLeg {
                date: day,
                expiration: trade.expiration_date,
                strike: trade.strike,
                option_type: missing,
            })?;

        let intrinsic = missing.intrinsic(spot, trade.strike);
        let vol = priced
            .implied_volatility
            .and_then(normalize_volatility)
            .or_else(|| self.store.reference_volatility(day).and_then(normalize_volatility));

        let Some(vol) = vol else {
            return Ok(intrinsic);
        };
        let (Some(s), Some(k)) = (to_f64(spot), to_f64(trade.strike)) else {
            return Ok(intrinsic);
        };
        let time = (trade.expiration_date - day).num_days() as f64 / 365.0;
        let value = self.pricer.price(missing, s, k, time, vol);

        Ok(price_from_f64(value)
            .filter(|p| *p >= Decimal::ZERO)
            .map_or(intrinsic, |p| p.max(intrinsic)))
    }
}

/// Settlement closes older than this many calendar days before expiration
/// are logged as stale.
const MAX_SETTLEMENT_LAG_DAYS: i64 = 4;

fn settlement_is_stale(close_date: NaiveDate, expiration: NaiveDate) -> bool {
    (expiration - close_date).num_days() > MAX_SETTLEMENT_LAG_DAYS
}

fn to_f64(value: Decimal) -> Option<f64> {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::config::RunConfig;
    use crate::backtest::entry::Candidate;
    use crate::data::fixtures::{day, quote, straddle, underlying};
    use rust_decimal_macros::dec;

    fn open_trade(config: &RunConfig) -> Trade {
        let candidate = Candidate {
            trading_day: day(0),
            expiration: day(10),
            dte: 10,
            strike: dec!(100),
            underlying_close: dec!(100),
            call_price: dec!(2),
            put_price: dec!(2),
        };
        Trade::open(&candidate, config, "v")
    }

    fn config(pt: Option<f64>, sl: Option<f64>) -> RunConfig {
        RunConfig {
            dte_target: 10,
            profit_take_pct: pt,
            stop_loss_pct: sl,
            ..Default::default()
        }
    }

    #[test]
    fn test_exit_signal_priority() {
        let credit = dec!(4);
        assert_eq!(
            exit_signal(credit, dec!(3.40), Some(dec!(0.15)), Some(dec!(1))),
            Some(TradeStatus::ClosedProfitTake)
        );
        assert_eq!(exit_signal(credit, dec!(3.41), Some(dec!(0.15)), None), None);
        assert_eq!(
            exit_signal(credit, dec!(8), Some(dec!(0.15)), Some(dec!(1))),
            Some(TradeStatus::ClosedStopLoss)
        );
        // Pathological thresholds: both met, profit-take wins
        assert_eq!(
            exit_signal(credit, dec!(4), Some(dec!(0)), Some(dec!(0))),
            Some(TradeStatus::ClosedProfitTake)
        );
        assert_eq!(exit_signal(credit, dec!(100), None, None), None);
    }

    #[test]
    fn test_profit_take_closes_at_threshold() {
        let store = QuoteStore::from_parts(
            "SPX",
            straddle(day(1), day(10), dec!(100), dec!(1.70), dec!(1.70), dec!(100)),
            vec![underlying(day(1), dec!(100), None)],
        );
        let mut trade = open_trade(&config(Some(15.0), Some(100.0)));
        let outcome = LifecycleManager::new(&store).evaluate(&mut trade, day(1));

        assert!(matches!(
            outcome,
            MarkOutcome::Closed {
                status: TradeStatus::ClosedProfitTake,
                ..
            }
        ));
        assert_eq!(trade.exit_date, Some(day(1)));
        assert_eq!(trade.exit_debit, Some(dec!(3.40)));
        assert_eq!(trade.realized_pnl, Some(dec!(0.60)));
    }

    #[test]
    fn test_stop_loss() {
        let store = QuoteStore::from_parts(
            "SPX",
            straddle(day(2), day(10), dec!(100), dec!(7), dec!(1), dec!(106)),
            vec![],
        );
        let mut trade = open_trade(&config(Some(50.0), Some(100.0)));
        LifecycleManager::new(&store).evaluate(&mut trade, day(2));

        assert_eq!(trade.status, TradeStatus::ClosedStopLoss);
        assert_eq!(trade.realized_pnl, Some(dec!(-4)));
        assert_eq!(trade.exit_underlying, Some(dec!(106)));
    }

    #[test]
    fn test_hold_records_mark() {
        let store = QuoteStore::from_parts(
            "SPX",
            straddle(day(1), day(10), dec!(100), dec!(2), dec!(1.9), dec!(100)),
            vec![],
        );
        let mut trade = open_trade(&config(Some(50.0), Some(100.0)));
        let outcome = LifecycleManager::new(&store).evaluate(&mut trade, day(1));

        match outcome {
            MarkOutcome::Held(mark) => {
                assert_eq!(mark.debit, dec!(3.9));
                assert!(!mark.proxied);
            }
            other => panic!("expected hold, got {other:?}"),
        }
        assert!(trade.is_open());
        assert_eq!(trade.last_mark_debit, Some(dec!(3.9)));
    }

    #[test]
    fn test_both_legs_missing_holds_unchanged() {
        let store = QuoteStore::from_parts(
            "SPX",
            straddle(day(1), day(20), dec!(100), dec!(2), dec!(2), dec!(100)),
            vec![],
        );
        let mut trade = open_trade(&config(Some(1.0), Some(1.0)));
        let before = trade.clone();
        let outcome = LifecycleManager::new(&store).evaluate(&mut trade, day(1));

        assert!(matches!(outcome, MarkOutcome::Gap(DataGap::BothLegsUnpriced { .. })));
        assert_eq!(trade, before);
    }

    #[test]
    fn test_missing_leg_uses_proxy() {
        // Put missing: priced from the call's 20% IV, 9 days out, ATM
        let store = QuoteStore::from_parts(
            "SPX",
            vec![quote(day(1), day(10), dec!(100), OptionType::Call, dec!(1.9), dec!(100))],
            vec![],
        );
        let trade = open_trade(&config(None, None));
        let debit = LifecycleManager::new(&store).closing_debit(&trade, day(1)).unwrap();

        assert!(debit.proxied);
        assert_eq!(debit.call, dec!(1.9));
        let expected = BlackScholes::default().put_price(100.0, 100.0, 9.0 / 365.0, 0.20);
        let put: f64 = to_f64(debit.put).unwrap();
        assert!((put - expected).abs() < 1e-5);
    }

    #[test]
    fn test_proxy_falls_back_to_intrinsic_without_volatility() {
        let mut call = quote(day(1), day(10), dec!(100), OptionType::Call, dec!(0.5), dec!(95));
        call.implied_volatility = None;
        let store = QuoteStore::from_parts("SPX", vec![call], vec![]);
        let trade = open_trade(&config(None, None));
        let debit = LifecycleManager::new(&store).closing_debit(&trade, day(1)).unwrap();
        assert_eq!(debit.put, dec!(5));
    }

    #[test]
    fn test_expiry_settles_at_intrinsic() {
        let store = QuoteStore::from_parts(
            "SPX",
            straddle(day(10), day(20), dec!(100), dec!(1), dec!(1), dec!(103)),
            vec![underlying(day(10), dec!(103), None)],
        );
        let mut trade = open_trade(&config(Some(50.0), Some(100.0)));
        let outcome = LifecycleManager::new(&store).evaluate(&mut trade, day(10));

        assert!(matches!(
            outcome,
            MarkOutcome::Closed {
                status: TradeStatus::ClosedExpired,
                ..
            }
        ));
        assert_eq!(trade.exit_debit, Some(dec!(3)));
        assert_eq!(trade.realized_pnl, Some(dec!(1)));
        assert_eq!(trade.exit_date, Some(day(10)));
    }

    #[test]
    fn test_expiry_on_non_trading_day_uses_prior_close() {
        // Expiration day(10) has no data; next trading day is day(12)
        let store = QuoteStore::from_parts(
            "SPX",
            straddle(day(12), day(30), dec!(100), dec!(1), dec!(1), dec!(90)),
            vec![
                underlying(day(9), dec!(100), None),
                underlying(day(12), dec!(90), None),
            ],
        );
        let mut trade = open_trade(&config(None, None));
        LifecycleManager::new(&store).evaluate(&mut trade, day(12));

        assert_eq!(trade.status, TradeStatus::ClosedExpired);
        assert_eq!(trade.exit_date, Some(day(10)));
        assert_eq!(trade.exit_debit, Some(dec!(0)));
        assert_eq!(trade.realized_pnl, Some(dec!(4)));
    }

    #[test]
    fn test_stale_settlement_close_still_settles() {
        // Last close is a week before expiration
        let store = QuoteStore::from_parts(
            "SPX",
            straddle(day(12), day(30), dec!(100), dec!(1), dec!(1), dec!(0)),
            vec![underlying(day(3), dec!(97), None)],
        );
        assert!(settlement_is_stale(day(3), day(10)));
        assert!(!settlement_is_stale(day(7), day(10)));
        assert!(!settlement_is_stale(day(10), day(10)));

        let mut trade = open_trade(&config(None, None));
        LifecycleManager::new(&store).evaluate(&mut trade, day(12));
        assert_eq!(trade.status, TradeStatus::ClosedExpired);
        assert_eq!(trade.exit_underlying, Some(dec!(97)));
        assert_eq!(trade.exit_debit, Some(dec!(3)));
    }

    #[test]
    fn test_closed_trade_is_skipped() {
        let store = QuoteStore::default();
        let mut trade = open_trade(&config(None, None));
        trade.close(TradeStatus::ClosedStopLoss, day(1), dec!(8), None);
        assert_eq!(
            LifecycleManager::new(&store).evaluate(&mut trade, day(2)),
            MarkOutcome::Skipped
        );
    }
}
