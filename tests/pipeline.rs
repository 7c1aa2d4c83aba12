//! End-to-end runs over synthetic quote histories.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use straddle_backtest::backtest::{persist, simulate, RunConfig, Trade, TradeStatus};
use straddle_backtest::data::{OptionQuote, OptionType, QuoteStore, UnderlyingClose};
use straddle_backtest::ledger::{Ledger, SqliteLedger};
use straddle_backtest::metrics::MetricsCalculator;
use straddle_backtest::sweep::{run_sweep, SweepConfig};

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
}

fn leg(
    date: NaiveDate,
    expiration: NaiveDate,
    strike: Decimal,
    option_type: OptionType,
    mid: Decimal,
    close: Decimal,
) -> OptionQuote {
    OptionQuote {
        symbol: "SPX".to_string(),
        trade_date: date,
        expiration,
        strike,
        option_type,
        bid: mid - dec!(0.05),
        ask: mid + dec!(0.05),
        mid,
        implied_volatility: Some(0.18),
        underlying_close: close,
    }
}

fn straddle(date: NaiveDate, expiration: NaiveDate, strike: Decimal, mid: Decimal, close: Decimal) -> Vec<OptionQuote> {
    vec![
        leg(date, expiration, strike, OptionType::Call, mid, close),
        leg(date, expiration, strike, OptionType::Put, mid, close),
    ]
}

fn close(date: NaiveDate, close: Decimal) -> UnderlyingClose {
    UnderlyingClose {
        date,
        close,
        volatility: None,
    }
}

/// Flat underlying at 100; every day lists expirations 1..=15 days out with
/// each leg priced at `dte / 5`, so a 10-DTE straddle collects 4.00 and
/// decays by 0.40 a day.
fn rolling_store(days: i64) -> QuoteStore {
    let mut quotes = Vec::new();
    let mut series = Vec::new();
    for i in 0..days {
        for dte in 1..=15 {
            let mid = Decimal::from(dte) / dec!(5);
            for strike in [dec!(95), dec!(100), dec!(105)] {
                quotes.extend(straddle(day(i), day(i + dte), strike, mid, dec!(100)));
            }
        }
        series.push(close(day(i), dec!(100)));
    }
    QuoteStore::from_parts("SPX", quotes, series)
}

fn config(dte: i64) -> RunConfig {
    RunConfig {
        dte_target: dte,
        ..Default::default()
    }
}

fn open_at_close(trades: &[Trade], date: NaiveDate) -> usize {
    trades
        .iter()
        .filter(|t| t.entry_date <= date && t.exit_date.map_or(true, |e| e > date))
        .count()
}

#[test]
fn test_runs_are_deterministic() {
    let store = rolling_store(40);
    let cfg = RunConfig {
        max_open_trades: 3,
        profit_take_pct: Some(25.0),
        ..config(10)
    };
    let a = simulate(&store, &cfg).unwrap();
    let b = simulate(&store, &cfg).unwrap();
    assert_eq!(a, b);
    assert!(!a.trades.is_empty());
}

#[test]
fn test_open_trades_never_exceed_cap() {
    let store = rolling_store(40);
    for max_open in [1, 2, 4] {
        let cfg = RunConfig {
            max_open_trades: max_open,
            ..config(10)
        };
        let result = simulate(&store, &cfg).unwrap();
        for i in 0..40 {
            assert!(open_at_close(&result.trades, day(i)) <= max_open);
        }
        let entries: BTreeSet<NaiveDate> = result.trades.iter().map(|t| t.entry_date).collect();
        assert_eq!(entries.len(), result.trades.len(), "one entry per day");
    }
}

#[test]
fn test_trade_delay_spaces_entries() {
    let store = rolling_store(40);
    let cfg = RunConfig {
        max_open_trades: 10,
        trade_delay: 3,
        ..config(10)
    };
    let result = simulate(&store, &cfg).unwrap();
    let dates: Vec<NaiveDate> = result.trades.iter().map(|t| t.entry_date).collect();
    assert!(dates.len() > 5);
    for pair in dates.windows(2) {
        assert!((pair[1] - pair[0]).num_days() >= 3);
    }
    assert!(result.stats.rejected_delay > 0);
}

#[test]
fn test_closed_trades_are_consistent() {
    let store = rolling_store(40);
    let cfg = RunConfig {
        max_open_trades: 2,
        profit_take_pct: Some(30.0),
        ..config(10)
    };
    let result = simulate(&store, &cfg).unwrap();

    for trade in &result.trades {
        assert_eq!(trade.entry_credit, trade.entry_call_price + trade.entry_put_price);
        assert!(trade.entry_credit > Decimal::ZERO);
        if trade.is_open() {
            assert!(trade.exit_date.is_none());
            assert!(trade.realized_pnl.is_none());
            continue;
        }
        let exit = trade.exit_date.unwrap();
        assert!(exit > trade.entry_date);
        assert!(exit <= trade.expiration_date);
        assert_eq!(
            trade.realized_pnl.unwrap(),
            trade.entry_credit - trade.exit_debit.unwrap()
        );
    }
}

#[test]
fn test_profit_take_closes_at_threshold() {
    // Credit 4.00; 15% capture means a debit of 3.40 or less
    let store = rolling_store(5);
    let cfg = RunConfig {
        profit_take_pct: Some(15.0),
        stop_loss_pct: None,
        ..config(10)
    };
    let result = simulate(&store, &cfg).unwrap();

    let first = &result.trades[0];
    assert_eq!(first.entry_date, day(0));
    assert_eq!(first.entry_credit, dec!(4.0));
    assert_eq!(first.status, TradeStatus::ClosedProfitTake);
    // 10% captured on day 1, 20% on day 2
    assert_eq!(first.exit_date, Some(day(2)));
    assert_eq!(first.exit_debit, Some(dec!(3.2)));
    assert_eq!(first.realized_pnl, Some(dec!(0.8)));
}

#[test]
fn test_stop_loss_on_rally() {
    let mut quotes = Vec::new();
    let mut series = Vec::new();
    let closes = [dec!(100), dec!(103), dec!(110)];
    for (i, c) in closes.iter().enumerate() {
        let i = i as i64;
        let call = (*c - dec!(100)).max(Decimal::ZERO) + dec!(2);
        quotes.push(leg(day(i), day(20), dec!(100), OptionType::Call, call, *c));
        quotes.push(leg(day(i), day(20), dec!(100), OptionType::Put, dec!(2), *c));
        series.push(close(day(i), *c));
    }
    let store = QuoteStore::from_parts("SPX", quotes, series);
    let cfg = RunConfig {
        profit_take_pct: Some(50.0),
        stop_loss_pct: Some(100.0),
        ..config(20)
    };
    let result = simulate(&store, &cfg).unwrap();

    let trade = &result.trades[0];
    // Day 1 debit 7 (loss 75%), day 2 debit 14 (loss 250%)
    assert_eq!(trade.status, TradeStatus::ClosedStopLoss);
    assert_eq!(trade.exit_date, Some(day(2)));
    assert_eq!(trade.realized_pnl, Some(dec!(-10)));
    assert_eq!(trade.exit_underlying, Some(dec!(110)));
}

#[test]
fn test_hold_to_expiry_settles_at_intrinsic() {
    let mut quotes = Vec::new();
    let mut series = Vec::new();
    for i in 0..10 {
        quotes.extend(straddle(day(i), day(10), dec!(100), dec!(2.5), dec!(100)));
        series.push(close(day(i), dec!(100)));
    }
    // Expiration day trades with a new listing only
    quotes.extend(straddle(day(10), day(20), dec!(105), dec!(2.5), dec!(104)));
    series.push(close(day(10), dec!(104)));
    let store = QuoteStore::from_parts("SPX", quotes, series);

    let cfg = config(10).hold_to_expiry();
    let result = simulate(&store, &cfg).unwrap();

    let first = &result.trades[0];
    assert_eq!(first.status, TradeStatus::ClosedExpired);
    assert_eq!(first.exit_date, Some(day(10)));
    assert_eq!(first.exit_debit, Some(dec!(4)));
    assert_eq!(first.realized_pnl, Some(dec!(1.0)));
    assert_eq!(result.stats.closed_expired, 1);
}

#[test]
fn test_no_expiration_within_tolerance_means_no_trade() {
    let mut quotes = Vec::new();
    let mut series = Vec::new();
    for i in 0..5 {
        quotes.extend(straddle(day(i), day(i + 60), dec!(100), dec!(5), dec!(100)));
        series.push(close(day(i), dec!(100)));
    }
    let store = QuoteStore::from_parts("SPX", quotes, series);
    let result = simulate(&store, &config(30)).unwrap();

    assert!(result.trades.is_empty());
    assert_eq!(result.stats.no_candidate, 5);
}

#[test]
fn test_single_slot_rejects_next_day() {
    let store = rolling_store(3);
    let cfg = RunConfig {
        profit_take_pct: None,
        stop_loss_pct: None,
        ..config(10)
    };
    let result = simulate(&store, &cfg).unwrap();

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.stats.rejected_max_open, 2);
    assert_eq!(result.stats.still_open, 1);
}

#[test]
fn test_sqlite_persist_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let store = rolling_store(30);
    let cfg = RunConfig {
        max_open_trades: 2,
        ..config(10)
    };
    let result = simulate(&store, &cfg).unwrap();

    let mut ledger = SqliteLedger::open(&path).unwrap();
    let first = persist(&result, &mut ledger).unwrap();
    assert_eq!(first.inserted, result.trades.len());

    let again = simulate(&store, &cfg).unwrap();
    let second = persist(&again, &mut ledger).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.unchanged, result.trades.len());
    assert_eq!(second.conflicts, 0);
    assert_eq!(ledger.trade_count().unwrap(), result.trades.len());

    drop(ledger);
    let reopened = SqliteLedger::open(&path).unwrap();
    assert_eq!(reopened.load_all(Some(&result.variant)).unwrap(), result.trades);
}

#[test]
fn test_sweep_variants_share_one_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let store = rolling_store(25);
    let sweep = SweepConfig {
        dte_min: 8,
        dte_max: 12,
        dte_step: 2,
    };
    let results = run_sweep(&store, &RunConfig::default(), &sweep, |_| {}).unwrap();
    assert_eq!(results.len(), 3);

    let mut ledger = SqliteLedger::open(dir.path().join("sweep.db")).unwrap();
    for result in &results {
        persist(result, &mut ledger).unwrap();
    }
    let variants = ledger.variants().unwrap();
    assert_eq!(variants.len(), 3);

    let summaries = MetricsCalculator::summarize_ledger(&ledger, None).unwrap();
    let total: usize = summaries.iter().map(|s| s.total_trades).sum();
    assert_eq!(total, results.iter().map(|r| r.trades.len()).sum::<usize>());
}

#[test]
fn test_default_config_file_matches_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
    let cfg = RunConfig::from_toml_file(path).unwrap();
    assert_eq!(cfg, RunConfig::default());
    assert_eq!(cfg.variant(), "SPX-D30-PT30-SL100-MX1-DL0-T3-Snone-Enone-NOVF");
}

#[test]
fn test_date_ranges_persist_as_separate_variants() {
    let dir = tempfile::tempdir().unwrap();
    let store = rolling_store(20);
    let full = config(10).hold_to_expiry();
    let late = RunConfig {
        start_date: Some(day(3)),
        ..full.clone()
    };

    let mut ledger = SqliteLedger::open(dir.path().join("ranges.db")).unwrap();
    let full_run = simulate(&store, &full).unwrap();
    let late_run = simulate(&store, &late).unwrap();
    persist(&full_run, &mut ledger).unwrap();
    persist(&late_run, &mut ledger).unwrap();

    assert_ne!(full_run.variant, late_run.variant);
    assert_eq!(ledger.variants().unwrap().len(), 2);

    for run in [&full_run, &late_run] {
        let stored = ledger.load_all(Some(&run.variant)).unwrap();
        assert_eq!(stored, run.trades);
        for i in 0..20 {
            assert!(open_at_close(&stored, day(i)) <= 1);
        }
    }
}
