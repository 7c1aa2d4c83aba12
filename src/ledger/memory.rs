use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::backtest::{DailyMark, Trade};

use super::{classify, Ledger, LedgerError, UpsertOutcome};

/// Ledger held in ordered maps. Used by `simulate` and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    trades: BTreeMap<(String, String), Trade>,
    marks: BTreeMap<(String, String, NaiveDate), DailyMark>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the ledger, returning trades ordered by entry date then id,
    /// and marks ordered by trade then date.
    pub fn into_parts(self) -> (Vec<Trade>, Vec<DailyMark>) {
        let mut trades: Vec<Trade> = self.trades.into_values().collect();
        trades.sort_by(|a, b| {
            (a.entry_date, &a.variant, &a.trade_id).cmp(&(b.entry_date, &b.variant, &b.trade_id))
        });
        (trades, self.marks.into_values().collect())
    }

    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }
}

impl Ledger for InMemoryLedger {
    fn upsert(&mut self, trade: &Trade) -> Result<UpsertOutcome, LedgerError> {
        let key = (trade.variant.clone(), trade.trade_id.clone());
        let outcome = classify(self.trades.get(&key), trade);
        if outcome != UpsertOutcome::Unchanged {
            self.trades.insert(key, trade.clone());
        }
        Ok(outcome)
    }

    fn record_mark(&mut self, mark: &DailyMark) -> Result<(), LedgerError> {
        self.marks.insert(
            (mark.variant.clone(), mark.trade_id.clone(), mark.date),
            mark.clone(),
        );
        Ok(())
    }

    fn load_open_trades(&self, variant: &str) -> Result<Vec<Trade>, LedgerError> {
        let mut open: Vec<Trade> = self
            .trades
            .values()
            .filter(|t| t.variant == variant && t.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| (a.entry_date, &a.trade_id).cmp(&(b.entry_date, &b.trade_id)));
        Ok(open)
    }

    fn load_all(&self, variant: Option<&str>) -> Result<Vec<Trade>, LedgerError> {
        let mut all: Vec<Trade> = self
            .trades
            .values()
            .filter(|t| variant.map_or(true, |v| t.variant == v))
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            (&a.variant, a.entry_date, &a.trade_id).cmp(&(&b.variant, b.entry_date, &b.trade_id))
        });
        Ok(all)
    }

    fn load_marks(&self, variant: &str, trade_id: &str) -> Result<Vec<DailyMark>, LedgerError> {
        Ok(self
            .marks
            .values()
            .filter(|m| m.variant == variant && m.trade_id == trade_id)
            .cloned()
            .collect())
    }

    fn last_entry_date(&self, variant: &str) -> Result<Option<NaiveDate>, LedgerError> {
        Ok(self
            .trades
            .values()
            .filter(|t| t.variant == variant)
            .map(|t| t.entry_date)
            .max())
    }

    fn variants(&self) -> Result<Vec<String>, LedgerError> {
        let mut variants: Vec<String> = self.trades.keys().map(|(v, _)| v.clone()).collect();
        variants.dedup();
        Ok(variants)
    }

    fn trade_count(&self) -> Result<usize, LedgerError> {
        Ok(self.trades.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::TradeStatus;
    use crate::data::fixtures::day;
    use crate::ledger::testing::trade;
    use rust_decimal_macros::dec;

    #[test]
    fn test_upsert_is_idempotent() {
        let mut ledger = InMemoryLedger::new();
        let t = trade("v", 0);
        assert_eq!(ledger.upsert(&t).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(ledger.upsert(&t).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(ledger.trade_count().unwrap(), 1);
    }

    #[test]
    fn test_open_trades_and_last_entry() {
        let mut ledger = InMemoryLedger::new();
        let mut closed = trade("v", 5);
        closed.close(TradeStatus::ClosedExpired, day(15), dec!(0), None);
        ledger.upsert(&trade("v", 0)).unwrap();
        ledger.upsert(&closed).unwrap();
        ledger.upsert(&trade("other", 9)).unwrap();

        let open = ledger.load_open_trades("v").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].entry_date, day(0));
        // Latest entry regardless of status
        assert_eq!(ledger.last_entry_date("v").unwrap(), Some(day(5)));
        assert_eq!(ledger.last_entry_date("none").unwrap(), None);
        assert_eq!(ledger.variants().unwrap(), vec!["other", "v"]);
        assert_eq!(ledger.load_all(Some("v")).unwrap().len(), 2);
    }

    #[test]
    fn test_marks_keyed_by_date() {
        let mut ledger = InMemoryLedger::new();
        let t = trade("v", 0);
        let mark = DailyMark {
            variant: "v".into(),
            trade_id: t.trade_id.clone(),
            date: day(1),
            underlying_close: Some(dec!(4760)),
            call_price: dec!(45),
            put_price: dec!(33),
            debit: dec!(78),
            proxied: false,
        };
        ledger.record_mark(&mark).unwrap();
        ledger.record_mark(&mark).unwrap();
        assert_eq!(ledger.mark_count(), 1);
        assert_eq!(ledger.load_marks("v", &t.trade_id).unwrap(), vec![mark]);
    }
}
