//! SQLite trade ledger.
//!
//! The database runs in WAL mode with a busy timeout so several sweep
//! processes can write the same file. Every write is a single
//! `INSERT ... ON CONFLICT ... DO UPDATE` on the row key; money is stored as
//! decimal TEXT and dates as ISO `YYYY-MM-DD`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::backtest::{DailyMark, Trade, TradeStatus};

use super::{classify, Ledger, LedgerError, UpsertOutcome};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS straddle_trades (
    variant TEXT NOT NULL,
    trade_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    entry_date TEXT NOT NULL,
    expiration_date TEXT NOT NULL,
    dte_target INTEGER NOT NULL,
    entry_dte INTEGER NOT NULL,
    strike TEXT NOT NULL,
    entry_call_price TEXT NOT NULL,
    entry_put_price TEXT NOT NULL,
    entry_underlying TEXT NOT NULL,
    entry_credit TEXT NOT NULL,
    status TEXT NOT NULL,
    exit_date TEXT,
    exit_debit TEXT,
    exit_underlying TEXT,
    realized_pnl TEXT,
    last_mark_date TEXT,
    last_mark_debit TEXT,
    max_open_trades_at_entry INTEGER NOT NULL,
    profit_take_pct REAL,
    stop_loss_pct REAL,
    trade_delay INTEGER NOT NULL,
    volatility_filter INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (variant, trade_id)
);

CREATE INDEX IF NOT EXISTS idx_straddle_trades_variant_status
ON straddle_trades(variant, status);

CREATE TABLE IF NOT EXISTS straddle_trade_marks (
    variant TEXT NOT NULL,
    trade_id TEXT NOT NULL,
    mark_date TEXT NOT NULL,
    underlying_close TEXT,
    call_price TEXT NOT NULL,
    put_price TEXT NOT NULL,
    debit TEXT NOT NULL,
    proxied INTEGER NOT NULL,
    PRIMARY KEY (variant, trade_id, mark_date)
);
"#;

const TRADE_COLUMNS: &str = "variant, trade_id, symbol, entry_date, expiration_date, \
    dte_target, entry_dte, strike, entry_call_price, entry_put_price, entry_underlying, \
    entry_credit, status, exit_date, exit_debit, exit_underlying, realized_pnl, \
    last_mark_date, last_mark_debit, max_open_trades_at_entry, profit_take_pct, \
    stop_loss_pct, trade_delay, volatility_filter";

const UPSERT_TRADE_SQL: &str = r#"
INSERT INTO straddle_trades (
    variant, trade_id, symbol, entry_date, expiration_date,
    dte_target, entry_dte, strike, entry_call_price, entry_put_price, entry_underlying,
    entry_credit, status, exit_date, exit_debit, exit_underlying, realized_pnl,
    last_mark_date, last_mark_debit, max_open_trades_at_entry, profit_take_pct,
    stop_loss_pct, trade_delay, volatility_filter
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
          ?18, ?19, ?20, ?21, ?22, ?23, ?24)
ON CONFLICT (variant, trade_id) DO UPDATE SET
    symbol = excluded.symbol,
    entry_date = excluded.entry_date,
    expiration_date = excluded.expiration_date,
    dte_target = excluded.dte_target,
    entry_dte = excluded.entry_dte,
    strike = excluded.strike,
    entry_call_price = excluded.entry_call_price,
    entry_put_price = excluded.entry_put_price,
    entry_underlying = excluded.entry_underlying,
    entry_credit = excluded.entry_credit,
    status = excluded.status,
    exit_date = excluded.exit_date,
    exit_debit = excluded.exit_debit,
    exit_underlying = excluded.exit_underlying,
    realized_pnl = excluded.realized_pnl,
    last_mark_date = excluded.last_mark_date,
    last_mark_debit = excluded.last_mark_debit,
    max_open_trades_at_entry = excluded.max_open_trades_at_entry,
    profit_take_pct = excluded.profit_take_pct,
    stop_loss_pct = excluded.stop_loss_pct,
    trade_delay = excluded.trade_delay,
    volatility_filter = excluded.volatility_filter,
    updated_at = CURRENT_TIMESTAMP
"#;

const UPSERT_MARK_SQL: &str = r#"
INSERT INTO straddle_trade_marks (
    variant, trade_id, mark_date, underlying_close, call_price, put_price, debit, proxied
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT (variant, trade_id, mark_date) DO UPDATE SET
    underlying_close = excluded.underlying_close,
    call_price = excluded.call_price,
    put_price = excluded.put_price,
    debit = excluded.debit,
    proxied = excluded.proxied
"#;

/// SQLite-backed ledger. One connection per writer.
pub struct SqliteLedger {
    conn: Connection,
    path: PathBuf,
    in_batch: bool,
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(CREATE_TABLES_SQL)?;

        info!(path = %path.display(), "Opened trade ledger");
        Ok(Self {
            conn,
            path,
            in_batch: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn find(&self, variant: &str, trade_id: &str) -> Result<Option<Trade>, LedgerError> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM straddle_trades WHERE variant = ?1 AND trade_id = ?2"
        );
        let raw = self
            .conn
            .query_row(&sql, params![variant, trade_id], RawTrade::from_row)
            .optional()?;
        raw.map(RawTrade::into_trade).transpose()
    }

    fn query_trades(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Trade>, LedgerError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawTrade::from_row)?;
        let mut trades = Vec::new();
        for row in rows {
            trades.push(row?.into_trade()?);
        }
        Ok(trades)
    }
}

impl Ledger for SqliteLedger {
    fn upsert(&mut self, trade: &Trade) -> Result<UpsertOutcome, LedgerError> {
        let previous = self.find(&trade.variant, &trade.trade_id)?;
        let outcome = classify(previous.as_ref(), trade);
        if outcome == UpsertOutcome::Unchanged {
            return Ok(outcome);
        }

        self.conn.execute(
            UPSERT_TRADE_SQL,
            params![
                trade.variant,
                trade.trade_id,
                trade.symbol,
                fmt_date(trade.entry_date),
                fmt_date(trade.expiration_date),
                trade.dte_target,
                trade.entry_dte,
                trade.strike.to_string(),
                trade.entry_call_price.to_string(),
                trade.entry_put_price.to_string(),
                trade.entry_underlying.to_string(),
                trade.entry_credit.to_string(),
                trade.status.as_str(),
                trade.exit_date.map(fmt_date),
                trade.exit_debit.map(|d| d.to_string()),
                trade.exit_underlying.map(|d| d.to_string()),
                trade.realized_pnl.map(|d| d.to_string()),
                trade.last_mark_date.map(fmt_date),
                trade.last_mark_debit.map(|d| d.to_string()),
                trade.max_open_trades_at_entry as i64,
                trade.profit_take_pct,
                trade.stop_loss_pct,
                trade.trade_delay,
                trade.volatility_filter,
            ],
        )?;
        debug!(trade_id = %trade.trade_id, ?outcome, "Upserted trade");
        Ok(outcome)
    }

    fn record_mark(&mut self, mark: &DailyMark) -> Result<(), LedgerError> {
        self.conn.execute(
            UPSERT_MARK_SQL,
            params![
                mark.variant,
                mark.trade_id,
                fmt_date(mark.date),
                mark.underlying_close.map(|d| d.to_string()),
                mark.call_price.to_string(),
                mark.put_price.to_string(),
                mark.debit.to_string(),
                mark.proxied,
            ],
        )?;
        Ok(())
    }

    fn load_open_trades(&self, variant: &str) -> Result<Vec<Trade>, LedgerError> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM straddle_trades \
             WHERE variant = ?1 AND status = ?2 ORDER BY entry_date, trade_id"
        );
        self.query_trades(&sql, params![variant, TradeStatus::Open.as_str()])
    }

    fn load_all(&self, variant: Option<&str>) -> Result<Vec<Trade>, LedgerError> {
        match variant {
            Some(v) => {
                let sql = format!(
                    "SELECT {TRADE_COLUMNS} FROM straddle_trades \
                     WHERE variant = ?1 ORDER BY entry_date, trade_id"
                );
                self.query_trades(&sql, params![v])
            }
            None => {
                let sql = format!(
                    "SELECT {TRADE_COLUMNS} FROM straddle_trades \
                     ORDER BY variant, entry_date, trade_id"
                );
                self.query_trades(&sql, [])
            }
        }
    }

    fn load_marks(&self, variant: &str, trade_id: &str) -> Result<Vec<DailyMark>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT variant, trade_id, mark_date, underlying_close, call_price, put_price, \
             debit, proxied FROM straddle_trade_marks \
             WHERE variant = ?1 AND trade_id = ?2 ORDER BY mark_date",
        )?;
        let rows = stmt.query_map(params![variant, trade_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, bool>(7)?,
            ))
        })?;

        let mut marks = Vec::new();
        for row in rows {
            let (variant, trade_id, date, underlying, call, put, debit, proxied) = row?;
            marks.push(DailyMark {
                date: parse_date(&trade_id, &date)?,
                underlying_close: underlying
                    .map(|u| parse_decimal(&trade_id, &u))
                    .transpose()?,
                call_price: parse_decimal(&trade_id, &call)?,
                put_price: parse_decimal(&trade_id, &put)?,
                debit: parse_decimal(&trade_id, &debit)?,
                proxied,
                variant,
                trade_id,
            });
        }
        Ok(marks)
    }

    fn last_entry_date(&self, variant: &str) -> Result<Option<NaiveDate>, LedgerError> {
        let max: Option<String> = self.conn.query_row(
            "SELECT MAX(entry_date) FROM straddle_trades WHERE variant = ?1",
            params![variant],
            |row| row.get(0),
        )?;
        max.map(|d| parse_date(variant, &d)).transpose()
    }

    fn variants(&self) -> Result<Vec<String>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT variant FROM straddle_trades ORDER BY variant")?;
        let variants = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(variants)
    }

    fn trade_count(&self) -> Result<usize, LedgerError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM straddle_trades", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn begin_batch(&mut self) -> Result<(), LedgerError> {
        if !self.in_batch {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_batch = true;
        }
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<(), LedgerError> {
        if self.in_batch {
            self.conn.execute_batch("COMMIT")?;
            self.in_batch = false;
        }
        Ok(())
    }

    fn rollback_batch(&mut self) -> Result<(), LedgerError> {
        if self.in_batch {
            self.conn.execute_batch("ROLLBACK")?;
            self.in_batch = false;
        }
        Ok(())
    }
}

/// Column values as stored, before parsing.
struct RawTrade {
    variant: String,
    trade_id: String,
    symbol: String,
    entry_date: String,
    expiration_date: String,
    dte_target: i64,
    entry_dte: i64,
    strike: String,
    entry_call_price: String,
    entry_put_price: String,
    entry_underlying: String,
    entry_credit: String,
    status: String,
    exit_date: Option<String>,
    exit_debit: Option<String>,
    exit_underlying: Option<String>,
    realized_pnl: Option<String>,
    last_mark_date: Option<String>,
    last_mark_debit: Option<String>,
    max_open_trades_at_entry: i64,
    profit_take_pct: Option<f64>,
    stop_loss_pct: Option<f64>,
    trade_delay: i64,
    volatility_filter: bool,
}

impl RawTrade {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            variant: row.get(0)?,
            trade_id: row.get(1)?,
            symbol: row.get(2)?,
            entry_date: row.get(3)?,
            expiration_date: row.get(4)?,
            dte_target: row.get(5)?,
            entry_dte: row.get(6)?,
            strike: row.get(7)?,
            entry_call_price: row.get(8)?,
            entry_put_price: row.get(9)?,
            entry_underlying: row.get(10)?,
            entry_credit: row.get(11)?,
            status: row.get(12)?,
            exit_date: row.get(13)?,
            exit_debit: row.get(14)?,
            exit_underlying: row.get(15)?,
            realized_pnl: row.get(16)?,
            last_mark_date: row.get(17)?,
            last_mark_debit: row.get(18)?,
            max_open_trades_at_entry: row.get(19)?,
            profit_take_pct: row.get(20)?,
            stop_loss_pct: row.get(21)?,
            trade_delay: row.get(22)?,
            volatility_filter: row.get(23)?,
        })
    }

    fn into_trade(self) -> Result<Trade, LedgerError> {
        let id = self.trade_id.as_str();
        let opt_decimal = |v: &Option<String>| v.as_deref().map(|s| parse_decimal(id, s)).transpose();
        let opt_date = |v: &Option<String>| v.as_deref().map(|s| parse_date(id, s)).transpose();

        let status = TradeStatus::from_str(&self.status).ok_or_else(|| LedgerError::CorruptRow {
            trade_id: self.trade_id.clone(),
            reason: format!("unknown status {:?}", self.status),
        })?;

        Ok(Trade {
            symbol: self.symbol.clone(),
            entry_date: parse_date(id, &self.entry_date)?,
            expiration_date: parse_date(id, &self.expiration_date)?,
            dte_target: self.dte_target,
            entry_dte: self.entry_dte,
            strike: parse_decimal(id, &self.strike)?,
            entry_call_price: parse_decimal(id, &self.entry_call_price)?,
            entry_put_price: parse_decimal(id, &self.entry_put_price)?,
            entry_underlying: parse_decimal(id, &self.entry_underlying)?,
            entry_credit: parse_decimal(id, &self.entry_credit)?,
            status,
            exit_date: opt_date(&self.exit_date)?,
            exit_debit: opt_decimal(&self.exit_debit)?,
            exit_underlying: opt_decimal(&self.exit_underlying)?,
            realized_pnl: opt_decimal(&self.realized_pnl)?,
            last_mark_date: opt_date(&self.last_mark_date)?,
            last_mark_debit: opt_decimal(&self.last_mark_debit)?,
            max_open_trades_at_entry: self.max_open_trades_at_entry.max(0) as usize,
            profit_take_pct: self.profit_take_pct,
            stop_loss_pct: self.stop_loss_pct,
            trade_delay: self.trade_delay,
            volatility_filter: self.volatility_filter,
            variant: self.variant.clone(),
            trade_id: self.trade_id.clone(),
        })
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(trade_id: &str, value: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| LedgerError::CorruptRow {
        trade_id: trade_id.to_string(),
        reason: format!("bad date {value:?}: {e}"),
    })
}

fn parse_decimal(trade_id: &str, value: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(value).map_err(|e| LedgerError::CorruptRow {
        trade_id: trade_id.to_string(),
        reason: format!("bad decimal {value:?}: {e}"),
    })
}
