//! SQLite loader for the normalized quote tables.
//!
//! The importer writes one row per option contract per trade date:
//! - `option_quotes`: symbol, trade_date, expiration_date, strike,
//!   option_type, bid, ask, [mid], [implied_volatility], underlying_close
//! - `underlying_daily`: symbol, trade_date, close, [volatility]
//!
//! Bracketed columns are optional. Dates are ISO `YYYY-MM-DD` text.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::store::QuoteStore;
use super::types::{price_from_f64, OptionQuote, OptionType, UnderlyingClose};

pub const QUOTES_TABLE: &str = "option_quotes";
pub const UNDERLYING_TABLE: &str = "underlying_daily";

/// Columns `option_quotes` must carry.
pub const REQUIRED_QUOTE_COLUMNS: &[&str] = &[
    "symbol",
    "trade_date",
    "expiration_date",
    "strike",
    "option_type",
    "bid",
    "ask",
    "underlying_close",
];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Database not found: {0}")]
    FileNotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Missing table {0}")]
    MissingTable(&'static str),

    #[error("Table {table} is missing column {column}")]
    MissingColumn { table: &'static str, column: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Read-only loader for the importer's quote database.
pub struct DataLoader {
    db_path: PathBuf,
}

impl DataLoader {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> Result<Connection, LoaderError> {
        if !self.db_path.exists() {
            return Err(LoaderError::FileNotFound(self.db_path.display().to_string()));
        }
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// Symbols present in the quote table.
    pub fn available_symbols(&self) -> Result<Vec<String>, LoaderError> {
        let conn = self.open()?;
        require_columns(&conn, QUOTES_TABLE, REQUIRED_QUOTE_COLUMNS)?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT symbol FROM option_quotes ORDER BY symbol")?;
        let symbols = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    /// Load option quotes for a symbol, optionally bounded by trade date.
    pub fn load_quotes(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<OptionQuote>, LoaderError> {
        let conn = self.open()?;
        let columns = require_columns(&conn, QUOTES_TABLE, REQUIRED_QUOTE_COLUMNS)?;
        let mid_col = if columns.contains("mid") { "mid" } else { "NULL" };
        let iv_col = if columns.contains("implied_volatility") {
            "implied_volatility"
        } else {
            "NULL"
        };

        let sql = format!(
            "SELECT trade_date, expiration_date, strike, option_type, bid, ask, {mid_col}, {iv_col}, underlying_close
             FROM option_quotes
             WHERE symbol = ?1
               AND (?2 IS NULL OR trade_date >= ?2)
               AND (?3 IS NULL OR trade_date <= ?3)
             ORDER BY trade_date, expiration_date, strike, option_type"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![symbol, start.map(|d| d.to_string()), end.map(|d| d.to_string())],
            |row| {
                Ok(RawQuoteRow {
                    trade_date: row.get(0)?,
                    expiration: row.get(1)?,
                    strike: row.get(2)?,
                    option_type: row.get(3)?,
                    bid: row.get(4)?,
                    ask: row.get(5)?,
                    mid: row.get(6)?,
                    implied_volatility: row.get(7)?,
                    underlying_close: row.get(8)?,
                })
            },
        )?;

        let mut quotes = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            match row?.into_quote(symbol) {
                Ok(quote) => quotes.push(quote),
                Err(reason) => {
                    if skipped == 0 {
                        warn!(symbol, %reason, "Skipping malformed quote row");
                    }
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!(symbol, skipped, "Malformed quote rows skipped");
        }
        debug!(symbol, rows = quotes.len(), "Loaded option quotes");
        Ok(quotes)
    }

    /// Load the underlying daily series. A database without the table yields
    /// an empty series; spot then comes from the quotes themselves.
    pub fn load_underlying(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<UnderlyingClose>, LoaderError> {
        let conn = self.open()?;
        let columns = match require_columns(&conn, UNDERLYING_TABLE, &["symbol", "trade_date", "close"])
        {
            Ok(columns) => columns,
            Err(LoaderError::MissingTable(_)) => {
                debug!(symbol, "No underlying_daily table; using quote closes");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let vol_col = if columns.contains("volatility") {
            "volatility"
        } else {
            "NULL"
        };

        let sql = format!(
            "SELECT trade_date, close, {vol_col}
             FROM underlying_daily
             WHERE symbol = ?1
               AND (?2 IS NULL OR trade_date >= ?2)
               AND (?3 IS NULL OR trade_date <= ?3)
             ORDER BY trade_date"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![symbol, start.map(|d| d.to_string()), end.map(|d| d.to_string())],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            },
        )?;

        let mut series = Vec::new();
        for row in rows {
            let (date, close, volatility) = row?;
            let Some(date) = parse_date(&date) else {
                warn!(symbol, date = %date, "Skipping underlying row with invalid date");
                continue;
            };
            let Some(close) = close.and_then(price_from_f64) else {
                continue;
            };
            series.push(UnderlyingClose {
                date,
                close,
                volatility,
            });
        }
        Ok(series)
    }

    /// Load everything the simulation needs for one underlying.
    pub fn load_store(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<QuoteStore, LoaderError> {
        let quotes = self.load_quotes(symbol, start, end)?;
        if quotes.is_empty() {
            return Err(LoaderError::InvalidData(format!(
                "No quotes for {} in {}",
                symbol,
                self.db_path.display()
            )));
        }
        let underlying = self.load_underlying(symbol, start, end)?;
        let store = QuoteStore::from_parts(symbol, quotes, underlying);

        if let Some((first, last)) = store.date_range() {
            info!(
                symbol,
                first = %first,
                last = %last,
                trading_days = store.trading_days().len(),
                quotes = store.total_quotes(),
                "Loaded quote store"
            );
        }
        Ok(store)
    }
}

struct RawQuoteRow {
    trade_date: String,
    expiration: String,
    strike: Option<f64>,
    option_type: String,
    bid: Option<f64>,
    ask: Option<f64>,
    mid: Option<f64>,
    implied_volatility: Option<f64>,
    underlying_close: Option<f64>,
}

impl RawQuoteRow {
    fn into_quote(self, symbol: &str) -> Result<OptionQuote, String> {
        let trade_date = parse_date(&self.trade_date)
            .ok_or_else(|| format!("invalid trade_date {:?}", self.trade_date))?;
        let expiration = parse_date(&self.expiration)
            .ok_or_else(|| format!("invalid expiration_date {:?}", self.expiration))?;
        let option_type = OptionType::from_str(&self.option_type)
            .ok_or_else(|| format!("invalid option_type {:?}", self.option_type))?;
        let strike = self
            .strike
            .and_then(price_from_f64)
            .filter(|s| !s.is_sign_negative())
            .ok_or_else(|| format!("invalid strike {:?}", self.strike))?;

        let bid = self.bid.and_then(price_from_f64).unwrap_or_default();
        let ask = self.ask.and_then(price_from_f64).unwrap_or_default();
        let mid = OptionQuote::derive_mid(bid, ask, self.mid.and_then(price_from_f64));

        Ok(OptionQuote {
            symbol: symbol.to_string(),
            trade_date,
            expiration,
            strike,
            option_type,
            bid,
            ask,
            mid,
            implied_volatility: self.implied_volatility.filter(|v| v.is_finite() && *v > 0.0),
            underlying_close: self
                .underlying_close
                .and_then(price_from_f64)
                .unwrap_or_default(),
        })
    }
}

/// Parse an ISO date, tolerating a trailing time component.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let date_part = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

/// Verify a table exists and carries the required columns; returns all
/// column names.
fn require_columns(
    conn: &Connection,
    table: &'static str,
    required: &[&str],
) -> Result<HashSet<String>, LoaderError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;

    if columns.is_empty() {
        return Err(LoaderError::MissingTable(table));
    }
    for column in required {
        if !columns.contains(*column) {
            return Err(LoaderError::MissingColumn {
                table,
                column: column.to_string(),
            });
        }
    }
    Ok(columns)
}
