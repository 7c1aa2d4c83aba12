//! Volatility regime filter.
//!
//! Ranks each day's volatility against a trailing window of earlier sessions
//! and lets new straddles open only when the rank sits below a ceiling, so
//! premium is not sold into high-volatility regimes.
//!
//! Measures:
//! - Implied: the underlying series' reference volatility when present,
//!   otherwise the average ATM implied volatility of the chain nearest 30 DTE
//! - Realized: annualized close-to-close volatility of log returns

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::data::{OptionsSnapshot, QuoteStore};

/// Which volatility series the filter ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityMeasure {
    Implied,
    Realized,
}

impl VolatilityMeasure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implied => "iv",
            Self::Realized => "rv",
        }
    }
}

/// Volatility filter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityFilterConfig {
    /// Enable the filter. Disabled means every candidate passes.
    pub enabled: bool,
    /// Series to rank.
    pub measure: VolatilityMeasure,
    /// Trailing sessions the rank is computed against.
    pub window: usize,
    /// Candidates pass only when the rank is strictly below this (0-100).
    pub max_percentile: f64,
    /// Minimum trailing observations before the filter starts rejecting.
    pub min_history: usize,
    /// Sessions used for realized volatility.
    pub realized_window: usize,
}

impl Default for VolatilityFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            measure: VolatilityMeasure::Implied,
            window: 252,
            max_percentile: 50.0,
            min_history: 20,
            realized_window: 20,
        }
    }
}

impl VolatilityFilterConfig {
    /// Short stable tag used in run variant keys.
    pub fn tag(&self) -> String {
        if !self.enabled {
            return "novf".to_string();
        }
        format!(
            "vf{}{}p{}h{}r{}",
            self.measure.as_str(),
            self.window,
            self.max_percentile,
            self.min_history,
            self.realized_window
        )
    }
}

/// Precomputed percentile ranks for every trading day of a quote store.
#[derive(Debug, Clone)]
pub struct VolatilityFilter {
    config: VolatilityFilterConfig,
    ranks: BTreeMap<NaiveDate, f64>,
}

impl VolatilityFilter {
    /// A filter that admits everything.
    pub fn disabled() -> Self {
        Self {
            config: VolatilityFilterConfig::default(),
            ranks: BTreeMap::new(),
        }
    }

    /// Build ranks for every trading day in the store.
    pub fn build(config: &VolatilityFilterConfig, store: &QuoteStore) -> Self {
        if !config.enabled {
            return Self {
                config: config.clone(),
                ranks: BTreeMap::new(),
            };
        }

        let measures = match config.measure {
            VolatilityMeasure::Implied => implied_series(store),
            VolatilityMeasure::Realized => realized_series(store, config.realized_window),
        };

        let mut history: VecDeque<f64> = VecDeque::with_capacity(config.window + 1);
        let mut ranks = BTreeMap::new();

        for date in store.trading_days() {
            let Some(&value) = measures.get(&date) else {
                continue;
            };
            if history.len() >= config.min_history {
                let (front, back) = history.as_slices();
                if let Some(rank) = percentile_rank(front.iter().chain(back.iter()), value) {
                    ranks.insert(date, rank);
                }
            }
            history.push_back(value);
            if history.len() > config.window {
                history.pop_front();
            }
        }

        Self {
            config: config.clone(),
            ranks,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Percentile rank for a date, if enough history existed.
    pub fn percentile(&self, date: NaiveDate) -> Option<f64> {
        self.ranks.get(&date).copied()
    }

    /// Whether a new position may open on `date`.
    ///
    /// Days without a rank (insufficient history or no measure) pass.
    pub fn admits(&self, date: NaiveDate) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.percentile(date) {
            Some(rank) => rank < self.config.max_percentile,
            None => true,
        }
    }
}

/// Share of `history` strictly below `value`, in percent.
pub fn percentile_rank<'a>(history: impl IntoIterator<Item = &'a f64>, value: f64) -> Option<f64> {
    let mut total = 0usize;
    let mut below = 0usize;
    for v in history {
        total += 1;
        if *v < value {
            below += 1;
        }
    }
    if total == 0 {
        return None;
    }
    Some(below as f64 / total as f64 * 100.0)
}

/// Annualized standard deviation of log returns over `closes`.
pub fn realized_volatility(closes: &[f64]) -> Option<f64> {
    if closes.len() < 3 || closes.iter().any(|c| *c <= 0.0) {
        return None;
    }
    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
        / (returns.len() - 1) as f64;
    Some(variance.sqrt() * 252.0_f64.sqrt())
}

/// Average implied volatility of strikes within 5% of spot on the chain
/// closest to 30 DTE (falling back to 50-70 DTE).
pub fn atm_implied_volatility(snapshot: &OptionsSnapshot) -> Option<f64> {
    let spot = snapshot.underlying_close?.to_f64()?;
    if spot <= 0.0 {
        return None;
    }

    let find = |min_dte: i64, max_dte: i64| -> Option<f64> {
        let target = (min_dte + max_dte) / 2;
        let chain = snapshot
            .chains_by_dte(min_dte, max_dte)
            .into_iter()
            .min_by_key(|c| ((c.dte - target).abs(), c.expiration))?;

        let ivs: Vec<f64> = chain
            .calls
            .iter()
            .chain(chain.puts.iter())
            .filter_map(|q| {
                let strike = q.strike.to_f64()?;
                let iv = q.implied_volatility?;
                ((strike - spot).abs() / spot < 0.05).then_some(iv)
            })
            .collect();

        if ivs.is_empty() {
            return None;
        }
        Some(ivs.iter().sum::<f64>() / ivs.len() as f64)
    };

    find(25, 35).or_else(|| find(50, 70))
}

fn implied_series(store: &QuoteStore) -> BTreeMap<NaiveDate, f64> {
    store
        .trading_days()
        .into_iter()
        .filter_map(|date| {
            let value = store
                .reference_volatility(date)
                .or_else(|| store.snapshot(date).and_then(atm_implied_volatility))?;
            Some((date, value))
        })
        .collect()
}

fn realized_series(store: &QuoteStore, window: usize) -> BTreeMap<NaiveDate, f64> {
    let closes: Vec<(NaiveDate, f64)> = store
        .trading_days()
        .into_iter()
        .filter_map(|d| {
            let close = store.underlying_close(d)?.to_f64()?;
            Some((d, close))
        })
        .collect();

    let mut series = BTreeMap::new();
    if window < 2 {
        return series;
    }
    for end in window..closes.len() {
        let slice: Vec<f64> = closes[end - window..=end].iter().map(|(_, c)| *c).collect();
        if let Some(vol) = realized_volatility(&slice) {
            series.insert(closes[end].0, vol);
        }
    }
    series
}
