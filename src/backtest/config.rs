//! Run configuration.
//!
//! One `RunConfig` describes one deterministic simulation: a single DTE
//! target plus the exit thresholds, admission limits and volatility filter.
//! Configs load from TOML; CLI flags override file values.

use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analytics::VolatilityFilterConfig;

/// Invalid run parameters, detected before the simulation starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("dte_target must be > 0, got {0}")]
    DteTarget(i64),

    #[error("dte_tolerance must be >= 0, got {0}")]
    DteTolerance(i64),

    #[error("profit_take_pct must be in [0, 100], got {0}")]
    ProfitTake(f64),

    #[error("stop_loss_pct must be > 0, got {0}")]
    StopLoss(f64),

    #[error("max_open_trades must be >= 1")]
    MaxOpenTrades,

    #[error("trade_delay must be >= 0, got {0}")]
    TradeDelay(i64),

    #[error("volatility filter max_percentile must be in (0, 100], got {0}")]
    VolatilityPercentile(f64),

    #[error("volatility filter window must be >= 1")]
    VolatilityWindow,

    #[error("start_date {start} is after end_date {end}")]
    DateRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid DTE range {min}..={max} step {step}")]
    DteRange { min: i64, max: i64, step: i64 },
}

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Underlying symbol.
    pub symbol: String,

    /// Target days to expiration for new straddles.
    pub dte_target: i64,

    /// Maximum distance in calendar days between the chosen expiration and
    /// the target.
    pub dte_tolerance: i64,

    /// Close when this percentage of the credit has been captured.
    /// `None` disables profit-taking.
    #[serde(with = "threshold")]
    pub profit_take_pct: Option<f64>,

    /// Close when the loss reaches this percentage of the credit.
    /// `None` disables the stop.
    #[serde(with = "threshold")]
    pub stop_loss_pct: Option<f64>,

    /// Maximum concurrently open straddles.
    pub max_open_trades: usize,

    /// Minimum calendar days between consecutive entries.
    pub trade_delay: i64,

    /// Volatility percentile entry filter.
    pub volatility_filter: VolatilityFilterConfig,

    /// Optional first trading day to simulate.
    pub start_date: Option<NaiveDate>,

    /// Optional last trading day to simulate.
    pub end_date: Option<NaiveDate>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            symbol: "SPX".to_string(),
            dte_target: 30,
            dte_tolerance: 3,
            profit_take_pct: Some(30.0),
            stop_loss_pct: Some(100.0),
            max_open_trades: 1,
            trade_delay: 0,
            volatility_filter: VolatilityFilterConfig::default(),
            start_date: None,
            end_date: None,
        }
    }
}

impl RunConfig {
    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Same parameters with a different DTE target.
    pub fn with_dte(&self, dte_target: i64) -> Self {
        Self {
            dte_target,
            ..self.clone()
        }
    }

    /// Disable both exit thresholds: every trade is held to expiration.
    pub fn hold_to_expiry(mut self) -> Self {
        self.profit_take_pct = None;
        self.stop_loss_pct = None;
        self
    }

    /// Check every parameter range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.dte_target <= 0 {
            return Err(ConfigError::DteTarget(self.dte_target));
        }
        if self.dte_tolerance < 0 {
            return Err(ConfigError::DteTolerance(self.dte_tolerance));
        }
        if let Some(pt) = self.profit_take_pct {
            if !pt.is_finite() || pt < 0.0 || pt > 100.0 {
                return Err(ConfigError::ProfitTake(pt));
            }
        }
        if let Some(sl) = self.stop_loss_pct {
            if !sl.is_finite() || sl <= 0.0 {
                return Err(ConfigError::StopLoss(sl));
            }
        }
        if self.max_open_trades == 0 {
            return Err(ConfigError::MaxOpenTrades);
        }
        if self.trade_delay < 0 {
            return Err(ConfigError::TradeDelay(self.trade_delay));
        }
        let vf = &self.volatility_filter;
        if vf.enabled {
            if !vf.max_percentile.is_finite() || vf.max_percentile <= 0.0 || vf.max_percentile > 100.0
            {
                return Err(ConfigError::VolatilityPercentile(vf.max_percentile));
            }
            if vf.window == 0 {
                return Err(ConfigError::VolatilityWindow);
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ConfigError::DateRange { start, end });
            }
        }
        Ok(())
    }

    /// Deterministic key of the full parameter set.
    ///
    /// Every ledger row carries this so one store can hold many sweep
    /// variants side by side, e.g.
    /// `SPX-D30-PT30-SL100-MX1-DL0-T3-Snone-Enone-NOVF`.
    pub fn variant(&self) -> String {
        format!(
            "{}-D{}-PT{}-SL{}-MX{}-DL{}-T{}-S{}-E{}-{}",
            self.symbol,
            self.dte_target,
            fmt_threshold(self.profit_take_pct),
            fmt_threshold(self.stop_loss_pct),
            self.max_open_trades,
            self.trade_delay,
            self.dte_tolerance,
            fmt_date(self.start_date),
            fmt_date(self.end_date),
            self.volatility_filter.tag().to_uppercase()
        )
    }
}

/// Percentage threshold as a fraction of the credit.
pub fn pct_fraction(pct: f64) -> Option<Decimal> {
    Decimal::from_f64(pct).map(|p| p.round_dp(6) / Decimal::ONE_HUNDRED)
}

fn fmt_date(date: Option<NaiveDate>) -> String {
    match date {
        Some(d) => d.format("%Y%m%d").to_string(),
        None => "none".to_string(),
    }
}

fn fmt_threshold(pct: Option<f64>) -> String {
    match pct {
        Some(v) => format!("{v}"),
        None => "none".to_string(),
    }
}

/// Serde adapter for optional thresholds: a number, or `"none"` when
/// disabled (TOML has no null).
mod threshold {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Pct(f64),
        Word(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_f64(*v),
            None => s.serialize_str("none"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Pct(v) => Ok(Some(v)),
            Raw::Word(w) if matches!(w.to_lowercase().as_str(), "none" | "off" | "disabled") => {
                Ok(None)
            }
            Raw::Word(w) => Err(serde::de::Error::custom(format!(
                "expected a percentage or \"none\", got {w:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.variant(), "SPX-D30-PT30-SL100-MX1-DL0-T3-Snone-Enone-NOVF");
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let bad = [
            RunConfig { dte_target: 0, ..Default::default() },
            RunConfig { profit_take_pct: Some(-5.0), ..Default::default() },
            RunConfig { profit_take_pct: Some(150.0), ..Default::default() },
            RunConfig { stop_loss_pct: Some(0.0), ..Default::default() },
            RunConfig { max_open_trades: 0, ..Default::default() },
            RunConfig { trade_delay: -1, ..Default::default() },
            RunConfig { symbol: " ".into(), ..Default::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_hold_to_expiry_variant() {
        let config = RunConfig::default().with_dte(45).hold_to_expiry();
        assert!(config.validate().is_ok());
        assert_eq!(config.variant(), "SPX-D45-PTnone-SLnone-MX1-DL0-T3-Snone-Enone-NOVF");
    }

    #[test]
    fn test_threshold_fractions() {
        let config = RunConfig {
            profit_take_pct: Some(15.0),
            stop_loss_pct: Some(125.5),
            ..Default::default()
        };
        assert_eq!(config.profit_take_pct.and_then(pct_fraction), Some(dec!(0.15)));
        assert_eq!(config.stop_loss_pct.and_then(pct_fraction), Some(dec!(1.255)));
        assert_eq!(pct_fraction(0.0), Some(Decimal::ZERO));
    }

    #[test]
    fn test_zero_and_full_profit_take_are_valid() {
        for pt in [0.0, 100.0] {
            let config = RunConfig {
                profit_take_pct: Some(pt),
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "profit_take_pct {pt} should be accepted");
        }
    }

    #[test]
    fn test_variant_keys_every_parameter() {
        let base = RunConfig::default();
        let ranged = RunConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 4),
            ..Default::default()
        };
        assert_eq!(
            ranged.variant(),
            "SPX-D30-PT30-SL100-MX1-DL0-T3-S20240104-Enone-NOVF"
        );

        let mut filtered = base.clone();
        filtered.volatility_filter.enabled = true;
        let mut longer_history = filtered.clone();
        longer_history.volatility_filter.min_history = 60;
        let mut longer_rv = filtered.clone();
        longer_rv.volatility_filter.realized_window = 10;

        let keys = [
            base.variant(),
            ranged.variant(),
            filtered.variant(),
            longer_history.variant(),
            longer_rv.variant(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_toml_partial_and_disabled_thresholds() {
        let config = RunConfig::from_toml_str(
            r#"
            dte_target = 14
            stop_loss_pct = "none"
            trade_delay = 2

            [volatility_filter]
            enabled = true
            measure = "realized"
            "#,
        )
        .unwrap();
        assert_eq!(config.dte_target, 14);
        assert_eq!(config.profit_take_pct, Some(30.0));
        assert_eq!(config.stop_loss_pct, None);
        assert_eq!(config.trade_delay, 2);
        assert!(config.volatility_filter.enabled);
        assert_eq!(config.volatility_filter.window, 252);
        assert_eq!(config.variant(), "SPX-D14-PT30-SLnone-MX1-DL2-T3-Snone-Enone-VFRV252P50H20R20");
    }

    #[test]
    fn test_toml_rejects_unknown_threshold_word() {
        assert!(RunConfig::from_toml_str(r#"profit_take_pct = "half""#).is_err());
    }

    #[test]
    fn test_toml_roundtrip_keeps_disabled_threshold() {
        let config = RunConfig::default().hold_to_expiry();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(RunConfig::from_toml_str(&text).unwrap(), config);
    }
}
