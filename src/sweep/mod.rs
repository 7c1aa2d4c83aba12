//! DTE sweeps.
//!
//! Runs the same configuration once per DTE target. Each run is an
//! independent pure simulation over the shared read-only quote store, so
//! runs execute in parallel and results are returned sorted by DTE.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analytics::VolatilityFilter;
use crate::backtest::{BacktestEngine, BacktestError, ConfigError, RunConfig, RunResult};
use crate::data::QuoteStore;

/// Range of DTE targets to sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub dte_min: i64,
    pub dte_max: i64,
    pub dte_step: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            dte_min: 7,
            dte_max: 60,
            dte_step: 1,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dte_min <= 0 || self.dte_max < self.dte_min || self.dte_step <= 0 {
            return Err(ConfigError::DteRange {
                min: self.dte_min,
                max: self.dte_max,
                step: self.dte_step,
            });
        }
        Ok(())
    }

    /// DTE targets in ascending order.
    pub fn targets(&self) -> Vec<i64> {
        if self.dte_step <= 0 {
            return Vec::new();
        }
        (self.dte_min..=self.dte_max)
            .step_by(self.dte_step as usize)
            .collect()
    }
}

/// Run `base` once per DTE target in parallel.
///
/// Every configuration is validated before any run starts. `on_done` is
/// called from worker threads as each run finishes.
pub fn run_sweep<F>(
    store: &QuoteStore,
    base: &RunConfig,
    sweep: &SweepConfig,
    on_done: F,
) -> Result<Vec<RunResult>, BacktestError>
where
    F: Fn(&RunResult) + Sync,
{
    sweep.validate()?;
    let configs: Vec<RunConfig> = sweep.targets().into_iter().map(|dte| base.with_dte(dte)).collect();
    for config in &configs {
        config.validate()?;
    }

    // The filter depends only on the store, so every run shares it.
    let filter = VolatilityFilter::build(&base.volatility_filter, store);
    let total = configs.len();
    let progress = AtomicUsize::new(0);

    info!(
        runs = total,
        dte_min = sweep.dte_min,
        dte_max = sweep.dte_max,
        "Starting DTE sweep"
    );

    let mut results: Vec<RunResult> = configs
        .into_par_iter()
        .map(|config| -> Result<RunResult, BacktestError> {
            let result = BacktestEngine::with_filter(store, config, filter.clone()).run()?;
            on_done(&result);

            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            if done % (total / 10).max(1) == 0 || done == total {
                info!(
                    "Sweep progress: {}/{} ({:.0}%)",
                    done,
                    total,
                    done as f64 / total as f64 * 100.0
                );
            }
            Ok(result)
        })
        .collect::<Result<_, BacktestError>>()?;

    results.sort_by_key(|r| r.config.dte_target);
    Ok(results)
}
