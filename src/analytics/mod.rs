//! Pricing and volatility analytics.
//!
//! Provides:
//! - Black-Scholes pricing for the closing-cost proxy
//! - Volatility percentile filter for entry admission

pub mod black_scholes;
pub mod volatility;

pub use black_scholes::{normalize_volatility, BlackScholes};
pub use volatility::{VolatilityFilter, VolatilityFilterConfig, VolatilityMeasure};
