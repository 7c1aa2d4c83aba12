//! Black-Scholes pricing used for the closing-cost proxy.
//!
//! When one leg of a straddle has no usable quote, the lifecycle manager
//! prices it from the other leg's implied volatility instead of dropping the
//! whole mark.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::OptionType;

/// Black-Scholes calculator for European option prices.
#[derive(Debug, Clone, Copy)]
pub struct BlackScholes {
    /// Risk-free interest rate
    pub rate: f64,
    /// Dividend yield
    pub dividend: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self {
            rate: 0.0,
            dividend: 0.0,
        }
    }
}

impl BlackScholes {
    pub fn new(rate: f64, dividend: f64) -> Self {
        Self { rate, dividend }
    }

    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let numerator =
            (spot / strike).ln() + (self.rate - self.dividend + 0.5 * vol * vol) * time;
        numerator / (vol * time.sqrt())
    }

    fn d2(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        self.d1(spot, strike, time, vol) - vol * time.sqrt()
    }

    fn norm_cdf(x: f64) -> f64 {
        match Normal::new(0.0, 1.0) {
            Ok(normal) => normal.cdf(x),
            Err(_) => f64::NAN,
        }
    }

    /// Calculate call option price.
    pub fn call_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 || vol <= 0.0 {
            return (spot - strike).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        spot * (-self.dividend * time).exp() * Self::norm_cdf(d1)
            - strike * (-self.rate * time).exp() * Self::norm_cdf(d2)
    }

    /// Calculate put option price.
    pub fn put_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 || vol <= 0.0 {
            return (strike - spot).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        strike * (-self.rate * time).exp() * Self::norm_cdf(-d2)
            - spot * (-self.dividend * time).exp() * Self::norm_cdf(-d1)
    }

    pub fn price(&self, option_type: OptionType, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        match option_type {
            OptionType::Call => self.call_price(spot, strike, time, vol),
            OptionType::Put => self.put_price(spot, strike, time, vol),
        }
    }
}

/// Normalize a volatility that may be quoted in percent (e.g. 18.5) to a
/// decimal (0.185).
pub fn normalize_volatility(vol: f64) -> Option<f64> {
    if !vol.is_finite() || vol <= 0.0 {
        return None;
    }
    Some(if vol > 3.0 { vol / 100.0 } else { vol })
}
