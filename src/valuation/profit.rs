//! Net profit of a long option at expiry, premium included.
//!
//! profit(S) = payoff(S) - premium
//!
//! Used for the payoff-vs-underlying charts; the simulator is not involved.

use crate::errors::{SimError, SimResult};
use crate::valuation::payoff::{validate_strike, OptionKind};

/// Evenly spaced points over `[low, high]`, endpoints included.
pub fn linspace(low: f64, high: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![low],
        n => {
            let step = (high - low) / (n - 1) as f64;
            let mut out: Vec<f64> = (0..n).map(|i| low + i as f64 * step).collect();
            out[n - 1] = high;
            out
        }
    }
}

fn validate_premium(premium: f64) -> SimResult<()> {
    if !premium.is_finite() || premium < 0.0 {
        return Err(SimError::invalid(
            "premium",
            format!("must be non-negative and finite, got {premium}"),
        ));
    }
    Ok(())
}

pub fn profit_curve(
    kind: OptionKind,
    strike: f64,
    premium: f64,
    prices: &[f64],
) -> SimResult<Vec<f64>> {
    validate_strike(strike)?;
    validate_premium(premium)?;
    if let Some(index) = prices.iter().position(|p| !p.is_finite()) {
        return Err(SimError::NonFiniteSample { index });
    }
    Ok(prices
        .iter()
        .map(|&s| kind.payoff(s, strike) - premium)
        .collect())
}

/// Underlying price at which the position breaks even.
pub fn breakeven(kind: OptionKind, strike: f64, premium: f64) -> SimResult<f64> {
    validate_strike(strike)?;
    validate_premium(premium)?;
    Ok(match kind {
        OptionKind::Call => strike + premium,
        OptionKind::Put => (strike - premium).max(0.0),
    })
}
