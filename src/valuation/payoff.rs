//! Option payoff evaluation over simulated or discrete outcomes.
//!
//! Two estimators of the option value:
//!   (a) raw-sample mean:   mean_i payoff(S_i)
//!   (b) binned weighted:   sum_b p_b * payoff(rep_b),  p_b = count_b / total
//!
//! (b) only needs the histogram. Its representative value per bin (left edge
//! or midpoint) introduces a discretization bias relative to (a); the left
//! edge is the default.
//!
//! Every function here is pure.

use crate::errors::{SimError, SimResult};
use crate::sim::distribution::Histogram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    #[default]
    Call,
    Put,
}

impl OptionKind {
    /// Call: `max(S - K, 0)`. Put: `max(K - S, 0)`.
    #[inline]
    pub fn payoff(self, terminal: f64, strike: f64) -> f64 {
        match self {
            OptionKind::Call => (terminal - strike).max(0.0),
            OptionKind::Put => (strike - terminal).max(0.0),
        }
    }
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

/// Which value stands in for a whole bin in the weighted-sum estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinRepresentative {
    #[default]
    LeftEdge,
    Midpoint,
}

impl BinRepresentative {
    pub fn values(self, histogram: &Histogram) -> Vec<f64> {
        match self {
            BinRepresentative::LeftEdge => histogram.left_edges().to_vec(),
            BinRepresentative::Midpoint => histogram.midpoints(),
        }
    }
}

/// Per-sample payoffs and their mean for one strike and kind.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PayoffResult {
    pub kind: OptionKind,
    pub strike: f64,
    pub payoffs: Vec<f64>,
    pub mean: f64,
}

impl PayoffResult {
    /// Share of samples with a strictly positive payoff.
    pub fn in_the_money_share(&self) -> f64 {
        if self.payoffs.is_empty() {
            return 0.0;
        }
        let itm = self.payoffs.iter().filter(|&&p| p > 0.0).count();
        itm as f64 / self.payoffs.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Moneyness {
    InTheMoney,
    OutOfTheMoney,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct LadderPoint {
    pub strike: f64,
    pub value: f64,
}

pub fn validate_strike(strike: f64) -> SimResult<()> {
    if !strike.is_finite() || strike < 0.0 {
        return Err(SimError::InvalidStrike(strike));
    }
    Ok(())
}

/// Raw-sample estimator (a).
pub fn evaluate(values: &[f64], strike: f64, kind: OptionKind) -> SimResult<PayoffResult> {
    validate_strike(strike)?;
    if values.is_empty() {
        return Err(SimError::EmptySample);
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(SimError::NonFiniteSample { index });
    }

    let payoffs: Vec<f64> = values.iter().map(|&s| kind.payoff(s, strike)).collect();
    let mean = payoffs.iter().sum::<f64>() / payoffs.len() as f64;

    Ok(PayoffResult {
        kind,
        strike,
        payoffs,
        mean,
    })
}

/// Binned weighted-sum estimator (b).
pub fn expected_from_histogram(
    histogram: &Histogram,
    strike: f64,
    kind: OptionKind,
    representative: BinRepresentative,
) -> SimResult<f64> {
    validate_strike(strike)?;
    if histogram.total() == 0 {
        return Err(SimError::EmptySample);
    }

    let reps = representative.values(histogram);
    Ok(histogram
        .probabilities()
        .iter()
        .zip(&reps)
        .map(|(&p, &rep)| p * kind.payoff(rep, strike))
        .sum())
}

/// Classify each bin by whether its representative value pays out.
pub fn classify_bins(
    histogram: &Histogram,
    strike: f64,
    kind: OptionKind,
    representative: BinRepresentative,
) -> SimResult<Vec<Moneyness>> {
    validate_strike(strike)?;
    Ok(representative
        .values(histogram)
        .into_iter()
        .map(|rep| {
            if kind.payoff(rep, strike) > 0.0 {
                Moneyness::InTheMoney
            } else {
                Moneyness::OutOfTheMoney
            }
        })
        .collect())
}

/// Raw-sample value for each strike on one shared sample.
pub fn strike_ladder(values: &[f64], strikes: &[f64], kind: OptionKind) -> SimResult<Vec<LadderPoint>> {
    strikes
        .iter()
        .map(|&strike| {
            evaluate(values, strike, kind).map(|r| LadderPoint {
                strike,
                value: r.mean,
            })
        })
        .collect()
}
