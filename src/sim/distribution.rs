use crate::errors::{SimError, SimResult};
use crate::sim::paths::PathBatch;
use statrs::statistics::Statistics;

/// Relative half-width of the single bin used when every sample is equal.
const DEGENERATE_PAD: f64 = 1e-9;

/// Most bins a histogram may allocate.
pub const MAX_BINS: usize = 1_000_000;

/// Equal-width histogram. `edges.len() == counts.len() + 1`.
///
/// Bins are half-open `[edge_i, edge_{i+1})` except the last, which is closed
/// so the maximum lands inside it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Histogram {
    edges: Vec<f64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Bin over the observed `[min, max]` of `values`.
    ///
    /// If every value is identical the bin count collapses to one bin spanning
    /// `value -/+ pad`, so the width is never zero.
    pub fn from_samples(values: &[f64], num_bins: usize) -> SimResult<Self> {
        check_bins(num_bins)?;
        check_finite(values)?;
        if values.is_empty() {
            return Err(SimError::EmptySample);
        }

        let (low, high) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        if high - low <= 0.0 {
            let pad = DEGENERATE_PAD * low.abs().max(1.0);
            tracing::debug!(value = low, samples = values.len(), "degenerate sample, single padded bin");
            return Ok(Self {
                edges: vec![low - pad, high + pad],
                counts: vec![values.len() as u64],
            });
        }

        Ok(Self::bin(values, num_bins, low, high))
    }

    /// Bin over an explicit `[low, high]`; samples outside it are not counted.
    pub fn with_range(values: &[f64], num_bins: usize, low: f64, high: f64) -> SimResult<Self> {
        check_bins(num_bins)?;
        check_finite(values)?;
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(SimError::invalid(
                "range",
                format!("needs finite low < high, got [{low}, {high}]"),
            ));
        }
        Ok(Self::bin(values, num_bins, low, high))
    }

    fn bin(values: &[f64], num_bins: usize, low: f64, high: f64) -> Self {
        let width = (high - low) / num_bins as f64;
        let mut edges: Vec<f64> = (0..=num_bins).map(|i| low + i as f64 * width).collect();
        edges[num_bins] = high;

        let mut counts = vec![0u64; num_bins];
        for &v in values {
            if v < low || v > high {
                continue;
            }
            let mut idx = (((v - low) / width) as usize).min(num_bins - 1);
            // Float division can land one bin off near an edge; the edges win.
            if v < edges[idx] {
                idx -= 1;
            } else if idx + 1 < num_bins && v >= edges[idx + 1] {
                idx += 1;
            }
            counts[idx] += 1;
        }
        Self { edges, counts }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn num_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn left_edges(&self) -> &[f64] {
        &self.edges[..self.counts.len()]
    }

    pub fn midpoints(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// Empirical probability per bin, `count_i / total`. All zero when empty.
    pub fn probabilities(&self) -> Vec<f64> {
        let total = self.total();
        if total == 0 {
            return vec![0.0; self.counts.len()];
        }
        let total = total as f64;
        self.counts.iter().map(|&c| c as f64 / total).collect()
    }
}

fn check_bins(num_bins: usize) -> SimResult<()> {
    if !(1..=MAX_BINS).contains(&num_bins) {
        return Err(SimError::invalid(
            "num_bins",
            format!("must be within 1..={MAX_BINS}, got {num_bins}"),
        ));
    }
    Ok(())
}

fn check_finite(values: &[f64]) -> SimResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(SimError::NonFiniteSample { index }),
        None => Ok(()),
    }
}

/// Descriptive statistics over a sample.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SampleSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl SampleSummary {
    pub fn of(values: &[f64]) -> SimResult<Self> {
        if values.is_empty() {
            return Err(SimError::EmptySample);
        }
        let std_dev = if values.len() < 2 {
            0.0
        } else {
            Statistics::std_dev(values.iter())
        };
        Ok(Self {
            count: values.len(),
            mean: Statistics::mean(values.iter()),
            std_dev,
            min: Statistics::min(values.iter()),
            max: Statistics::max(values.iter()),
        })
    }
}

/// Terminal values of a batch and their histogram. Holds no reference back
/// to the batch it came from.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TerminalDistribution {
    values: Vec<f64>,
    histogram: Histogram,
    summary: SampleSummary,
}

impl TerminalDistribution {
    pub fn from_batch(batch: &PathBatch, num_bins: usize) -> SimResult<Self> {
        Self::from_values(batch.terminal_values(), num_bins)
    }

    pub fn from_values(values: Vec<f64>, num_bins: usize) -> SimResult<Self> {
        let histogram = Histogram::from_samples(&values, num_bins)?;
        let summary = SampleSummary::of(&values)?;
        Ok(Self {
            values,
            histogram,
            summary,
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn summary(&self) -> &SampleSummary {
        &self.summary
    }
}
