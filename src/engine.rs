use crate::errors::{SimError, SimResult};
use crate::sim::distribution::{Histogram, SampleSummary, TerminalDistribution, MAX_BINS};
use crate::sim::paths::{simulate_paths_until, PathBatch};
use crate::sim::{CancelToken, NormalSource, SimulationConfig};
use crate::valuation::payoff::{self, BinRepresentative, LadderPoint, Moneyness, OptionKind};

/// What to price on top of a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PricingParams {
    pub strike: f64,
    #[serde(default)]
    pub kind: OptionKind,
    /// Signed so a negative request value is reported against this field.
    pub num_bins: i64,
    #[serde(default)]
    pub representative: BinRepresentative,
}

/// Result of the full pipeline: paths -> terminal histogram -> payoff.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PricingReport {
    pub config: SimulationConfig,
    pub strike: f64,
    pub kind: OptionKind,
    pub num_steps: usize,
    pub histogram: Histogram,
    pub summary: SampleSummary,
    /// Raw-sample mean payoff: the estimated option value.
    pub option_value: f64,
    /// Weighted sum over the histogram using `representative`.
    pub binned_estimate: f64,
    pub representative: BinRepresentative,
    pub probability_in_the_money: f64,
    pub moneyness: Vec<Moneyness>,
}

/// Check everything the pipeline will need before simulating anything.
pub fn validate(config: &SimulationConfig, params: &PricingParams) -> SimResult<()> {
    config.validate()?;
    payoff::validate_strike(params.strike)?;
    bin_count(params.num_bins)?;
    Ok(())
}

/// `num_bins` as a histogram size, within `1..=MAX_BINS`.
pub fn bin_count(num_bins: i64) -> SimResult<usize> {
    match usize::try_from(num_bins) {
        Ok(n) if (1..=MAX_BINS).contains(&n) => Ok(n),
        _ => Err(SimError::invalid(
            "num_bins",
            format!("must be within 1..={MAX_BINS}, got {num_bins}"),
        )),
    }
}

/// Run the whole pipeline. Returns the batch alongside the report so callers
/// can chart the paths.
pub fn price<N: NormalSource + ?Sized>(
    config: &SimulationConfig,
    params: &PricingParams,
    normals: &mut N,
) -> SimResult<(PathBatch, PricingReport)> {
    price_until(config, params, normals, &CancelToken::new())
}

/// [`price`] with a stop signal polled between paths.
pub fn price_until<N: NormalSource + ?Sized>(
    config: &SimulationConfig,
    params: &PricingParams,
    normals: &mut N,
    cancel: &CancelToken,
) -> SimResult<(PathBatch, PricingReport)> {
    validate(config, params)?;
    let num_bins = bin_count(params.num_bins)?;

    let batch = simulate_paths_until(config, normals, cancel)?;
    let distribution = TerminalDistribution::from_batch(&batch, num_bins)?;
    let report = report_for(&batch, &distribution, params)?;
    Ok((batch, report))
}

/// Value a fixed terminal distribution; no simulation involved.
pub fn report_for(
    batch: &PathBatch,
    distribution: &TerminalDistribution,
    params: &PricingParams,
) -> SimResult<PricingReport> {
    let raw = payoff::evaluate(distribution.values(), params.strike, params.kind)?;
    let histogram = distribution.histogram();
    let binned_estimate = payoff::expected_from_histogram(
        histogram,
        params.strike,
        params.kind,
        params.representative,
    )?;
    let moneyness =
        payoff::classify_bins(histogram, params.strike, params.kind, params.representative)?;

    Ok(PricingReport {
        config: *batch.config(),
        strike: params.strike,
        kind: params.kind,
        num_steps: batch.time_grid().len(),
        histogram: histogram.clone(),
        summary: *distribution.summary(),
        option_value: raw.mean,
        binned_estimate,
        representative: params.representative,
        probability_in_the_money: raw.in_the_money_share(),
        moneyness,
    })
}

/// Strikes spread evenly over `[low_ratio, high_ratio] * initial_price`.
pub fn strike_grid(initial_price: f64, low_ratio: f64, high_ratio: f64, points: usize) -> Vec<f64> {
    crate::valuation::profit::linspace(initial_price * low_ratio, initial_price * high_ratio, points)
}

/// Option value across strikes on one simulated batch.
pub fn ladder(batch: &PathBatch, strikes: &[f64], kind: OptionKind) -> SimResult<Vec<LadderPoint>> {
    payoff::strike_ladder(&batch.terminal_values(), strikes, kind)
}
