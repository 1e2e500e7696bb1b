use crate::errors::{SimError, SimResult};
use crate::sim::distribution::Histogram;
use crate::sim::CancelToken;
use crate::valuation::payoff::{self, validate_strike, BinRepresentative, OptionKind};
use rand::Rng;

/// Cap on the number of faces, keeps the outcome histogram bounded.
const MAX_FACES: i64 = 1_000_000;

/// Rolls drawn between cancellation checks.
const ROLL_CHUNK: usize = 1 << 16;

/// Uniform distribution over the integers `low..=high`; a fair die by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DiscreteUniform {
    low: i64,
    high: i64,
}

impl Default for DiscreteUniform {
    fn default() -> Self {
        Self { low: 1, high: 6 }
    }
}

impl DiscreteUniform {
    pub fn new(low: i64, high: i64) -> SimResult<Self> {
        if low > high {
            return Err(SimError::invalid("high", format!("must be >= low ({low}), got {high}")));
        }
        match high.checked_sub(low) {
            Some(span) if span < MAX_FACES => Ok(Self { low, high }),
            _ => Err(SimError::invalid(
                "high",
                format!("range {low}..={high} exceeds {MAX_FACES} faces"),
            )),
        }
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn num_faces(&self) -> usize {
        (self.high - self.low + 1) as usize
    }

    pub fn faces(&self) -> impl Iterator<Item = i64> {
        self.low..=self.high
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, num_trials: usize) -> Vec<i64> {
        (0..num_trials).map(|_| rng.gen_range(self.low..=self.high)).collect()
    }

    /// Like [`sample`](Self::sample), polling `cancel` every `ROLL_CHUNK` rolls.
    pub fn sample_until<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        num_trials: usize,
        cancel: &CancelToken,
    ) -> SimResult<Vec<i64>> {
        let mut rolls = Vec::with_capacity(num_trials);
        while rolls.len() < num_trials {
            cancel.check()?;
            let chunk = (num_trials - rolls.len()).min(ROLL_CHUNK);
            rolls.extend((0..chunk).map(|_| rng.gen_range(self.low..=self.high)));
        }
        Ok(rolls)
    }

    /// Closed-form `E[payoff(X)]` with every face equally likely.
    pub fn analytic_expectation(&self, strike: f64, kind: OptionKind) -> SimResult<f64> {
        validate_strike(strike)?;
        let total: f64 = self.faces().map(|f| kind.payoff(f as f64, strike)).sum();
        Ok(total / self.num_faces() as f64)
    }

    /// Outcome histogram: one unit-width bin per face over `[low, high + 1]`,
    /// so each bin's left edge is its face value.
    pub fn outcome_histogram(&self, rolls: &[f64]) -> SimResult<Histogram> {
        Histogram::with_range(rolls, self.num_faces(), self.low as f64, self.high as f64 + 1.0)
    }

    /// Payoff histogram over `[0, max payoff]`. Unit-width bins when at most
    /// `num_faces` of them cover the range, otherwise `num_faces` equal bins;
    /// the faces never produce more distinct payoffs than that.
    pub fn payoff_histogram(
        &self,
        payoffs: &[f64],
        strike: f64,
        kind: OptionKind,
    ) -> SimResult<Histogram> {
        let max_payoff = self.max_payoff(strike, kind);
        let faces = self.num_faces();
        let unit_bins = max_payoff.floor() + 1.0;
        if unit_bins <= faces as f64 {
            let bins = unit_bins as usize;
            Histogram::with_range(payoffs, bins, 0.0, bins as f64)
        } else {
            Histogram::with_range(payoffs, faces, 0.0, max_payoff)
        }
    }

    /// Largest payoff any face can produce.
    fn max_payoff(&self, strike: f64, kind: OptionKind) -> f64 {
        kind.payoff(self.low as f64, strike)
            .max(kind.payoff(self.high as f64, strike))
    }
}

/// Everything the die demo shows: both histograms and three estimates of the
/// option value that should agree as `num_trials` grows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiceReport {
    pub die: DiscreteUniform,
    pub strike: f64,
    pub kind: OptionKind,
    pub num_trials: usize,
    pub outcome_histogram: Histogram,
    pub payoff_histogram: Histogram,
    /// Weighted sum over the outcome histogram, left-edge representative.
    pub expected_value_binned: f64,
    pub expected_value_raw: f64,
    pub expected_value_analytic: f64,
}

pub fn run_dice_demo<R: Rng + ?Sized>(
    die: DiscreteUniform,
    strike: f64,
    kind: OptionKind,
    num_trials: usize,
    rng: &mut R,
) -> SimResult<DiceReport> {
    run_dice_demo_until(die, strike, kind, num_trials, rng, &CancelToken::new())
}

/// [`run_dice_demo`] that stops with `Cancelled` once `cancel` fires.
pub fn run_dice_demo_until<R: Rng + ?Sized>(
    die: DiscreteUniform,
    strike: f64,
    kind: OptionKind,
    num_trials: usize,
    rng: &mut R,
    cancel: &CancelToken,
) -> SimResult<DiceReport> {
    validate_strike(strike)?;
    if num_trials == 0 {
        return Err(SimError::invalid("num_trials", "must be positive"));
    }

    let rolls: Vec<f64> = die
        .sample_until(rng, num_trials, cancel)?
        .into_iter()
        .map(|r| r as f64)
        .collect();

    let outcome_histogram = die.outcome_histogram(&rolls)?;
    let expected_value_binned = payoff::expected_from_histogram(
        &outcome_histogram,
        strike,
        kind,
        BinRepresentative::LeftEdge,
    )?;

    let payoffs = payoff::evaluate(&rolls, strike, kind)?;
    let payoff_histogram = die.payoff_histogram(&payoffs.payoffs, strike, kind)?;

    let expected_value_analytic = die.analytic_expectation(strike, kind)?;

    tracing::debug!(
        num_trials,
        strike,
        %kind,
        binned = expected_value_binned,
        raw = payoffs.mean,
        analytic = expected_value_analytic,
        "dice demo complete"
    );

    Ok(DiceReport {
        die,
        strike,
        kind,
        num_trials,
        outcome_histogram,
        payoff_histogram,
        expected_value_binned,
        expected_value_raw: payoffs.mean,
        expected_value_analytic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_analytic_expectation_fair_die() {
        let die = DiscreteUniform::default();
        assert_relative_eq!(die.analytic_expectation(3.0, OptionKind::Call).unwrap(), 1.0);
        assert_relative_eq!(
            die.analytic_expectation(4.0, OptionKind::Call).unwrap(),
            (1.0 + 2.0) / 6.0
        );
        assert_relative_eq!(
            die.analytic_expectation(4.0, OptionKind::Put).unwrap(),
            (3.0 + 2.0 + 1.0) / 6.0
        );
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert_eq!(DiscreteUniform::new(6, 1).unwrap_err().field(), Some("high"));
        assert!(DiscreteUniform::new(i64::MIN, i64::MAX).is_err());
        assert_eq!(DiscreteUniform::new(3, 3).unwrap().num_faces(), 1);
    }

    #[test]
    fn test_samples_stay_in_range() {
        let die = DiscreteUniform::new(-2, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let rolls = die.sample(&mut rng, 2_000);
        assert!(rolls.iter().all(|r| (-2..=2).contains(r)));
        for face in die.faces() {
            assert!(rolls.contains(&face), "face {face} never rolled");
        }
    }

    #[test]
    fn test_binned_estimate_converges_to_analytic() {
        let die = DiscreteUniform::default();
        let mut rng = StdRng::seed_from_u64(2024);
        let report = run_dice_demo(die, 3.0, OptionKind::Call, 100_000, &mut rng).unwrap();

        assert_eq!(report.outcome_histogram.total(), 100_000);
        assert_eq!(report.outcome_histogram.num_bins(), 6);
        assert!(
            (report.expected_value_binned - 1.0).abs() < 0.05,
            "binned estimate {} too far from 1.0",
            report.expected_value_binned
        );
        assert!((report.expected_value_raw - 1.0).abs() < 0.05);
        // Unit-width bins with integer left edges reproduce the raw mean.
        assert_relative_eq!(
            report.expected_value_binned,
            report.expected_value_raw,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_estimate_error_shrinks_with_trials() {
        let die = DiscreteUniform::default();
        let errors: Vec<f64> = [100usize, 10_000, 1_000_000]
            .iter()
            .map(|&n| {
                let mut rng = StdRng::seed_from_u64(5);
                let r = run_dice_demo(die, 3.0, OptionKind::Call, n, &mut rng).unwrap();
                (r.expected_value_binned - r.expected_value_analytic).abs()
            })
            .collect();
        assert!(errors[2] < 0.01, "1e6 trials error {}", errors[2]);
        assert!(errors[1] < 0.1, "1e4 trials error {}", errors[1]);
    }

    #[test]
    fn test_payoff_histogram_shape() {
        let die = DiscreteUniform::default();
        let mut rng = StdRng::seed_from_u64(8);
        let report = run_dice_demo(die, 3.0, OptionKind::Call, 6_000, &mut rng).unwrap();
        // Payoffs 0..=3 -> four unit bins over [0, 4].
        assert_eq!(report.payoff_histogram.edges(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(report.payoff_histogram.total(), 6_000);
        let zero_share = report.payoff_histogram.counts()[0] as f64 / 6_000.0;
        assert!((zero_share - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_huge_put_strike_keeps_payoff_histogram_small() {
        let die = DiscreteUniform::default();
        let mut rng = StdRng::seed_from_u64(4);
        let report = run_dice_demo(die, 1e18, OptionKind::Put, 10, &mut rng).unwrap();
        assert_eq!(report.payoff_histogram.num_bins(), 6);
        assert_eq!(report.payoff_histogram.total(), 10);
        assert_eq!(report.payoff_histogram.edges()[0], 0.0);
        assert_eq!(report.payoff_histogram.edges()[6], 1e18 - 1.0);
        assert_relative_eq!(report.expected_value_analytic, 1e18 - 3.5, max_relative = 1e-12);

        // Just past the unit-width limit: 7 unit bins would be needed, 6 faces.
        let report = run_dice_demo(die, 7.5, OptionKind::Put, 600, &mut rng).unwrap();
        assert_eq!(report.payoff_histogram.num_bins(), 6);
        assert_eq!(report.payoff_histogram.total(), 600);
    }

    #[test]
    fn test_cancelled_demo_stops() {
        let token = CancelToken::new();
        token.cancel();
        let mut rng = StdRng::seed_from_u64(1);
        let err = run_dice_demo_until(
            DiscreteUniform::default(),
            3.0,
            OptionKind::Call,
            10_000_000,
            &mut rng,
            &token,
        )
        .unwrap_err();
        assert_eq!(err, SimError::Cancelled);
    }

    #[test]
    fn test_chunked_sampling_matches_plain_sampling() {
        let die = DiscreteUniform::default();
        let n = ROLL_CHUNK * 2 + 17;
        let plain = die.sample(&mut StdRng::seed_from_u64(6), n);
        let chunked = die
            .sample_until(&mut StdRng::seed_from_u64(6), n, &CancelToken::new())
            .unwrap();
        assert_eq!(plain, chunked);
    }

    #[test]
    fn test_demo_input_errors() {
        let die = DiscreteUniform::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            run_dice_demo(die, -1.0, OptionKind::Call, 10, &mut rng).unwrap_err(),
            SimError::InvalidStrike(-1.0)
        );
        assert_eq!(
            run_dice_demo(die, 3.0, OptionKind::Call, 0, &mut rng).unwrap_err().field(),
            Some("num_trials")
        );
    }
}
