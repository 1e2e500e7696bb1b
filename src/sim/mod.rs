pub mod distribution;
pub mod paths;

use crate::errors::{SimError, SimResult};
use portable_atomic::{AtomicBool, Ordering};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use std::sync::Arc;

/// Largest |log-price| a path may reach before `exp` leaves the finite,
/// strictly positive f64 range.
const LOG_PRICE_LIMIT: f64 = 700.0;

/// Bound on the discretized Wiener process in units of its standard
/// deviation, used when screening configs for overflow.
const WIENER_SIGMA_BOUND: f64 = 12.0;

/// Hard ceiling on the number of time intervals in one path.
const MAX_INTERVALS: f64 = u32::MAX as f64;

/// Source of standard-normal draws for the path simulator.
/// Injected by the caller; the core never reaches for a global generator.
pub trait NormalSource {
    fn next_standard_normal(&mut self) -> f64;
}

impl<S: NormalSource + ?Sized> NormalSource for &mut S {
    #[inline]
    fn next_standard_normal(&mut self) -> f64 {
        (**self).next_standard_normal()
    }
}

/// Adapts any `rand` generator into a [`NormalSource`] (Ziggurat sampling via
/// `rand_distr::StandardNormal`).
pub struct RngNormals<R> {
    inner: R,
}

impl<R: Rng> RngNormals<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Rng> NormalSource for RngNormals<R> {
    #[inline]
    fn next_standard_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.inner)
    }
}

/// Cooperative stop signal for long runs. Workers poll it between paths or
/// chunks of trials and bail out with [`SimError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    #[inline]
    pub fn check(&self) -> SimResult<()> {
        if self.is_cancelled() {
            return Err(SimError::Cancelled);
        }
        Ok(())
    }
}

/// How the discretized Wiener process starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WienerInit {
    /// `W_0 = 0`: the path starts exactly at `initial_price` and consumes
    /// `N` draws.
    #[default]
    Zero,
    /// Cumulative sum over all `N + 1` draws, so `W_0 = Z_0 * sqrt(dt)` and
    /// the first point already carries noise.
    FirstDraw,
}

/// Parameters for one simulation run. Immutable once validated.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimulationConfig {
    pub initial_price: f64,
    /// Per-unit mean log-return.
    pub drift: f64,
    /// Per-unit log-return standard deviation.
    pub volatility: f64,
    pub steps_per_unit: i64,
    pub horizon: f64,
    pub num_paths: i64,
    #[serde(default)]
    pub wiener_init: WienerInit,
}

impl SimulationConfig {
    pub fn new(
        initial_price: f64,
        drift: f64,
        volatility: f64,
        steps_per_unit: i64,
        horizon: f64,
        num_paths: i64,
    ) -> SimResult<Self> {
        let config = Self {
            initial_price,
            drift,
            volatility,
            steps_per_unit,
            horizon,
            num_paths,
            wiener_init: WienerInit::Zero,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_wiener_init(mut self, wiener_init: WienerInit) -> Self {
        self.wiener_init = wiener_init;
        self
    }

    /// Check every invariant. Called on construction and again by the
    /// simulator, since fields are public and may arrive from a request body.
    pub fn validate(&self) -> SimResult<()> {
        if !self.initial_price.is_finite() || self.initial_price <= 0.0 {
            return Err(SimError::invalid(
                "initial_price",
                format!("must be positive and finite, got {}", self.initial_price),
            ));
        }
        if !self.drift.is_finite() {
            return Err(SimError::invalid("drift", format!("must be finite, got {}", self.drift)));
        }
        if !self.volatility.is_finite() || self.volatility < 0.0 {
            return Err(SimError::invalid(
                "volatility",
                format!("must be non-negative and finite, got {}", self.volatility),
            ));
        }
        if self.steps_per_unit <= 0 {
            return Err(SimError::invalid(
                "steps_per_unit",
                format!("must be positive, got {}", self.steps_per_unit),
            ));
        }
        if !self.horizon.is_finite() || self.horizon <= 0.0 {
            return Err(SimError::invalid(
                "horizon",
                format!("must be positive and finite, got {}", self.horizon),
            ));
        }
        if self.num_paths <= 0 {
            return Err(SimError::invalid(
                "num_paths",
                format!("must be positive, got {}", self.num_paths),
            ));
        }

        let intervals = self.steps_per_unit as f64 * self.horizon;
        let rounded = intervals.round();
        if (intervals - rounded).abs() > 1e-9 * rounded.max(1.0) || rounded < 1.0 {
            return Err(SimError::invalid(
                "horizon",
                format!(
                    "must be a whole multiple of 1/steps_per_unit ({} x {} = {intervals})",
                    self.steps_per_unit, self.horizon
                ),
            ));
        }
        if rounded > MAX_INTERVALS {
            return Err(SimError::invalid(
                "horizon",
                format!("{rounded} intervals exceeds the per-path limit"),
            ));
        }

        self.check_log_price_range()
    }

    /// Reject configs whose log-price could leave the range where
    /// `initial_price * exp(x)` stays finite and strictly positive.
    fn check_log_price_range(&self) -> SimResult<()> {
        let sigma = self.volatility;
        let drift_term = (self.drift - 0.5 * sigma * sigma) * self.horizon;
        let wiener_var = match self.wiener_init {
            WienerInit::Zero => self.horizon,
            WienerInit::FirstDraw => self.horizon + self.dt(),
        };
        let spread = WIENER_SIGMA_BOUND * sigma * wiener_var.sqrt();
        let ln_s0 = self.initial_price.ln();

        let highest = ln_s0 + drift_term.max(0.0) + spread;
        let lowest = ln_s0 + drift_term.min(0.0) - spread;

        // Negated comparisons so NaN is rejected too.
        if !(highest < LOG_PRICE_LIMIT && lowest > -LOG_PRICE_LIMIT) {
            let field = if spread > drift_term.abs() { "volatility" } else { "drift" };
            return Err(SimError::invalid(
                field,
                format!("log-price range [{lowest:.1}, {highest:.1}] overflows f64"),
            ));
        }
        Ok(())
    }

    /// Number of time intervals `N = steps_per_unit * horizon`.
    #[inline]
    pub fn num_intervals(&self) -> usize {
        (self.steps_per_unit as f64 * self.horizon).round() as usize
    }

    /// Points per path including the initial one: `N + 1`.
    #[inline]
    pub fn num_steps(&self) -> usize {
        self.num_intervals() + 1
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        1.0 / self.steps_per_unit as f64
    }

    /// Total points across the batch, used by hosts to cap workload.
    pub fn path_points(&self) -> u64 {
        (self.num_paths.max(0) as u64).saturating_mul(self.num_steps() as u64)
    }

    /// Drift of the log-price after the lognormal correction.
    #[inline]
    pub fn log_drift(&self) -> f64 {
        self.drift - 0.5 * self.volatility * self.volatility
    }
}
