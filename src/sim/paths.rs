use crate::errors::SimResult;
use crate::sim::{CancelToken, NormalSource, SimulationConfig, WienerInit};

/// One simulated price trajectory. Index 0 is the start, the last index is
/// the terminal value. Never mutated after the simulator returns it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct PricePath(Vec<f64>);

impl PricePath {
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn initial(&self) -> f64 {
        self.0.first().copied().unwrap_or(f64::NAN)
    }

    #[inline]
    pub fn terminal(&self) -> f64 {
        self.0.last().copied().unwrap_or(f64::NAN)
    }
}

/// All paths of one run, plus the time grid they share.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PathBatch {
    config: SimulationConfig,
    time_grid: Vec<f64>,
    paths: Vec<PricePath>,
}

impl PathBatch {
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn time_grid(&self) -> &[f64] {
        &self.time_grid
    }

    pub fn paths(&self) -> &[PricePath] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Final value of every path, in path order.
    pub fn terminal_values(&self) -> Vec<f64> {
        self.paths.iter().map(PricePath::terminal).collect()
    }
}

/// Time coordinates `t_k = k * horizon / N` for `k = 0..=N`; `t_N` is
/// exactly `horizon`.
pub fn time_grid(config: &SimulationConfig) -> Vec<f64> {
    let n = config.num_intervals();
    let horizon = config.horizon;
    (0..=n)
        .map(|k| if k == n { horizon } else { k as f64 * horizon / n as f64 })
        .collect()
}

/// Simulate `num_paths` independent geometric random-walk paths.
///
/// Per path: `W_k = sqrt(dt) * sum(Z_0..=Z_k)`,
/// `X_k = (drift - volatility^2 / 2) * t_k + volatility * W_k`,
/// `S_k = initial_price * exp(X_k)`.
///
/// Zero volatility takes a deterministic branch: one closed-form path
/// `initial_price * exp(drift * t_k)` repeated for every trial, with no draws
/// consumed.
pub fn simulate_paths<N: NormalSource + ?Sized>(
    config: &SimulationConfig,
    normals: &mut N,
) -> SimResult<PathBatch> {
    simulate_paths_until(config, normals, &CancelToken::new())
}

/// [`simulate_paths`] that polls `cancel` before each path and returns
/// [`SimError::Cancelled`](crate::errors::SimError::Cancelled) once it fires.
pub fn simulate_paths_until<N: NormalSource + ?Sized>(
    config: &SimulationConfig,
    normals: &mut N,
    cancel: &CancelToken,
) -> SimResult<PathBatch> {
    config.validate()?;

    let grid = time_grid(config);
    let num_paths = config.num_paths as usize;

    tracing::debug!(
        num_paths,
        num_steps = grid.len(),
        volatility = config.volatility,
        "simulating price paths"
    );

    let paths = if config.volatility == 0.0 {
        tracing::debug!("zero volatility, generating deterministic paths");
        cancel.check()?;
        let path = deterministic_path(config, &grid);
        vec![path; num_paths]
    } else {
        let mut wiener = vec![0.0; grid.len()];
        (0..num_paths)
            .map(|_| {
                cancel.check()?;
                fill_wiener(config, normals, &mut wiener);
                Ok(price_path(config, &grid, &wiener))
            })
            .collect::<SimResult<Vec<_>>>()?
    };

    Ok(PathBatch {
        config: *config,
        time_grid: grid,
        paths,
    })
}

/// Cumulative sum of standard normals, scaled by `sqrt(dt)` after summing.
fn fill_wiener<N: NormalSource + ?Sized>(
    config: &SimulationConfig,
    normals: &mut N,
    wiener: &mut [f64],
) {
    let sqrt_dt = config.dt().sqrt();
    let mut cumulative = match config.wiener_init {
        WienerInit::Zero => 0.0,
        WienerInit::FirstDraw => normals.next_standard_normal(),
    };
    wiener[0] = cumulative * sqrt_dt;
    for w in wiener.iter_mut().skip(1) {
        cumulative += normals.next_standard_normal();
        *w = cumulative * sqrt_dt;
    }
}

fn price_path(config: &SimulationConfig, grid: &[f64], wiener: &[f64]) -> PricePath {
    let mu = config.log_drift();
    let sigma = config.volatility;
    let s0 = config.initial_price;
    let ln_s0 = s0.ln();
    PricePath(
        grid.iter()
            .zip(wiener)
            .map(|(&t, &w)| level(s0, ln_s0, mu * t + sigma * w))
            .collect(),
    )
}

fn deterministic_path(config: &SimulationConfig, grid: &[f64]) -> PricePath {
    let s0 = config.initial_price;
    let ln_s0 = s0.ln();
    PricePath(grid.iter().map(|&t| level(s0, ln_s0, config.drift * t)).collect())
}

/// `s0 * exp(x)`. Falls back to `exp(ln s0 + x)` when `exp(x)` alone
/// overflows or underflows although the combined log-price is in range.
#[inline]
fn level(s0: f64, ln_s0: f64, x: f64) -> f64 {
    let direct = s0 * x.exp();
    if direct.is_normal() {
        direct
    } else {
        (ln_s0 + x).exp()
    }
}
