use crate::demo::dice::{self, DiceReport, DiscreteUniform};
use crate::engine::{self, PricingParams, PricingReport};
use crate::errors::{SimError, SimResult};
use crate::sim::distribution::{Histogram, SampleSummary, TerminalDistribution};
use crate::sim::paths::{simulate_paths_until, PricePath};
use crate::sim::{CancelToken, RngNormals, SimulationConfig};
use crate::state::{AppState, RunSummary};
use crate::valuation::payoff::{validate_strike, LadderPoint};
use crate::valuation::profit;
use crate::valuation::{BinRepresentative, OptionKind};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use portable_atomic::Ordering;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on points in a profit curve.
const MAX_CURVE_POINTS: usize = 10_000;

pub type ApiResponse = (StatusCode, Json<serde_json::Value>);

// ── Requests ──

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SimulateRequest {
    #[serde(flatten)]
    pub config: SimulationConfig,
    pub num_bins: Option<i64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PriceRequest {
    #[serde(flatten)]
    pub config: SimulationConfig,
    pub strike: f64,
    #[serde(default)]
    pub kind: OptionKind,
    pub num_bins: Option<i64>,
    #[serde(default)]
    pub representative: BinRepresentative,
    pub seed: Option<u64>,
    /// Extra strikes valued on the same batch.
    #[serde(default)]
    pub ladder: Vec<f64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DiceRequest {
    #[serde(default = "default_die_low")]
    pub low: i64,
    #[serde(default = "default_die_high")]
    pub high: i64,
    pub strike: f64,
    #[serde(default)]
    pub kind: OptionKind,
    #[serde(default = "default_num_trials")]
    pub num_trials: i64,
    pub seed: Option<u64>,
}

fn default_die_low() -> i64 {
    1
}

fn default_die_high() -> i64 {
    6
}

fn default_num_trials() -> i64 {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProfitCurveRequest {
    #[serde(default)]
    pub kind: OptionKind,
    pub strike: f64,
    pub premium: f64,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub points: Option<usize>,
}

// ── Responses ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct PriceResponse {
    pub run_id: String,
    pub report: PricingReport,
    pub ladder: Vec<LadderPoint>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SimulateResponse {
    pub run_id: String,
    pub time_grid: Vec<f64>,
    /// At most `MAX_RETURNED_PATHS` paths, for line charts.
    pub paths: Vec<PricePath>,
    pub paths_total: usize,
    pub terminal_values: Vec<f64>,
    pub histogram: Histogram,
    pub summary: SampleSummary,
}

// ── Shared helpers ──

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Enforce the host caps on top of the core's own validation.
fn check_workload(state: &AppState, config: &SimulationConfig) -> SimResult<()> {
    config.validate()?;
    let num_paths = config.num_paths as u64;
    if num_paths > state.config.max_paths {
        return Err(SimError::WorkloadTooLarge {
            requested: num_paths,
            limit: state.config.max_paths,
        });
    }
    let points = config.path_points();
    if points > state.config.max_path_points {
        return Err(SimError::WorkloadTooLarge {
            requested: points,
            limit: state.config.max_path_points,
        });
    }
    Ok(())
}

/// Requested bin count, defaulted and held to the host cap.
fn resolve_bins(state: &AppState, num_bins: Option<i64>) -> SimResult<usize> {
    let requested = num_bins.unwrap_or(state.config.default_num_bins);
    if requested > state.config.max_num_bins {
        return Err(SimError::invalid(
            "num_bins",
            format!("must be at most {}, got {requested}", state.config.max_num_bins),
        ));
    }
    engine::bin_count(requested)
}

/// Run CPU-bound work off the async executor under the wall-clock cap.
/// On timeout the work's token is cancelled so the blocking thread stops at
/// its next check instead of running to completion.
async fn run_blocking<T, F>(state: &AppState, work: F) -> SimResult<T>
where
    T: Send + 'static,
    F: FnOnce(CancelToken) -> SimResult<T> + Send + 'static,
{
    let limit_ms = state.config.simulation_timeout_ms;
    let cancel = CancelToken::new();
    let worker = cancel.clone();
    let task = tokio::task::spawn_blocking(move || work(worker));
    match tokio::time::timeout(Duration::from_millis(limit_ms), task).await {
        Ok(joined) => joined?,
        Err(_) => {
            cancel.cancel();
            state.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            Err(SimError::Timeout(limit_ms))
        }
    }
}

pub fn error_response(state: &AppState, e: &SimError) -> ApiResponse {
    state.counters.requests_rejected.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(kind = e.kind(), field = ?e.field(), "request rejected: {e}");
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_body(e)))
}

pub fn error_body(e: &SimError) -> serde_json::Value {
    serde_json::json!({
        "error": e.to_string(),
        "kind": e.kind(),
        "field": e.field(),
    })
}

fn respond<T: serde::Serialize>(state: &AppState, result: SimResult<T>) -> ApiResponse {
    match result {
        Ok(body) => (StatusCode::OK, Json(serde_json::json!(body))),
        Err(e) => error_response(state, &e),
    }
}

/// Full pricing pipeline for one request. Shared by HTTP and WebSocket.
pub async fn price_once(state: &Arc<AppState>, req: PriceRequest) -> SimResult<PriceResponse> {
    let num_bins = resolve_bins(state, req.num_bins)?;
    let params = PricingParams {
        strike: req.strike,
        kind: req.kind,
        num_bins: num_bins as i64,
        representative: req.representative,
    };
    engine::validate(&req.config, &params)?;
    for &strike in &req.ladder {
        validate_strike(strike)?;
    }
    check_workload(state, &req.config)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();
    let config = req.config;
    let seed = req.seed;
    let strikes = req.ladder;

    let (report, ladder) = run_blocking(state, move |cancel| {
        let mut normals = RngNormals::new(make_rng(seed));
        let (batch, report) = engine::price_until(&config, &params, &mut normals, &cancel)?;
        let ladder = engine::ladder(&batch, &strikes, params.kind)?;
        Ok((report, ladder))
    })
    .await?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.record_simulation(config.num_paths as u64);
    tracing::info!(
        run_id = %run_id,
        kind = %params.kind,
        strike = params.strike,
        num_paths = config.num_paths,
        num_steps = report.num_steps,
        option_value = report.option_value,
        elapsed_ms,
        "pricing run complete"
    );
    state.publish(RunSummary::from_report(run_id.clone(), &report, elapsed_ms, seed));

    Ok(PriceResponse {
        run_id,
        report,
        ladder,
    })
}

async fn simulate_once(state: &Arc<AppState>, req: SimulateRequest) -> SimResult<SimulateResponse> {
    let num_bins = resolve_bins(state, req.num_bins)?;
    check_workload(state, &req.config)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let config = req.config;
    let seed = req.seed;
    let keep = state.config.max_returned_paths;

    let response = run_blocking(state, move |cancel| {
        let mut normals = RngNormals::new(make_rng(seed));
        let batch = simulate_paths_until(&config, &mut normals, &cancel)?;
        let distribution = TerminalDistribution::from_batch(&batch, num_bins)?;
        Ok(SimulateResponse {
            run_id,
            time_grid: batch.time_grid().to_vec(),
            paths: batch.paths().iter().take(keep).cloned().collect(),
            paths_total: batch.len(),
            terminal_values: distribution.values().to_vec(),
            histogram: distribution.histogram().clone(),
            summary: *distribution.summary(),
        })
    })
    .await?;

    state.record_simulation(config.num_paths as u64);
    tracing::info!(run_id = %response.run_id, num_paths = config.num_paths, "simulation complete");
    Ok(response)
}

async fn dice_once(state: &Arc<AppState>, req: DiceRequest) -> SimResult<DiceReport> {
    let die = DiscreteUniform::new(req.low, req.high)?;
    validate_strike(req.strike)?;
    let num_trials = u64::try_from(req.num_trials)
        .ok()
        .filter(|&n| n > 0)
        .ok_or_else(|| {
            SimError::invalid("num_trials", format!("must be positive, got {}", req.num_trials))
        })?;
    if num_trials > state.config.max_dice_trials {
        return Err(SimError::WorkloadTooLarge {
            requested: num_trials,
            limit: state.config.max_dice_trials,
        });
    }

    let report = run_blocking(state, move |cancel| {
        let mut rng = make_rng(req.seed);
        dice::run_dice_demo_until(die, req.strike, req.kind, num_trials as usize, &mut rng, &cancel)
    })
    .await?;

    state.counters.dice_trials.fetch_add(report.num_trials as u64, Ordering::Relaxed);
    Ok(report)
}

fn profit_curve_for(req: &ProfitCurveRequest) -> SimResult<serde_json::Value> {
    validate_strike(req.strike)?;
    let low = req.low.unwrap_or(0.0);
    let high = req.high.unwrap_or_else(|| (2.0 * req.strike).max(1.0));
    if !(low.is_finite() && high.is_finite() && low < high) {
        return Err(SimError::invalid("range", format!("needs finite low < high, got [{low}, {high}]")));
    }
    let points = req.points.unwrap_or(200);
    if !(2..=MAX_CURVE_POINTS).contains(&points) {
        return Err(SimError::invalid(
            "points",
            format!("must be within 2..={MAX_CURVE_POINTS}, got {points}"),
        ));
    }

    let prices = profit::linspace(low, high, points);
    let curve = profit::profit_curve(req.kind, req.strike, req.premium, &prices)?;
    let breakeven = profit::breakeven(req.kind, req.strike, req.premium)?;
    Ok(serde_json::json!({
        "kind": req.kind,
        "strike": req.strike,
        "premium": req.premium,
        "breakeven": breakeven,
        "prices": prices,
        "profit": curve,
    }))
}

// ── Handlers ──

/// POST /api/price -- simulate, bin, and value one option
pub async fn post_price(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PriceRequest>,
) -> ApiResponse {
    let result = price_once(&state, req).await;
    respond(&state, result)
}

/// POST /api/simulate -- paths and terminal histogram, no valuation
pub async fn post_simulate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimulateRequest>,
) -> ApiResponse {
    let result = simulate_once(&state, req).await;
    respond(&state, result)
}

/// POST /api/dice -- discrete die demo
pub async fn post_dice(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiceRequest>,
) -> ApiResponse {
    let result = dice_once(&state, req).await;
    respond(&state, result)
}

/// POST /api/profit-curve -- long option profit vs underlying, premium included
pub async fn post_profit_curve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProfitCurveRequest>,
) -> ApiResponse {
    respond(&state, profit_curve_for(&req))
}

/// GET /api/last -- summary of the most recent pricing run
pub async fn get_last(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let last = state.last_run_rx.borrow().clone();
    Json(serde_json::json!({ "last_run": last }))
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.counters.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(config: AppConfig) -> Arc<AppState> {
        AppState::new(config)
    }

    async fn call(state: Arc<AppState>, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let app = crate::server::router(state);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(if method == "GET" { Body::empty() } else { Body::from(body.to_string()) })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn price_body() -> serde_json::Value {
        serde_json::json!({
            "initial_price": 200.0,
            "drift": 0.0005,
            "volatility": 0.005,
            "steps_per_unit": 24,
            "horizon": 30.0,
            "num_paths": 200,
            "strike": 210.0,
            "kind": "call",
            "seed": 42,
            "ladder": [190.0, 200.0, 210.0]
        })
    }

    #[tokio::test]
    async fn test_price_endpoint_is_seed_reproducible() {
        let state = test_state(AppConfig::default());
        let (status, first) = call(state.clone(), "POST", "/api/price", price_body()).await;
        assert_eq!(status, StatusCode::OK, "body: {first}");
        let (_, second) = call(state.clone(), "POST", "/api/price", price_body()).await;

        assert_eq!(first["report"]["option_value"], second["report"]["option_value"]);
        assert_ne!(first["run_id"], second["run_id"]);
        assert_eq!(first["report"]["histogram"]["counts"].as_array().unwrap().len(), 20);
        assert_eq!(first["ladder"].as_array().unwrap().len(), 3);
        assert!(first["report"]["option_value"].as_f64().unwrap() >= 0.0);

        let (_, last) = call(state.clone(), "GET", "/api/last", serde_json::Value::Null).await;
        assert_eq!(last["last_run"]["run_id"], second["run_id"]);
        assert_eq!(state.counters.simulations_run.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_price_rejects_invalid_inputs() {
        let state = test_state(AppConfig::default());

        let mut body = price_body();
        body["initial_price"] = serde_json::json!(-5.0);
        let (status, err) = call(state.clone(), "POST", "/api/price", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["kind"], "invalid_config");
        assert_eq!(err["field"], "initial_price");

        let mut body = price_body();
        body["strike"] = serde_json::json!(-1.0);
        let (status, err) = call(state.clone(), "POST", "/api/price", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["kind"], "invalid_strike");
        assert_eq!(state.counters.simulations_run.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_workload_cap() {
        let config = AppConfig {
            max_path_points: 1_000,
            ..AppConfig::default()
        };
        let (status, err) = call(test_state(config), "POST", "/api/price", price_body()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err["kind"], "workload_too_large");
    }

    #[tokio::test]
    async fn test_bin_count_is_capped() {
        let state = test_state(AppConfig::default());
        for bad in [
            serde_json::json!(4_611_686_018_427_387_904i64),
            serde_json::json!(10_001),
            serde_json::json!(0),
            serde_json::json!(-4),
        ] {
            let mut body = price_body();
            body["num_bins"] = bad.clone();
            let (status, err) = call(state.clone(), "POST", "/api/price", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "num_bins {bad}");
            assert_eq!(err["field"], "num_bins");
        }

        let body = serde_json::json!({
            "initial_price": 100.0, "drift": 0.0, "volatility": 0.01,
            "steps_per_unit": 4, "horizon": 1.0, "num_paths": 3, "num_bins": 1_000_000_000_000i64
        });
        let (status, err) = call(state.clone(), "POST", "/api/simulate", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["field"], "num_bins");
        assert_eq!(state.counters.simulations_run.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_dice_trials_cap_and_huge_strike() {
        let config = AppConfig {
            max_dice_trials: 1_000,
            ..AppConfig::default()
        };
        let state = test_state(config);

        let body = serde_json::json!({ "strike": 3.0, "num_trials": 1_001 });
        let (status, err) = call(state.clone(), "POST", "/api/dice", body).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err["kind"], "workload_too_large");

        let body = serde_json::json!({ "strike": 3.0, "num_trials": -5 });
        let (status, err) = call(state.clone(), "POST", "/api/dice", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["field"], "num_trials");

        let body = serde_json::json!({ "strike": 1e18, "kind": "put", "num_trials": 100, "seed": 2 });
        let (status, resp) = call(state.clone(), "POST", "/api/dice", body).await;
        assert_eq!(status, StatusCode::OK, "body: {resp}");
        assert_eq!(resp["payoff_histogram"]["counts"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_timeout_cancels_blocking_work() {
        let config = AppConfig {
            simulation_timeout_ms: 20,
            ..AppConfig::default()
        };
        let state = test_state(config);
        let stopped = Arc::new(portable_atomic::AtomicBool::new(false));
        let flag = stopped.clone();

        let result: SimResult<()> = run_blocking(&state, move |cancel| {
            let started = Instant::now();
            while !cancel.is_cancelled() && started.elapsed() < Duration::from_secs(5) {
                std::thread::sleep(Duration::from_millis(1));
            }
            flag.store(cancel.is_cancelled(), Ordering::Relaxed);
            cancel.check()
        })
        .await;
        assert_eq!(result.unwrap_err(), SimError::Timeout(20));
        assert_eq!(state.counters.timeouts.load(Ordering::Relaxed), 1);

        for _ in 0..400 {
            if stopped.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(stopped.load(Ordering::Relaxed), "worker never saw the cancel");
    }

    #[tokio::test]
    async fn test_simulate_truncates_returned_paths() {
        let config = AppConfig {
            max_returned_paths: 5,
            ..AppConfig::default()
        };
        let body = serde_json::json!({
            "initial_price": 100.0, "drift": 0.0, "volatility": 0.01,
            "steps_per_unit": 4, "horizon": 10.0, "num_paths": 30, "num_bins": 8, "seed": 1
        });
        let (status, resp) = call(test_state(config), "POST", "/api/simulate", body).await;
        assert_eq!(status, StatusCode::OK, "body: {resp}");
        assert_eq!(resp["paths"].as_array().unwrap().len(), 5);
        assert_eq!(resp["paths_total"], 30);
        assert_eq!(resp["time_grid"].as_array().unwrap().len(), 41);
        assert_eq!(resp["terminal_values"].as_array().unwrap().len(), 30);
        let counts: u64 = resp["histogram"]["counts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c.as_u64().unwrap())
            .sum();
        assert_eq!(counts, 30);
    }

    #[tokio::test]
    async fn test_dice_endpoint() {
        let body = serde_json::json!({ "strike": 3.0, "num_trials": 60_000, "seed": 9 });
        let (status, resp) = call(test_state(AppConfig::default()), "POST", "/api/dice", body).await;
        assert_eq!(status, StatusCode::OK, "body: {resp}");
        assert_eq!(resp["expected_value_analytic"], 1.0);
        let binned = resp["expected_value_binned"].as_f64().unwrap();
        assert!((binned - 1.0).abs() < 0.05, "binned {binned}");
    }

    #[tokio::test]
    async fn test_profit_curve_endpoint() {
        let body = serde_json::json!({
            "kind": "put", "strike": 1500.0, "premium": 100.0,
            "low": 1000.0, "high": 2000.0, "points": 11
        });
        let (status, resp) = call(test_state(AppConfig::default()), "POST", "/api/profit-curve", body).await;
        assert_eq!(status, StatusCode::OK, "body: {resp}");
        assert_eq!(resp["breakeven"], 1400.0);
        let profit = resp["profit"].as_array().unwrap();
        assert_eq!(profit.len(), 11);
        assert_eq!(profit[0], 400.0);
        assert_eq!(profit[10], -100.0);

        let bad = serde_json::json!({ "strike": 100.0, "premium": 5.0, "points": 1 });
        let (status, err) = call(test_state(AppConfig::default()), "POST", "/api/profit-curve", bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["field"], "points");
    }
}
