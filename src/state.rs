use crate::config::AppConfig;
use crate::engine::PricingReport;
use crate::valuation::OptionKind;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

// ── Last pricing run (published on a watch channel) ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub completed_at: String,
    pub kind: OptionKind,
    pub strike: f64,
    pub initial_price: f64,
    pub volatility: f64,
    pub horizon: f64,
    pub num_paths: i64,
    pub num_steps: usize,
    pub option_value: f64,
    pub binned_estimate: f64,
    pub probability_in_the_money: f64,
    pub elapsed_ms: u64,
    pub seed: Option<u64>,
}

impl RunSummary {
    pub fn from_report(run_id: String, report: &PricingReport, elapsed_ms: u64, seed: Option<u64>) -> Self {
        Self {
            run_id,
            completed_at: chrono::Utc::now().to_rfc3339(),
            kind: report.kind,
            strike: report.strike,
            initial_price: report.config.initial_price,
            volatility: report.config.volatility,
            horizon: report.config.horizon,
            num_paths: report.config.num_paths,
            num_steps: report.num_steps,
            option_value: report.option_value,
            binned_estimate: report.binned_estimate,
            probability_in_the_money: report.probability_in_the_money,
            elapsed_ms,
            seed,
        }
    }
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub simulations_run: AtomicU64,
    pub paths_simulated: AtomicU64,
    pub dice_trials: AtomicU64,
    pub requests_rejected: AtomicU64,
    pub timeouts: AtomicU64,
    pub ws_messages_handled: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            simulations_run: AtomicU64::new(0),
            paths_simulated: AtomicU64::new(0),
            dice_trials: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            ws_messages_handled: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        use Ordering::Relaxed;
        serde_json::json!({
            "simulations_run": self.simulations_run.load(Relaxed),
            "paths_simulated": self.paths_simulated.load(Relaxed),
            "dice_trials": self.dice_trials.load(Relaxed),
            "requests_rejected": self.requests_rejected.load(Relaxed),
            "timeouts": self.timeouts.load(Relaxed),
            "ws_messages_handled": self.ws_messages_handled.load(Relaxed),
        })
    }
}

// ── Application shared state ──
// No simulation state lives here: every request builds its own generator and
// batch, so handlers share only config, counters and the last-run summary.

pub struct AppState {
    pub config: AppConfig,
    pub last_run_tx: watch::Sender<Option<RunSummary>>,
    pub last_run_rx: watch::Receiver<Option<RunSummary>>,
    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(config: AppConfig) -> Arc<Self> {
        let (last_run_tx, last_run_rx) = watch::channel(None);
        Arc::new(Self {
            config,
            last_run_tx,
            last_run_rx,
            counters: PerfCounters::new(),
        })
    }

    pub fn publish(&self, summary: RunSummary) {
        let _ = self.last_run_tx.send(Some(summary));
    }

    #[inline]
    pub fn record_simulation(&self, num_paths: u64) {
        self.counters.simulations_run.fetch_add(1, Ordering::Relaxed);
        self.counters.paths_simulated.fetch_add(num_paths, Ordering::Relaxed);
    }
}
