/// Error taxonomy for the simulation core and the service around it.
/// Input errors are raised at the boundary of a public operation, before any
/// simulation work starts. Numeric degeneracy (zero volatility, a single
/// repeated terminal value) is never an error: it has explicit fallbacks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("invalid config: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("invalid strike: {0} (must be finite and non-negative)")]
    InvalidStrike(f64),

    #[error("empty sample: nothing to evaluate")]
    EmptySample,

    #[error("non-finite sample at index {index}")]
    NonFiniteSample { index: usize },

    #[error("workload too large: {requested} path points requested, limit {limit}")]
    WorkloadTooLarge { requested: u64, limit: u64 },

    #[error("simulation exceeded {0} ms")]
    Timeout(u64),

    #[error("run cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SimError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        SimError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable kind for the presentation layer.
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::InvalidConfig { .. } => "invalid_config",
            SimError::InvalidStrike(_) => "invalid_strike",
            SimError::EmptySample => "empty_sample",
            SimError::NonFiniteSample { .. } => "non_finite_sample",
            SimError::WorkloadTooLarge { .. } => "workload_too_large",
            SimError::Timeout(_) => "timeout",
            SimError::Cancelled => "cancelled",
            SimError::Config(_) => "config",
            SimError::Internal(_) => "internal",
        }
    }

    /// Offending field, when the error is tied to one input.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            SimError::InvalidConfig { field, .. } => Some(*field),
            SimError::InvalidStrike(_) => Some("strike"),
            _ => None,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            SimError::InvalidConfig { .. }
            | SimError::InvalidStrike(_)
            | SimError::EmptySample
            | SimError::NonFiniteSample { .. } => 400,
            SimError::WorkloadTooLarge { .. } => 413,
            SimError::Timeout(_) | SimError::Cancelled => 503,
            SimError::Config(_) | SimError::Internal(_) => 500,
        }
    }
}

impl From<tokio::task::JoinError> for SimError {
    fn from(e: tokio::task::JoinError) -> Self {
        SimError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::invalid("request", e.to_string())
    }
}

pub type SimResult<T> = Result<T, SimError>;
