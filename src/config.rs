use crate::errors::{SimError, SimResult};
use crate::sim::distribution::MAX_BINS;
use std::str::FromStr;

/// Host-service settings. The simulation core reads none of these; they cap
/// what a single request may ask of it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub max_paths: u64,
    /// Cap on `num_paths * num_steps` for one request.
    pub max_path_points: u64,
    pub simulation_timeout_ms: u64,
    pub default_num_bins: i64,
    /// Largest `num_bins` a request may ask for.
    pub max_num_bins: i64,
    pub max_dice_trials: u64,
    /// Full paths returned for line charts; the rest only feed the histogram.
    pub max_returned_paths: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 3001,
            max_paths: 100_000,
            max_path_points: 50_000_000,
            simulation_timeout_ms: 10_000,
            default_num_bins: 20,
            max_num_bins: 10_000,
            max_dice_trials: 10_000_000,
            max_returned_paths: 50,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> SimResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            server_port: env_parse("SERVER_PORT", defaults.server_port)?,
            max_paths: env_parse("MAX_PATHS", defaults.max_paths)?,
            max_path_points: env_parse("MAX_PATH_POINTS", defaults.max_path_points)?,
            simulation_timeout_ms: env_parse("SIMULATION_TIMEOUT_MS", defaults.simulation_timeout_ms)?,
            default_num_bins: env_parse("DEFAULT_NUM_BINS", defaults.default_num_bins)?,
            max_num_bins: env_parse("MAX_NUM_BINS", defaults.max_num_bins)?,
            max_dice_trials: env_parse("MAX_DICE_TRIALS", defaults.max_dice_trials)?,
            max_returned_paths: env_parse("MAX_RETURNED_PATHS", defaults.max_returned_paths)?,
        };

        if config.max_num_bins < 1 || config.max_num_bins as u64 > MAX_BINS as u64 {
            return Err(SimError::Config(format!("MAX_NUM_BINS: must be within 1..={MAX_BINS}")));
        }
        if !(1..=config.max_num_bins).contains(&config.default_num_bins) {
            return Err(SimError::Config("DEFAULT_NUM_BINS: must be within 1..=MAX_NUM_BINS".into()));
        }
        if config.max_dice_trials == 0 {
            return Err(SimError::Config("MAX_DICE_TRIALS: must be positive".into()));
        }
        if config.simulation_timeout_ms == 0 {
            return Err(SimError::Config("SIMULATION_TIMEOUT_MS: must be positive".into()));
        }
        Ok(config)
    }
}

fn env_parse<T>(key: &str, default: T) -> SimResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| SimError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_default_and_override() {
        assert_eq!(env_parse("OPTIONSIM_TEST_UNSET_VAR", 7u64).unwrap(), 7);

        std::env::set_var("OPTIONSIM_TEST_PORT", " 8080 ");
        assert_eq!(env_parse("OPTIONSIM_TEST_PORT", 1u16).unwrap(), 8080);

        std::env::set_var("OPTIONSIM_TEST_BAD", "lots");
        let err = env_parse("OPTIONSIM_TEST_BAD", 1u64).unwrap_err();
        assert!(matches!(err, SimError::Config(ref m) if m.starts_with("OPTIONSIM_TEST_BAD")));
    }
}
