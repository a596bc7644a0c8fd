//! Configuration surface (§6) plus test/dev defaults.
//!
//! The library itself never reads the environment; only the `liquisensed`
//! binary calls [`Config::from_env`], after loading a `.env` file via
//! `dotenvy` if one is present. Everything else in this crate takes a
//! `Config` by reference or value.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set to a valid value: {1}")]
    Invalid(&'static str, String),
}

/// Every knob in §6's "Configuration surface", plus the per-I/O timeouts
/// and cycle deadline from §5 so the whole resource model lives in one
/// place.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub agent_id: String,
    pub observation_mode: bool,
    pub starting_treasury_usd: f64,
    pub cycle_interval_override_sec: Option<u64>,
    pub max_daily_cost_usd: f64,
    pub alert_thresholds_usd: Vec<f64>,
    pub memory_formation_threshold: f64,
    pub min_apr_for_memory: f64,
    pub min_volume_for_memory: f64,
    pub max_memories_per_cycle: usize,
    pub min_pattern_confidence: f64,
    pub working_memory_cap: usize,
    pub pool_profile_update_interval_sec: u64,

    // §5 concurrency & resource model
    pub cycle_deadline: Duration,
    pub external_read_timeout: Duration,
    pub llm_call_timeout: Duration,
    pub kv_op_timeout: Duration,
    pub doc_vector_op_timeout: Duration,
    pub cost_cas_max_retries: u32,
    pub correlate_max_pools: usize,

    // §4.2 FEEL thresholds. Described as "configurable" but not given
    // individual env names in §6's table, so they are carried here rather
    // than hardcoded in the stage itself.
    pub feel_desperate_runway_days: f64,
    pub feel_cautious_runway_days: f64,
    pub feel_stable_runway_days: f64,
    pub feel_desperate_treasury_floor_usd: f64,
}

impl Config {
    /// A fully-populated, ready-to-use default rather than requiring every
    /// caller to fill in every field.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            agent_id: "liquisense".to_string(),
            observation_mode: true,
            starting_treasury_usd: 100.0,
            cycle_interval_override_sec: None,
            max_daily_cost_usd: 30.0,
            alert_thresholds_usd: vec![5.0, 10.0, 20.0, 25.0],
            memory_formation_threshold: 0.7,
            min_apr_for_memory: 20.0,
            min_volume_for_memory: 100_000.0,
            max_memories_per_cycle: 50,
            min_pattern_confidence: 0.7,
            working_memory_cap: 10,
            pool_profile_update_interval_sec: 3600,
            cycle_deadline: Duration::from_secs(120),
            external_read_timeout: Duration::from_secs(15),
            llm_call_timeout: Duration::from_secs(30),
            kv_op_timeout: Duration::from_secs(5),
            doc_vector_op_timeout: Duration::from_secs(10),
            cost_cas_max_retries: 5,
            correlate_max_pools: 32,
            feel_desperate_runway_days: 7.0,
            feel_cautious_runway_days: 20.0,
            feel_stable_runway_days: 90.0,
            feel_desperate_treasury_floor_usd: 25.0,
        }
    }

    /// Reads every field from the environment, falling back to
    /// [`Config::defaults`] for anything unset. Only called by the
    /// `liquisensed` binary.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::defaults();
        let mut cfg = Self {
            agent_id: env_string("AGENT_ID", d.agent_id),
            observation_mode: env_bool("OBSERVATION_MODE", d.observation_mode)?,
            starting_treasury_usd: env_f64("STARTING_TREASURY_USD", d.starting_treasury_usd)?,
            cycle_interval_override_sec: env_opt_u64("CYCLE_INTERVAL_OVERRIDE_SEC")?,
            max_daily_cost_usd: env_f64("MAX_DAILY_COST_USD", d.max_daily_cost_usd)?,
            alert_thresholds_usd: env_f64_list("ALERT_THRESHOLDS_USD", d.alert_thresholds_usd)?,
            memory_formation_threshold: env_f64(
                "MEMORY_FORMATION_THRESHOLD",
                d.memory_formation_threshold,
            )?,
            min_apr_for_memory: env_f64("MIN_APR_FOR_MEMORY", d.min_apr_for_memory)?,
            min_volume_for_memory: env_f64("MIN_VOLUME_FOR_MEMORY", d.min_volume_for_memory)?,
            max_memories_per_cycle: env_usize(
                "MAX_MEMORIES_PER_CYCLE",
                d.max_memories_per_cycle,
            )?,
            min_pattern_confidence: env_f64("MIN_PATTERN_CONFIDENCE", d.min_pattern_confidence)?,
            working_memory_cap: env_usize("WORKING_MEMORY_CAP", d.working_memory_cap)?,
            pool_profile_update_interval_sec: env_u64(
                "POOL_PROFILE_UPDATE_INTERVAL_SEC",
                d.pool_profile_update_interval_sec,
            )?,
            ..d
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::Invalid("AGENT_ID", "must not be empty".into()));
        }
        if self.max_daily_cost_usd <= 0.0 {
            return Err(ConfigError::Invalid(
                "MAX_DAILY_COST_USD",
                self.max_daily_cost_usd.to_string(),
            ));
        }
        if self.starting_treasury_usd < 0.0 {
            return Err(ConfigError::Invalid(
                "STARTING_TREASURY_USD",
                self.starting_treasury_usd.to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

/// Parses `key` via `FromStr`, falling back to `default` when unset and
/// raising [`ConfigError::Invalid`] when set but unparsable.
fn env_parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
    }
}

fn env_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    env_parsed(key, default)
}

fn env_f64(key: &'static str, default: f64) -> Result<f64, ConfigError> {
    env_parsed(key, default)
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    env_parsed(key, default)
}

fn env_usize(key: &'static str, default: usize) -> Result<usize, ConfigError> {
    env_parsed(key, default)
}

fn env_opt_u64(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key, raw)),
    }
}

fn env_f64_list(key: &'static str, default: Vec<f64>) -> Result<Vec<f64>, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| ConfigError::Invalid(key, raw.clone()))
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = Config::defaults();
        assert_eq!(c.starting_treasury_usd, 100.0);
        assert_eq!(c.max_daily_cost_usd, 30.0);
        assert_eq!(c.alert_thresholds_usd, vec![5.0, 10.0, 20.0, 25.0]);
        assert_eq!(c.min_apr_for_memory, 20.0);
        assert_eq!(c.min_volume_for_memory, 100_000.0);
        assert_eq!(c.max_memories_per_cycle, 50);
        assert_eq!(c.min_pattern_confidence, 0.7);
        assert_eq!(c.working_memory_cap, 10);
        assert_eq!(c.pool_profile_update_interval_sec, 3600);
        assert!(c.observation_mode);
    }

    #[test]
    fn validate_rejects_non_positive_cap() {
        let mut c = Config::defaults();
        c.max_daily_cost_usd = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_treasury() {
        let mut c = Config::defaults();
        c.starting_treasury_usd = -1.0;
        assert!(c.validate().is_err());
    }
}
