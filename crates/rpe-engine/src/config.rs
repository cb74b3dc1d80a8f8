//! # Engine Configuration
//!
//! [`EngineConfig`] loads from YAML (any missing key takes its default) and
//! can be overridden field by field from `RPE_*` environment variables.
//! Zero values for the lock timeout, sweep interval, run budget or batch
//! size are rejected at load.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rpe_ledger::PayoutPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-usage lock acquisition timeout.
    pub lock_timeout_ms: u64,
    /// Background sweeper tick.
    pub sweep_interval_secs: u64,
    /// Time budget of one sweeper run.
    pub sweep_max_run_secs: u64,
    /// Usages (or programs) fetched per batch.
    pub sweep_batch_size: usize,
    pub payout_policy: PayoutPolicy,
    /// How long a program may stay UnCompletable before it is expired.
    pub uncompletable_grace_days: u32,
    /// A referee must claim within this many minutes of onboarding.
    pub claim_onboarding_window_mins: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 250,
            sweep_interval_secs: 300,
            sweep_max_run_secs: 60,
            sweep_batch_size: 100,
            payout_policy: PayoutPolicy::AllOrNothing,
            uncompletable_grace_days: 14,
            claim_onboarding_window_mins: 10,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Defaults overridden by the process environment.
    ///
    /// Variables: `RPE_LOCK_TIMEOUT_MS`, `RPE_SWEEP_INTERVAL_SECS`,
    /// `RPE_SWEEP_MAX_RUN_SECS`, `RPE_SWEEP_BATCH_SIZE`,
    /// `RPE_PAYOUT_POLICY` (`all_or_nothing` | `referee_first_partial`),
    /// `RPE_UNCOMPLETABLE_GRACE_DAYS`, `RPE_CLAIM_ONBOARDING_WINDOW_MINS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`, then validate.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        override_parsed(&lookup, "RPE_LOCK_TIMEOUT_MS", &mut self.lock_timeout_ms)?;
        override_parsed(&lookup, "RPE_SWEEP_INTERVAL_SECS", &mut self.sweep_interval_secs)?;
        override_parsed(&lookup, "RPE_SWEEP_MAX_RUN_SECS", &mut self.sweep_max_run_secs)?;
        override_parsed(&lookup, "RPE_SWEEP_BATCH_SIZE", &mut self.sweep_batch_size)?;
        override_parsed(
            &lookup,
            "RPE_UNCOMPLETABLE_GRACE_DAYS",
            &mut self.uncompletable_grace_days,
        )?;
        override_parsed(
            &lookup,
            "RPE_CLAIM_ONBOARDING_WINDOW_MINS",
            &mut self.claim_onboarding_window_mins,
        )?;
        if let Some(value) = lookup("RPE_PAYOUT_POLICY") {
            self.payout_policy = match value.trim() {
                "all_or_nothing" => PayoutPolicy::AllOrNothing,
                "referee_first_partial" => PayoutPolicy::RefereeFirstPartial,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: "RPE_PAYOUT_POLICY".to_string(),
                        value,
                    })
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("lock_timeout_ms", self.lock_timeout_ms),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("sweep_max_run_secs", self.sweep_max_run_secs),
            ("sweep_batch_size", self.sweep_batch_size as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_max_run(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.sweep_max_run_secs).unwrap_or(i64::MAX / 1_000))
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(var) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        })?;
    }
    Ok(())
}
