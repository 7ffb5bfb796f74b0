use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LockError, Result};
use crate::store::RecordStore;

const CONFIG_KEY: &str = "locker.config";

/// Longest grace window a config may ask for.
pub const MAX_GRACE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockerConfig {
    /// How long a freshly unlocked app is exempt from re-prompting.
    pub grace_ttl_secs: u64,
    /// Failed attempts in one session before recovery is offered.
    pub recovery_offer_after: u32,
    pub min_pin_length: usize,
    pub max_pin_length: usize,
    pub min_pattern_length: usize,
    /// The locker's own identifier; never challenged.
    pub own_package_id: String,
    /// Any foreground identifier containing this marker is the challenge
    /// surface itself.
    pub challenge_surface_marker: String,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            grace_ttl_secs: 5,
            recovery_offer_after: 3,
            min_pin_length: 4,
            max_pin_length: 8,
            min_pattern_length: 4,
            own_package_id: "com.darklock.applock".into(),
            challenge_surface_marker: "LockScreenActivity".into(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl LockerConfig {
    pub fn grace_ttl(&self) -> Duration {
        Duration::from_secs(self.grace_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grace_ttl_secs == 0 || self.grace_ttl_secs > MAX_GRACE_TTL_SECS {
            return Err(LockError::Config(format!(
                "grace ttl must be between 1 and {MAX_GRACE_TTL_SECS} seconds"
            )));
        }
        if self.recovery_offer_after == 0 {
            return Err(LockError::Config(
                "recovery offer threshold must be at least 1".into(),
            ));
        }
        if self.min_pin_length == 0 || self.min_pin_length > self.max_pin_length {
            return Err(LockError::Config(format!(
                "pin length bounds invalid: {}..={}",
                self.min_pin_length, self.max_pin_length
            )));
        }
        if self.min_pattern_length < 2 || self.min_pattern_length > 9 {
            return Err(LockError::Config(
                "pattern length must be between 2 and 9".into(),
            ));
        }
        if self.own_package_id.trim().is_empty() {
            return Err(LockError::Config("own package id must be set".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(LockError::Config("sweep interval must be at least 1 second".into()));
        }
        Ok(())
    }
}

pub fn load_config(store: &dyn RecordStore) -> Result<LockerConfig> {
    if let Some(bytes) = store.get(CONFIG_KEY)? {
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Ok(LockerConfig::default())
    }
}

pub fn save_config(store: &dyn RecordStore, config: &LockerConfig) -> Result<()> {
    config.validate()?;
    let data = serde_json::to_vec(config)?;
    store.put(CONFIG_KEY, &data)?;
    Ok(())
}
