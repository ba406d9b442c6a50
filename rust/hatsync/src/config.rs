//! Configuration for location capture and the sync walker.
//!
//! All config types deserialize from JSON with defaults for missing fields, so
//! the mobile layer can pass a partial object across the FFI boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HatError, Result};

/// Default sync walker period
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;
/// Default status refresh period
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 10;
/// Default number of samples per upload
pub const DEFAULT_BLOCK_SIZE: usize = 100;
/// Matches the platform's "hundred meters" accuracy preset
pub const DEFAULT_DESIRED_ACCURACY_METERS: f64 = 100.0;
/// Largest block the HAT accepts in one request
pub const MAX_BLOCK_SIZE: usize = 1000;

// ============================================================================
// Location Preferences
// ============================================================================

/// User-tunable location preferences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocationPreferences {
    /// Fixes with a larger accuracy radius are rejected (meters)
    pub desired_accuracy: f64,
    /// Minimum movement between accepted samples (meters).
    /// `None` leaves distance filtering to the platform.
    pub distance_filter: Option<f64>,
}

impl Default for LocationPreferences {
    fn default() -> Self {
        Self {
            desired_accuracy: DEFAULT_DESIRED_ACCURACY_METERS,
            distance_filter: None,
        }
    }
}

impl LocationPreferences {
    pub fn validate(&self) -> Result<()> {
        if !self.desired_accuracy.is_finite() || self.desired_accuracy <= 0.0 {
            return Err(HatError::config(format!(
                "desired accuracy must be positive, got {}",
                self.desired_accuracy
            )));
        }
        if let Some(filter) = self.distance_filter {
            if !filter.is_finite() || filter < 0.0 {
                return Err(HatError::config(format!(
                    "distance filter must be non-negative, got {}",
                    filter
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Exponential backoff between failed uploads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl BackoffPolicy {
    /// Delay before the next attempt after `consecutive_failures` failures.
    ///
    /// `base * 2^(n-1)`, capped at `max`. Zero failures means no delay.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_failures - 1).min(20);
        let secs = self.base_secs.saturating_mul(1u64 << exponent);
        Duration::from_secs(secs.min(self.max_secs))
    }
}

/// What happens to samples whose uploads keep failing.
///
/// The default retries forever at the tick cadence and never marks anything
/// as failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Failed attempts after which a sample becomes `Failed`
    pub max_attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
}

// ============================================================================
// Sync Config
// ============================================================================

/// Timers and batching for the sync walker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub sync_interval_secs: u64,
    pub status_interval_secs: u64,
    pub block_size: usize,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            status_interval_secs: DEFAULT_STATUS_INTERVAL_SECS,
            block_size: DEFAULT_BLOCK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Parse from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)
            .map_err(|e| HatError::config(format!("invalid sync config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(HatError::config("sync interval must be at least 1 second"));
        }
        if self.status_interval_secs == 0 {
            return Err(HatError::config("status interval must be at least 1 second"));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(HatError::config(format!(
                "block size must be within 1..={}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(HatError::config("max attempts must be at least 1"));
        }
        if let Some(backoff) = self.retry.backoff {
            if backoff.base_secs == 0 || backoff.max_secs < backoff.base_secs {
                return Err(HatError::config(
                    "backoff needs base >= 1s and max >= base",
                ));
            }
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

/// Where the user's HAT lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HatEndpoint {
    /// e.g. "alice.hubofallthings.net"
    pub domain: String,
    /// `false` only for an explicit `http://` address (local sandbox HATs)
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_secure() -> bool {
    true
}

impl HatEndpoint {
    pub fn new(domain: &str) -> Result<Self> {
        let trimmed = domain.trim();
        let secure = !trimmed.starts_with("http://");
        let domain = trimmed
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        if domain.is_empty() || domain.contains('/') || domain.contains(char::is_whitespace) {
            return Err(HatError::config(format!("invalid HAT domain '{}'", domain)));
        }
        Ok(Self {
            domain: domain.to_string(),
            secure,
        })
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval(), Duration::from_secs(10));
        assert_eq!(config.block_size, 100);
        assert_eq!(config.retry.max_attempts, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SyncConfig::from_json(r#"{"blockSize": 25}"#).unwrap();
        assert_eq!(config.block_size, 25);
        assert_eq!(config.sync_interval_secs, DEFAULT_SYNC_INTERVAL_SECS);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(SyncConfig::from_json(r#"{"blockSize": 0}"#).is_err());
        assert!(SyncConfig::from_json(r#"{"syncIntervalSecs": 0}"#).is_err());
        assert!(SyncConfig::from_json(r#"{"retry": {"maxAttempts": 0}}"#).is_err());
        assert!(SyncConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = BackoffPolicy {
            base_secs: 10,
            max_secs: 60,
        };
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(1), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(20));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(40));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(100), Duration::from_secs(60));
    }

    #[test]
    fn test_preferences_validation() {
        assert!(LocationPreferences::default().validate().is_ok());
        let bad = LocationPreferences {
            desired_accuracy: -1.0,
            distance_filter: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_endpoint_normalizes_domain() {
        let endpoint = HatEndpoint::new("https://alice.hubofallthings.net/").unwrap();
        assert_eq!(endpoint.domain, "alice.hubofallthings.net");
        assert_eq!(endpoint.base_url(), "https://alice.hubofallthings.net");
        assert!(HatEndpoint::new("").is_err());
        assert!(HatEndpoint::new("alice.hat/api").is_err());
    }

    #[test]
    fn test_endpoint_keeps_explicit_http() {
        let endpoint = HatEndpoint::new("http://127.0.0.1:9000").unwrap();
        assert!(!endpoint.secure);
        assert_eq!(endpoint.base_url(), "http://127.0.0.1:9000");
        assert!(HatEndpoint::new("alice.hubofallthings.net").unwrap().secure);
    }
}
