use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ReconError;

/// Default bound on simultaneous TCP connect attempts against one target.
/// Kept low so a scan never turns into an accidental flood.
pub const DEFAULT_CONCURRENCY_CAP: usize = 50;
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SWEEP_SECS: u64 = 10;
pub const MAX_SWEEP_SECS: u64 = 86_400;
/// Longest a single echo waits for its reply; shortened further when a large
/// range needs several pool rounds inside the sweep window.
pub const DEFAULT_ECHO_TIMEOUT_MS: u64 = 1_000;
/// A /24 fits in one wave.
pub const DEFAULT_DISCOVERY_CAP: usize = 256;
pub const DEFAULT_DNS_TIMEOUT_MS: u64 = 2_000;
pub const MAX_CONCURRENCY: usize = 5_000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub concurrency_cap: usize,
    pub timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: DEFAULT_CONCURRENCY_CAP,
            timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
        }
    }
}

impl ScanConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub sweep_secs: u64,
    pub concurrency_cap: usize,
    pub echo_timeout_ms: u64,
    pub dns_timeout_ms: u64,
    /// Show the ticking progress bar while sweeping.
    pub progress: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sweep_secs: DEFAULT_SWEEP_SECS,
            concurrency_cap: DEFAULT_DISCOVERY_CAP,
            echo_timeout_ms: DEFAULT_ECHO_TIMEOUT_MS,
            dns_timeout_ms: DEFAULT_DNS_TIMEOUT_MS,
            progress: true,
        }
    }
}

impl DiscoveryConfig {
    pub fn sweep_duration(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }
}

/// Top-level configuration, built once and handed to the engines by value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ReconConfig {
    pub scan: ScanConfig,
    pub discovery: DiscoveryConfig,
}

impl ReconConfig {
    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        check_cap("scan.concurrency_cap", self.scan.concurrency_cap)?;
        check_cap("discovery.concurrency_cap", self.discovery.concurrency_cap)?;
        if self.scan.timeout_ms == 0 {
            return Err(ReconError::InvalidConfig("scan.timeout_ms must be > 0".into()));
        }
        if self.discovery.sweep_secs == 0 || self.discovery.sweep_secs > MAX_SWEEP_SECS {
            return Err(ReconError::InvalidConfig(format!(
                "discovery.sweep_secs must be within 1..={MAX_SWEEP_SECS}, got {}",
                self.discovery.sweep_secs
            )));
        }
        if self.discovery.echo_timeout_ms == 0 {
            return Err(ReconError::InvalidConfig(
                "discovery.echo_timeout_ms must be > 0".into(),
            ));
        }
        if self.discovery.dns_timeout_ms == 0 {
            return Err(ReconError::InvalidConfig(
                "discovery.dns_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn check_cap(name: &str, cap: usize) -> Result<(), ReconError> {
    if cap == 0 || cap > MAX_CONCURRENCY {
        return Err(ReconError::InvalidConfig(format!(
            "{name} must be within 1..={MAX_CONCURRENCY}, got {cap}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behaviour() {
        let c = ReconConfig::default();
        assert_eq!(c.scan.concurrency_cap, 50);
        assert_eq!(c.scan.dial_timeout(), Duration::from_secs(10));
        assert_eq!(c.discovery.sweep_duration(), Duration::from_secs(10));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: ReconConfig = serde_json::from_str(r#"{ "scan": { "concurrency_cap": 8 } }"#).unwrap();
        assert_eq!(c.scan.concurrency_cap, 8);
        assert_eq!(c.scan.timeout_ms, DEFAULT_DIAL_TIMEOUT_MS);
        assert_eq!(c.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn out_of_bounds_values_fail_validation() {
        let mut c = ReconConfig::default();
        c.scan.concurrency_cap = 0;
        assert!(c.validate().is_err());

        let mut c = ReconConfig::default();
        c.discovery.concurrency_cap = MAX_CONCURRENCY + 1;
        assert!(c.validate().is_err());

        let mut c = ReconConfig::default();
        c.discovery.sweep_secs = 0;
        assert!(c.validate().is_err());

        let mut c = ReconConfig::default();
        c.discovery.echo_timeout_ms = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn oversized_sweep_is_rejected() {
        let mut c = ReconConfig::default();
        c.discovery.sweep_secs = MAX_SWEEP_SECS;
        assert!(c.validate().is_ok());

        c.discovery.sweep_secs = u64::MAX;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, ReconError::InvalidConfig(_)));
        assert!(err.to_string().contains("sweep_secs"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = ReconConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
