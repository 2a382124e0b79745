//! TOML config file plus env-only credentials. Validation collects every
//! problem it finds rather than failing on the first one, so a bad config
//! file reports everything wrong with it in one pass.

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

fn default_tick_size() -> f64 {
    0.003
}
fn default_dead_zone_bps() -> f64 {
    5.0
}
fn default_price_tolerance_bps() -> f64 {
    1.0
}
fn default_size_tolerance_pct() -> f64 {
    1.0
}
fn default_seen_tids_cap() -> usize {
    5000
}
fn default_safety_margin() -> i64 {
    500
}
fn default_base_url() -> String {
    "https://api.hyperliquid.xyz".to_string()
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_n_seeded_levels() -> usize {
    0
}
fn default_reconcile_every() -> u64 {
    20
}
fn default_allocation_ceiling() -> f64 {
    f64::INFINITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Spot pair name as it appears in the exchange's universe, e.g. `"PURR/USDC"`.
    pub coin: String,
    pub base: String,
    pub quote: String,

    /// First grid price. The grid is seeded from this directly — never
    /// from a live mid-price fetch.
    pub start_px: f64,
    pub n_orders: usize,
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,
    /// Fallback boundary level when the grid seeds with no resting asks.
    #[serde(default = "default_n_seeded_levels")]
    pub n_seeded_levels: usize,

    pub order_sz: f64,
    #[serde(default)]
    pub min_notional: f64,

    /// Token balance ceiling the quoting engine is allowed to use, independent
    /// of the account's actual balance. Defaults to +inf (no ceiling beyond
    /// the account balance itself).
    #[serde(default = "default_allocation_ceiling")]
    pub allocated_token: f64,
    #[serde(default = "default_allocation_ceiling")]
    pub allocated_usdc: f64,

    #[serde(default = "default_dead_zone_bps")]
    pub dead_zone_bps: f64,
    #[serde(default = "default_price_tolerance_bps")]
    pub price_tolerance_bps: f64,
    #[serde(default = "default_size_tolerance_pct")]
    pub size_tolerance_pct: f64,

    #[serde(default = "default_seen_tids_cap")]
    pub seen_tids_cap: usize,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: i64,
    #[serde(default = "default_reconcile_every")]
    pub reconcile_every: u64,

    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: EngineConfig = toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.coin.trim().is_empty() {
            errors.push("coin must not be empty".to_string());
        }
        if self.base.trim().is_empty() {
            errors.push("base must not be empty".to_string());
        }
        if self.quote.trim().is_empty() {
            errors.push("quote must not be empty".to_string());
        }
        if self.start_px <= 0.0 {
            errors.push("start_px must be positive".to_string());
        }
        if self.n_orders == 0 {
            errors.push("n_orders must be at least 1".to_string());
        }
        if self.tick_size <= 0.0 {
            errors.push("tick_size must be positive".to_string());
        }
        if self.order_sz <= 0.0 {
            errors.push("order_sz must be positive".to_string());
        }
        if self.allocated_token <= 0.0 {
            errors.push("allocated_token must be positive".to_string());
        }
        if self.allocated_usdc <= 0.0 {
            errors.push("allocated_usdc must be positive".to_string());
        }
        if self.min_notional < 0.0 {
            errors.push("min_notional must not be negative".to_string());
        }
        if self.dead_zone_bps < 0.0 {
            errors.push("dead_zone_bps must not be negative".to_string());
        }
        if self.price_tolerance_bps < 0.0 {
            errors.push("price_tolerance_bps must not be negative".to_string());
        }
        if self.size_tolerance_pct < 0.0 {
            errors.push("size_tolerance_pct must not be negative".to_string());
        }
        if self.seen_tids_cap == 0 {
            errors.push("seen_tids_cap must be at least 1".to_string());
        }
        if self.safety_margin < 0 {
            errors.push("safety_margin must not be negative".to_string());
        }
        if self.reconcile_every == 0 {
            errors.push("reconcile_every must be at least 1".to_string());
        }
        if self.base_url.trim().is_empty() {
            errors.push("base_url must not be empty".to_string());
        }
        if self.tick_interval_ms == 0 {
            errors.push("tick_interval_ms must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Loaded only from the environment, never from the TOML file — keeps
/// secrets out of any config file that might get committed or logged.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub private_key: String,
    pub wallet_address: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        let private_key = non_empty_env("MM_PRIVATE_KEY")?;
        let wallet_address = non_empty_env("MM_WALLET")?;
        Ok(Self { private_key, wallet_address })
    }
}

fn non_empty_env(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnv(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> EngineConfig {
        EngineConfig {
            coin: "PURR/USDC".to_string(),
            base: "PURR".to_string(),
            quote: "USDC".to_string(),
            start_px: 1.0,
            n_orders: 20,
            tick_size: 0.003,
            n_seeded_levels: 10,
            order_sz: 1.0,
            min_notional: 0.0,
            allocated_token: 1000.0,
            allocated_usdc: 1000.0,
            dead_zone_bps: 5.0,
            price_tolerance_bps: 1.0,
            size_tolerance_pct: 1.0,
            seen_tids_cap: 5000,
            safety_margin: 500,
            reconcile_every: 20,
            base_url: "https://api.hyperliquid.xyz".to_string(),
            tick_interval_ms: 1000,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validation_collects_every_error_not_just_first() {
        let mut cfg = valid();
        cfg.coin = String::new();
        cfg.n_orders = 0;
        cfg.order_sz = -1.0;
        let err = cfg.validate().unwrap_err();
        match err {
            ConfigError::Validation(errs) => assert_eq!(errs.len(), 3),
            _ => panic!("expected Validation"),
        }
    }

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let toml_str = r#"
            coin = "PURR/USDC"
            base = "PURR"
            quote = "USDC"
            start_px = 1.0
            n_orders = 20
            order_sz = 1.0
        "#;
        let cfg: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.tick_size, 0.003);
        assert_eq!(cfg.dead_zone_bps, 5.0);
        assert_eq!(cfg.base_url, "https://api.hyperliquid.xyz");
        assert_eq!(cfg.allocated_token, f64::INFINITY);
        assert_eq!(cfg.allocated_usdc, f64::INFINITY);
    }

    #[test]
    fn missing_env_credential_is_reported() {
        std::env::remove_var("MM_PRIVATE_KEY_TEST_UNSET");
        let result = non_empty_env("MM_PRIVATE_KEY_TEST_UNSET");
        assert!(matches!(result, Err(ConfigError::MissingEnv(_))));
    }
}
