//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/carbon.sqlite"
//!
//! [provider]
//! base_url = "https://factors.example.com/v1"
//! api_key_env = "FACTOR_API_KEY"
//!
//! [quota]
//! monthly_limit = 1000
//!
//! [[defaults]]
//! activity_type = "purchased_electricity"
//! region = "PT"
//! value = "0.161"
//! source = "regional average"
//! source_year = 2023
//! ```
//!
//! Only `[db]` is required. Without `provider.base_url` the engine runs
//! offline on cached and default factors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use carbon_ledger_core::engine::{DefaultFactor, DefaultFactors};
use carbon_ledger_core::factor::GasBreakdown;
use carbon_ledger_core::models::ActivityType;
use carbon_ledger_core::provider::RetryPolicy;
use carbon_ledger_core::units::UnitConverter;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub defaults: Vec<DefaultFactorConfig>,
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_api_key_env() -> String {
    "FACTOR_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_ms() -> Vec<u64> {
    vec![250, 1000]
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Bearer token from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_monthly_limit")]
    pub monthly_limit: u64,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            monthly_limit: default_monthly_limit(),
            window_days: default_window_days(),
        }
    }
}

fn default_monthly_limit() -> u64 {
    1000
}
fn default_window_days() -> i64 {
    30
}

impl QuotaConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(self.window_days)
    }
}

/// A `[[defaults]]` entry.
#[derive(Debug, Deserialize, Clone)]
pub struct DefaultFactorConfig {
    pub activity_type: ActivityType,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub value: Decimal,
    pub source: String,
    pub source_year: i32,
    /// Validated on parse: non-negative proportions summing to 1.0.
    #[serde(default)]
    pub gas_breakdown: Option<GasBreakdown>,
}

/// A `[[units]]` entry: `1 from = factor × to`.
#[derive(Debug, Deserialize, Clone)]
pub struct UnitConfig {
    pub from: String,
    pub to: String,
    pub factor: Decimal,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl Config {
    /// Built-in conversions plus every `[[units]]` entry.
    pub fn unit_converter(&self) -> Result<UnitConverter> {
        let mut units = UnitConverter::with_defaults();
        for u in &self.units {
            units
                .register(&u.from, &u.to, u.factor, u.subtype.as_deref())
                .with_context(|| format!("invalid [[units]] entry {} → {}", u.from, u.to))?;
        }
        Ok(units)
    }

    pub fn default_factors(&self) -> DefaultFactors {
        self.defaults
            .iter()
            .map(|d| {
                let factor = DefaultFactor::new(
                    d.activity_type,
                    d.subtype.as_deref(),
                    d.region.as_deref(),
                    d.value,
                    &d.source,
                    d.source_year,
                );
                match &d.gas_breakdown {
                    Some(b) => factor.with_gas_breakdown(b.clone()),
                    None => factor,
                }
            })
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate provider
    if config.provider.timeout_secs == 0 {
        anyhow::bail!("provider.timeout_secs must be > 0");
    }
    if config.provider.max_retries > 5 {
        anyhow::bail!("provider.max_retries must be <= 5");
    }
    if config.provider.max_retries > 0 && config.provider.backoff_ms.is_empty() {
        anyhow::bail!("provider.backoff_ms must not be empty when max_retries > 0");
    }
    if let Some(url) = &config.provider.base_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("provider.base_url must be an http(s) URL, got '{}'", url);
        }
    }

    // Validate quota
    if config.quota.window_days <= 0 {
        anyhow::bail!("quota.window_days must be > 0");
    }

    // Validate defaults
    for d in &config.defaults {
        let expected = match d.activity_type.sign_class() {
            carbon_ledger_core::models::SignClass::Avoidance => d.value <= Decimal::ZERO,
            carbon_ledger_core::models::SignClass::Emitting => d.value >= Decimal::ZERO,
        };
        if !expected {
            anyhow::bail!(
                "default factor {} for {} has the wrong sign",
                d.value,
                d.activity_type
            );
        }
    }

    config.unit_converter()?;

    Ok(config)
}
