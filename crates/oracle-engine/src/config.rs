use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

use demand_core::{Address, ArbiterAddresses, ArbiterRegistry, MAX_DEMAND_DEPTH};

use crate::engine::OracleEngine;
use crate::filters::ArbitrateFilters;
use crate::ledger::Ledger;
use crate::{OracleError, Result};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// OracleConfig
// ---------------------------------------------------------------------------

/// On-disk settings for an oracle process.
///
/// ```yaml
/// version: 1
/// oracle: "0x0a0a…"
/// trusted_oracle_arbiter: "0xc0c0…"
/// polling_interval_ms: 1000
/// filters:
///   skip_already_arbitrated: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Account the oracle signs as. Checked against the ledger when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle: Option<Address>,
    pub trusted_oracle_arbiter: Address,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_max_demand_depth")]
    pub max_demand_depth: usize,
    /// Deployed built-in arbiters, registered for escrow demand parsing.
    #[serde(default)]
    pub arbiters: ArbiterAddresses,
    #[serde(default)]
    pub filters: ArbitrateFilters,
}

fn default_version() -> u32 {
    1
}

fn default_polling_interval_ms() -> u64 {
    1000
}

fn default_max_demand_depth() -> usize {
    MAX_DEMAND_DEPTH
}

impl OracleConfig {
    pub fn new(trusted_oracle_arbiter: Address) -> Self {
        Self {
            version: 1,
            oracle: None,
            trusted_oracle_arbiter,
            polling_interval_ms: default_polling_interval_ms(),
            max_demand_depth: default_max_demand_depth(),
            arbiters: ArbiterAddresses::default(),
            filters: ArbitrateFilters::default(),
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(OracleError::Config(format!(
                "no config at {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: OracleConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        atomic_write(path, data.as_bytes())
    }

    /// Registry with the configured built-in arbiters and depth bound.
    pub fn registry(&self) -> Result<ArbiterRegistry> {
        let mut arbiters = self.arbiters.clone();
        arbiters
            .trusted_oracle_arbiter
            .get_or_insert(self.trusted_oracle_arbiter);
        Ok(ArbiterRegistry::with_builtin(&arbiters)?.with_max_depth(self.max_demand_depth))
    }

    /// Build an engine for `ledger`, refusing a ledger account other than `oracle`.
    pub fn engine<L>(&self, ledger: Arc<L>) -> Result<OracleEngine<L>>
    where
        L: Ledger + ?Sized + 'static,
    {
        if let Some(oracle) = self.oracle {
            let account = ledger.account();
            if account != oracle {
                return Err(OracleError::Config(format!(
                    "ledger signs as {account}, config names oracle {oracle}"
                )));
            }
        }
        Ok(OracleEngine::new(ledger, self.trusted_oracle_arbiter)
            .with_registry(self.registry()?)
            .with_polling_interval(self.polling_interval()))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let f = &self.filters;

        if self.polling_interval_ms == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "polling_interval_ms is 0; pull-only transports would spin".to_string(),
            });
        }

        if self.max_demand_depth == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "max_demand_depth is 0; no demand can be parsed".to_string(),
            });
        } else if self.max_demand_depth > MAX_DEMAND_DEPTH {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "max_demand_depth={} is above the default of {MAX_DEMAND_DEPTH}",
                    self.max_demand_depth
                ),
            });
        }

        if let (Some(min), Some(max)) = (f.min_time, f.max_time) {
            if min > max {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("filters.min_time {min} is after max_time {max}; nothing matches"),
                });
            }
        }

        if let (Some(min), Some(max)) = (f.min_age, f.max_age) {
            if min > max {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("filters.min_age {min} exceeds max_age {max}; nothing matches"),
                });
            }
        }

        if let (Some(from), Some(to)) = (f.from_block, f.to_block) {
            if from > to {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("filters.from_block {from} is after to_block {to}"),
                });
            }
        }

        if let Some(attester) = f.specific_attester {
            if f.exclude_attesters.contains(&attester) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "attester {attester} is both required and excluded; nothing matches"
                    ),
                });
            }
        }

        warnings
    }
}

/// Write via a tempfile in the same directory, then rename over `path`.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
