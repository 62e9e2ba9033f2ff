//! Producer configuration, loadable from YAML.

use std::path::Path;

use hg_core::{HgError, Real};
use hg_graph::{CacheSizes, EntityCounts};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::factory::FactoryKind;
use crate::source::SyntheticSourceConfig;

/// When the producer starts evicting released graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BudgetPolicy {
    /// Never evict on budget; only `clear()` frees graphs.
    Unbounded,
    /// Nodes + curves + areas across all resident graphs.
    TotalEntities { max: usize },
    /// Separate limit per entity kind; any kind over its limit triggers eviction.
    PerKind {
        nodes: usize,
        curves: usize,
        areas: usize,
    },
}

impl BudgetPolicy {
    /// True if `resident` is over this budget.
    pub fn is_exceeded(&self, resident: &EntityCounts) -> bool {
        match *self {
            BudgetPolicy::Unbounded => false,
            BudgetPolicy::TotalEntities { max } => resident.total() > max,
            BudgetPolicy::PerKind {
                nodes,
                curves,
                areas,
            } => resident.exceeds(&EntityCounts::new(nodes, curves, areas)),
        }
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        BudgetPolicy::TotalEntities { max: 64 * 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Per-graph store capacities handed to the factory.
    pub cache_sizes: CacheSizes,
    /// Global budget across resident graphs.
    pub budget: BudgetPolicy,
    /// Threads in the build pool.
    pub build_threads: usize,
    /// Side length of the level-0 tile in world units.
    pub root_size: Real,
    pub factory: FactoryKind,
    pub source: SyntheticSourceConfig,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            cache_sizes: CacheSizes {
                node_cache_size: 1024,
                curve_cache_size: 512,
                area_cache_size: 64,
            },
            budget: BudgetPolicy::default(),
            build_threads: 2,
            root_size: 100_000.0,
            factory: FactoryKind::default(),
            source: SyntheticSourceConfig::default(),
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache_sizes.validate()?;
        if self.build_threads == 0 {
            return Err(HgError::InvalidArg {
                what: "build_threads must be positive",
            }
            .into());
        }
        if !(self.root_size.is_finite() && self.root_size > 0.0) {
            return Err(HgError::InvalidArg {
                what: "root_size must be positive",
            }
            .into());
        }
        self.source.validate()?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ProducerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

pub fn load_yaml(path: &Path) -> Result<ProducerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    ProducerConfig::from_yaml_str(&content)
}
