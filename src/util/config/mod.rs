//! Region layout configuration
//!
//! The multi-region strategy lays out its regions from a [`HeapConfig`].
//! The built-in layout mirrors a small embedded memory map (a fast
//! scratchpad, a DMA window and an uncached area); deployments with a
//! different map provide their own TOML file.
//!
//! # Usage
//!
//! ```
//! use heaplab::util::config::HeapConfig;
//!
//! let config = HeapConfig::from_toml(
//!     r#"
//!     [[regions]]
//!     name = "FAST"
//!     flags = 1
//!     size = 4096
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.regions.len(), 1);
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::heap::multi_region::MAX_REGIONS;
use crate::heap::RegionFlags;

/// Built-in region table used when no configuration is supplied.
static DEFAULT_REGIONS: Lazy<Vec<RegionSpec>> = Lazy::new(|| {
    vec![
        RegionSpec {
            name: "FAST".to_string(),
            flags: RegionFlags::FAST,
            size: 10240,
        },
        RegionSpec {
            name: "DMA".to_string(),
            flags: RegionFlags::DMA,
            size: 13312,
        },
        RegionSpec {
            name: "UNCACHED".to_string(),
            flags: RegionFlags::UNCACHED,
            size: 9216,
        },
    ]
});

/// One region in a layout: a name, a capability mask and a size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    #[serde(default)]
    pub flags: RegionFlags,
    pub size: usize,
}

/// A complete region layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapConfig {
    #[serde(default = "default_regions")]
    pub regions: Vec<RegionSpec>,
}

fn default_regions() -> Vec<RegionSpec> {
    DEFAULT_REGIONS.clone()
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            regions: DEFAULT_REGIONS.clone(),
        }
    }
}

impl HeapConfig {
    /// Parse a layout from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: HeapConfig = toml::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a layout from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Check the layout against the strategy's bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }
        if self.regions.len() > MAX_REGIONS {
            return Err(ConfigError::TooManyRegions {
                count: self.regions.len(),
            });
        }
        for spec in &self.regions {
            if spec.size == 0 {
                return Err(ConfigError::EmptyRegion {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Total capacity of the layout.
    pub fn total_size(&self) -> usize {
        self.regions.iter().map(|r| r.size).sum()
    }
}

/// Layout loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read layout file: {0}")]
    Io(std::io::Error),
    #[error("failed to parse layout: {0}")]
    Parse(toml::de::Error),
    #[error("a layout needs at least one region")]
    NoRegions,
    #[error("layout defines {count} regions, the strategy supports at most 8")]
    TooManyRegions { count: usize },
    #[error("region '{name}' has zero size")]
    EmptyRegion { name: String },
}
