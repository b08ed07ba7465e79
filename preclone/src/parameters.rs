//! Assembler and writer parameters, and their TOML configuration.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum quality of consensus bases.
pub const MAX_CONSENSUS_QUALITY: u8 = 45;

/// Filtering of consensuses built inside one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParameters {
    /// Consensuses built from fewer records are dropped.
    pub min_records_per_consensus: usize,
    /// Consensuses built from a smaller share of the group input are dropped.
    pub min_record_share_per_consensus: f64,
    /// Maximal number of consensuses per group, 0 for no limit.
    pub max_consensuses: usize,
    pub max_quality: u8,
}

impl Default for ConsensusParameters {
    fn default() -> Self {
        ConsensusParameters {
            min_records_per_consensus: 1,
            min_record_share_per_consensus: 0.01,
            max_consensuses: 0,
            max_quality: MAX_CONSENSUS_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreCloneAssemblerParameters {
    pub consensus: ConsensusParameters,
    /// Only pre-clones having at least this share among the records with the same tag
    /// suffix are kept. Used to decontaminate cell level assembly with molecular barcodes.
    pub min_tag_suffix_share: f64,
}

impl PreCloneAssemblerParameters {
    /// Built-in presets for grouping by cell (`by_cell = true`) or by molecule.
    pub fn default_for(by_cell: bool) -> Self {
        if by_cell {
            PreCloneAssemblerParameters {
                consensus: ConsensusParameters {
                    min_record_share_per_consensus: 0.01,
                    max_consensuses: 0,
                    ..ConsensusParameters::default()
                },
                min_tag_suffix_share: 0.8,
            }
        } else {
            PreCloneAssemblerParameters {
                consensus: ConsensusParameters {
                    min_record_share_per_consensus: 0.2,
                    max_consensuses: 3,
                    ..ConsensusParameters::default()
                },
                min_tag_suffix_share: 0.0,
            }
        }
    }
}

impl Default for PreCloneAssemblerParameters {
    fn default() -> Self {
        Self::default_for(false)
    }
}

/// 256 MiB
const DEFAULT_SORT_MEMORY: u64 = 1 << 28;
const LARGE_MEMORY_THRESHOLD: u64 = 10_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterParameters {
    /// Memory available to the process, in bytes. Unset uses the fixed default budget.
    pub max_memory: Option<u64>,
    /// Capacity of the channel feeding the alignment sort stage.
    pub alignment_buffer_size: usize,
    /// Capacity of the channel feeding the pre-clone sort stage.
    pub clone_buffer_size: usize,
    pub records_per_block: usize,
    /// Directory for the temporary sort files, the system temp dir if unset.
    pub spill_dir: Option<PathBuf>,
    pub spill_prefix: String,
}

impl Default for WriterParameters {
    fn default() -> Self {
        WriterParameters {
            max_memory: None,
            alignment_buffer_size: 1 << 14,
            clone_buffer_size: 1 << 10,
            records_per_block: 1024,
            spill_dir: None,
            spill_prefix: "preclone.".to_string(),
        }
    }
}

impl WriterParameters {
    /// Memory budget of each sort stage: an eighth of the available memory on hosts
    /// with more than 10 GB, 256 MiB otherwise.
    pub fn sort_memory_budget(&self) -> u64 {
        match self.max_memory {
            Some(max) if max > LARGE_MEMORY_THRESHOLD => max / 8,
            _ => DEFAULT_SORT_MEMORY,
        }
    }
}

/// Top level configuration file.
///
/// ```toml
/// [assembler]
/// min_tag_suffix_share = 0.8
///
/// [assembler.consensus]
/// max_consensuses = 0
///
/// [writer]
/// max_memory = 34359738368
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreCloneConfig {
    pub assembler: PreCloneAssemblerParameters,
    pub writer: WriterParameters,
}

impl PreCloneConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load the configuration, falling back to defaults if `path` does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "could not find {}, falling back to default pre-clone parameters",
                path.display()
            );
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        let config = Self::from_toml_str(&s).with_context(|| path.display().to_string())?;
        if config.assembler != PreCloneAssemblerParameters::default() {
            warn!("using non-default assembler parameters: {:?}", config.assembler);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_presets() {
        let by_cell = PreCloneAssemblerParameters::default_for(true);
        assert_eq!(by_cell.min_tag_suffix_share, 0.8);
        assert_eq!(by_cell.consensus.max_consensuses, 0);
        let by_molecule = PreCloneAssemblerParameters::default_for(false);
        assert_eq!(by_molecule.min_tag_suffix_share, 0.0);
        assert_eq!(by_molecule.consensus.max_consensuses, 3);
    }

    #[test]
    fn test_memory_budget() {
        let mut params = WriterParameters::default();
        assert_eq!(params.sort_memory_budget(), 1 << 28);
        params.max_memory = Some(8_000_000_000);
        assert_eq!(params.sort_memory_budget(), 1 << 28);
        params.max_memory = Some(32_000_000_000);
        assert_eq!(params.sort_memory_budget(), 4_000_000_000);
    }

    #[test]
    fn test_partial_toml() -> Result<()> {
        let config = PreCloneConfig::from_toml_str(
            r#"
            [assembler]
            min_tag_suffix_share = 0.5

            [writer]
            records_per_block = 16
            "#,
        )?;
        assert_eq!(config.assembler.min_tag_suffix_share, 0.5);
        assert_eq!(
            config.assembler.consensus,
            PreCloneAssemblerParameters::default().consensus
        );
        assert_eq!(config.writer.records_per_block, 16);
        assert_eq!(config.writer.alignment_buffer_size, 1 << 14);
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = PreCloneConfig::load(&dir.path().join("missing.toml"))?;
        assert_eq!(config, PreCloneConfig::default());
        Ok(())
    }
}
