//! Core types for rdb-bench.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::SweepConfig;
use crate::errors::BenchError;

/// A named storage-engine configuration: the label used in reports and the
/// estimator flags that select it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub label: String,
    pub flags: Vec<String>,
}

impl Variant {
    pub fn new(label: &str, flags: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Flags joined the way they appear on the command line and in raw dataset headers.
    pub fn flag_string(&self) -> String {
        self.flags.join(" ")
    }
}

/// Counts derived from a value size. Never stored on their own, always
/// recomputed through [`DerivedParams::for_value_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedParams {
    pub value_size: u64,
    pub op_count: u64,
    pub setup_count: u64,
}

impl DerivedParams {
    /// Both counts must be positive and fit in a `u64`.
    pub fn for_value_size(value_size: u64, config: &SweepConfig) -> Result<Self, BenchError> {
        let base = config
            .total_bytes
            .checked_div(value_size)
            .filter(|base| *base > 0)
            .ok_or_else(|| {
                BenchError::InvalidConfig(format!(
                    "value size {value_size} leaves no operations in a {} byte budget",
                    config.total_bytes
                ))
            })?;
        let scale = |multiplier: u64, name: &str| {
            base.checked_mul(multiplier)
                .filter(|count| *count > 0)
                .ok_or_else(|| {
                    BenchError::InvalidConfig(format!(
                        "{name} multiplier {multiplier} gives no valid count for value size {value_size}"
                    ))
                })
        };
        Ok(Self {
            value_size,
            op_count: scale(config.op_count_multiplier, "op-count")?,
            setup_count: scale(config.setup_count_multiplier, "setup-count")?,
        })
    }
}

/// Fully resolved input of a single estimator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialParams {
    pub metric: String,
    pub vm_kind: String,
    pub costs: String,
    pub home: PathBuf,
    pub setup_count: u64,
    pub value_size: u64,
    pub op_count: u64,
    pub flags: Vec<String>,
}

impl TrialParams {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--metric".to_string(),
            self.metric.clone(),
            "--vm-kind".to_string(),
            self.vm_kind.clone(),
            "--costs".to_string(),
            self.costs.clone(),
            "--home".to_string(),
            self.home.display().to_string(),
            "--rdb-setup-insertions".to_string(),
            self.setup_count.to_string(),
            "--rdb-value-size".to_string(),
            self.value_size.to_string(),
            "--rdb-op-count".to_string(),
            self.op_count.to_string(),
        ];
        args.extend(self.flags.iter().cloned());
        args
    }
}

/// Why a trial produced no measurement.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrialFailure {
    #[error("failed to spawn estimator: {reason}")]
    Spawn { reason: String },

    #[error("failed to collect estimator output: {reason}")]
    Wait { reason: String },

    #[error("estimator exited with {status}: {stderr_tail}")]
    Exit { status: String, stderr_tail: String },

    #[error("no gas measurement in estimator output")]
    NoMeasurement,

    #[error("timed out after {after_secs}s")]
    TimedOut { after_secs: u64 },

    /// A failure read back from a raw dataset file.
    #[error("{reason}")]
    Recorded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Measured(f64),
    Failed(TrialFailure),
}

impl TrialOutcome {
    pub fn measurement(&self) -> Option<f64> {
        match self {
            TrialOutcome::Measured(gas) => Some(*gas),
            TrialOutcome::Failed(_) => None,
        }
    }
}

/// One trial result, tagged with everything needed to group it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based position of the variant in the sweep config.
    pub variant_index: usize,
    pub value_size: u64,
    pub op_count: u64,
    pub repetition: u32,
    pub outcome: TrialOutcome,
}

/// What to do with a (op-count, value-size) key whose trials all failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Leave the key out of the grouped dataset.
    #[default]
    Omit,
    /// Emit the key with a missing-data marker.
    Mark,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Record the trial as failed and continue.
    #[default]
    Skip,
    /// Stop the sweep.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedRow {
    pub op_count: u64,
    pub value_size: u64,
    pub variant_index: usize,
    /// `None` marks a gap: every repetition for this key failed.
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedBlock {
    pub variant_index: usize,
    pub label: String,
    pub rows: Vec<GroupedRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupedDataset {
    pub blocks: Vec<GroupedBlock>,
}

impl GroupedDataset {
    pub fn row_count(&self) -> usize {
        self.blocks.iter().map(|b| b.rows.len()).sum()
    }

    /// Positions of the blocks holding at least one measured row, counting
    /// only rows up to `max_value_size` when it is given.
    pub fn plottable_blocks(&self, max_value_size: Option<u64>) -> Vec<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| {
                block.rows.iter().any(|row| {
                    row.mean.is_some() && max_value_size.is_none_or(|max| row.value_size <= max)
                })
            })
            .map(|(pos, _)| pos)
            .collect()
    }
}

/// summary.json - everything one run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: SweepConfig,
    pub raw_dataset: Option<PathBuf>,
    pub records: Vec<TrialRecord>,
    pub grouped: GroupedDataset,
}

impl SweepReport {
    pub fn measured_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.measurement().is_some())
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.records.len() - self.measured_count()
    }
}
