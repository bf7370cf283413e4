//! Sweep configuration. Defaults reproduce the reference RocksDB read sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::BenchError;
use crate::types::{DerivedParams, GapPolicy, TimeoutPolicy, TrialParams, Variant};

pub const DEFAULT_VALUE_SIZES: [u64; 10] =
    [100, 500, 1000, 2000, 4000, 6000, 8000, 16000, 32000, 64000];

pub const DEFAULT_TOTAL_BYTES: u64 = 2_000_000;
pub const DEFAULT_OP_COUNT_MULTIPLIER: u64 = 100;
pub const DEFAULT_SETUP_COUNT_MULTIPLIER: u64 = 1000;
pub const DEFAULT_REPETITIONS: u32 = 3;
pub const DEFAULT_TRIAL_TIMEOUT_SECS: u64 = 30 * 60;

pub const RAW_DATASET_PREFIX: &str = "rocksdb_read_benchmark";

pub fn default_variants() -> Vec<Variant> {
    vec![
        Variant::new(
            "cache+flush+compact",
            &[
                "--rdb-block-cache",
                "--rdb-force-flush",
                "--rdb-force-compaction",
            ],
        ),
        Variant::new("cache+default", &["--rdb-block-cache"]),
        Variant::new(
            "nocache+flush+compaction",
            &["--rdb-force-flush", "--rdb-force-compaction"],
        ),
        Variant::new("nocache+default", &[]),
    ]
}

fn default_estimator() -> Vec<String> {
    [
        "cargo",
        "run",
        "--release",
        "-p",
        "runtime-params-estimator",
        "--features",
        "required",
        "--",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Program and leading arguments used to launch the estimator.
    pub estimator: Vec<String>,
    pub metric: String,
    pub vm_kind: String,
    pub costs: String,
    pub home: PathBuf,
    pub value_sizes: Vec<u64>,
    pub variants: Vec<Variant>,
    pub repetitions: u32,
    pub total_bytes: u64,
    pub op_count_multiplier: u64,
    pub setup_count_multiplier: u64,
    /// `None` disables the per-trial timeout.
    pub trial_timeout_secs: Option<u64>,
    pub on_timeout: TimeoutPolicy,
    pub fail_fast: bool,
    pub gap_policy: GapPolicy,
    pub output_dir: PathBuf,
    pub plotter: String,
    pub keep_grouped: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            estimator: default_estimator(),
            metric: "time".to_string(),
            vm_kind: "wasmer2".to_string(),
            costs: "RocksDbReadValueByte".to_string(),
            home: PathBuf::from("/tmp/data"),
            value_sizes: DEFAULT_VALUE_SIZES.to_vec(),
            variants: default_variants(),
            repetitions: DEFAULT_REPETITIONS,
            total_bytes: DEFAULT_TOTAL_BYTES,
            op_count_multiplier: DEFAULT_OP_COUNT_MULTIPLIER,
            setup_count_multiplier: DEFAULT_SETUP_COUNT_MULTIPLIER,
            trial_timeout_secs: Some(DEFAULT_TRIAL_TIMEOUT_SECS),
            on_timeout: TimeoutPolicy::default(),
            fail_fast: false,
            gap_policy: GapPolicy::default(),
            output_dir: PathBuf::from("."),
            plotter: "gnuplot".to_string(),
            keep_grouped: false,
        }
    }
}

impl SweepConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, BenchError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            BenchError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: SweepConfig = serde_json::from_str(&data)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.estimator.is_empty() {
            return Err(BenchError::InvalidConfig(
                "estimator command is empty".to_string(),
            ));
        }
        if self.repetitions == 0 {
            return Err(BenchError::InvalidConfig(
                "repetitions must be at least 1".to_string(),
            ));
        }
        if self.value_sizes.is_empty() {
            return Err(BenchError::InvalidConfig(
                "no value sizes to sweep".to_string(),
            ));
        }
        let mut seen_sizes = HashSet::new();
        for &size in &self.value_sizes {
            if size == 0 {
                return Err(BenchError::InvalidConfig(
                    "value sizes must be positive".to_string(),
                ));
            }
            if !seen_sizes.insert(size) {
                return Err(BenchError::InvalidConfig(format!(
                    "duplicate value size {size}"
                )));
            }
        }
        self.derived_params()?;
        if self.variants.is_empty() {
            return Err(BenchError::InvalidConfig("no variants to sweep".to_string()));
        }
        let mut seen_labels = HashSet::new();
        for variant in &self.variants {
            // Labels become gnuplot column headers, one token per block.
            if variant.label.is_empty()
                || variant.label.starts_with('#')
                || variant.label.chars().any(char::is_whitespace)
            {
                return Err(BenchError::InvalidConfig(format!(
                    "variant label '{}' must be a single non-comment token",
                    variant.label
                )));
            }
            if !seen_labels.insert(variant.label.as_str()) {
                return Err(BenchError::InvalidConfig(format!(
                    "duplicate variant label '{}'",
                    variant.label
                )));
            }
        }
        if self.trial_timeout_secs == Some(0) {
            return Err(BenchError::InvalidConfig(
                "trial timeout must be positive; omit it to disable".to_string(),
            ));
        }
        Ok(())
    }

    pub fn trial_timeout(&self) -> Option<Duration> {
        self.trial_timeout_secs.map(Duration::from_secs)
    }

    pub fn derived_params(&self) -> Result<Vec<DerivedParams>, BenchError> {
        self.value_sizes
            .iter()
            .map(|&size| DerivedParams::for_value_size(size, self))
            .collect()
    }

    pub fn trial_params(&self, derived: &DerivedParams, variant: &Variant) -> TrialParams {
        TrialParams {
            metric: self.metric.clone(),
            vm_kind: self.vm_kind.clone(),
            costs: self.costs.clone(),
            home: self.home.clone(),
            setup_count: derived.setup_count,
            value_size: derived.value_size,
            op_count: derived.op_count,
            flags: variant.flags.clone(),
        }
    }

    /// Timestamped raw dataset path inside the output directory.
    pub fn raw_dataset_path(&self, started_at: DateTime<Utc>) -> PathBuf {
        self.output_dir.join(format!(
            "{RAW_DATASET_PREFIX}_{}.dat",
            started_at.format("%Y%m%dT%H%M%S%.3fZ")
        ))
    }

    /// The grouped dataset lives next to the raw one it was computed from.
    pub fn grouped_dataset_path(&self, raw: Option<&Path>) -> PathBuf {
        match raw.and_then(|p| p.file_stem()) {
            Some(stem) => self
                .output_dir
                .join(format!("{}.grouped.dat", stem.to_string_lossy())),
            None => self
                .output_dir
                .join(format!("{RAW_DATASET_PREFIX}.grouped.dat")),
        }
    }
}
