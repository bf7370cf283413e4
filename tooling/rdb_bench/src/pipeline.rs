//! End-to-end flows: sweep → aggregate → render.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::aggregate::aggregate;
use crate::config::SweepConfig;
use crate::dataset::{RawDatasetWriter, read_raw_dataset};
use crate::errors::BenchError;
use crate::render::{RenderOutcome, ReportRenderer};
use crate::sweep::run_sweep;
use crate::trial::Estimator;
use crate::types::{SweepReport, TrialRecord};

#[derive(Debug)]
pub struct PipelineOutput {
    pub report: SweepReport,
    pub render: RenderOutcome,
}

/// Runs the full sweep, persisting the raw dataset, then aggregates and renders.
pub async fn run<E: Estimator>(
    config: &SweepConfig,
    estimator: &E,
) -> Result<PipelineOutput, BenchError> {
    config.validate()?;
    let started_at = Utc::now();
    let mut writer = RawDatasetWriter::create(config.raw_dataset_path(started_at))?;
    let raw_path = writer.path().to_path_buf();
    info!(
        raw = %writer.path().display(),
        trials = config.value_sizes.len() * config.variants.len() * config.repetitions as usize,
        "Starting sweep"
    );

    let records = run_sweep(config, estimator, Some(&mut writer)).await?;
    finish(config, started_at, Some(raw_path), records).await
}

/// Re-aggregates and renders an existing raw dataset without running trials.
pub async fn reaggregate(
    config: &SweepConfig,
    raw_path: &Path,
) -> Result<PipelineOutput, BenchError> {
    config.validate()?;
    let started_at = Utc::now();
    let records = read_raw_dataset(raw_path)?;
    if let Some(record) = records
        .iter()
        .find(|r| r.variant_index > config.variants.len())
    {
        return Err(BenchError::InvalidConfig(format!(
            "raw dataset references variant {} but only {} variants are configured",
            record.variant_index,
            config.variants.len()
        )));
    }
    info!(raw = %raw_path.display(), records = records.len(), "Loaded raw dataset");
    finish(config, started_at, Some(raw_path.to_path_buf()), records).await
}

async fn finish(
    config: &SweepConfig,
    started_at: DateTime<Utc>,
    raw_dataset: Option<PathBuf>,
    records: Vec<TrialRecord>,
) -> Result<PipelineOutput, BenchError> {
    let grouped = aggregate(&records, &config.variants, config.gap_policy);
    let grouped_path = config.grouped_dataset_path(raw_dataset.as_deref());
    let render = ReportRenderer::from_config(config)
        .render(&grouped, &grouped_path)
        .await?;

    let report = SweepReport {
        started_at,
        finished_at: Utc::now(),
        config: config.clone(),
        raw_dataset,
        records,
        grouped,
    };
    info!(
        measured = report.measured_count(),
        skipped = report.skipped_count(),
        grouped_rows = report.grouped.row_count(),
        "Sweep finished"
    );

    Ok(PipelineOutput { report, render })
}

pub fn write_summary(report: &SweepReport, path: &Path) -> Result<(), BenchError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}
