//! Trial runner and sweep tests against shell stand-ins for the estimator.
#![cfg(unix)]

use rdb_bench::config::SweepConfig;
use rdb_bench::pipeline;
use rdb_bench::render::{FULL_RANGE_ARTIFACT, RenderOutcome};
use rdb_bench::trial::{CommandEstimator, Estimator};
use rdb_bench::types::{GapPolicy, TrialFailure, TrialOutcome, TrialParams};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Prints `<value size * 2> gas` on stderr, like the estimator's result line.
/// Fails for 500-byte values so gaps can be observed.
const FAKE_ESTIMATOR: &str = r#"
size=0
while [ $# -gt 0 ]; do
    case "$1" in
        --rdb-value-size) size="$2"; shift ;;
    esac
    shift
done
if [ "$size" = "500" ]; then
    echo "disk full" >&2
    exit 1
fi
echo "Finished estimation" >&2
echo "RocksDbReadValueByte $((size * 2)) gas [ 0.10ms]" >&2
"#;

fn shell(script: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        "fake-estimator".to_string(),
    ]
}

fn params(value_size: u64) -> TrialParams {
    TrialParams {
        metric: "time".to_string(),
        vm_kind: "wasmer2".to_string(),
        costs: "RocksDbReadValueByte".to_string(),
        home: PathBuf::from("/tmp/data"),
        setup_count: 1000,
        value_size,
        op_count: 100,
        flags: vec!["--rdb-block-cache".to_string()],
    }
}

#[tokio::test]
async fn measures_gas_from_stderr() {
    let estimator = CommandEstimator::new(&shell(FAKE_ESTIMATOR), None).unwrap();
    let outcome = estimator.run_trial(&params(1000)).await;
    assert_eq!(outcome, TrialOutcome::Measured(2000.0));
}

#[tokio::test]
async fn non_zero_exit_is_reported_with_stderr() {
    let estimator = CommandEstimator::new(&shell(FAKE_ESTIMATOR), None).unwrap();
    match estimator.run_trial(&params(500)).await {
        TrialOutcome::Failed(TrialFailure::Exit { stderr_tail, .. }) => {
            assert_eq!(stderr_tail, "disk full");
        }
        other => panic!("expected exit failure, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_gas_line_is_reported() {
    let estimator = CommandEstimator::new(&shell("echo done >&2"), None).unwrap();
    assert_eq!(
        estimator.run_trial(&params(1000)).await,
        TrialOutcome::Failed(TrialFailure::NoMeasurement)
    );
}

#[tokio::test]
async fn missing_program_is_a_spawn_failure() {
    let estimator =
        CommandEstimator::new(&["/nonexistent/estimator".to_string()], None).unwrap();
    assert!(matches!(
        estimator.run_trial(&params(1000)).await,
        TrialOutcome::Failed(TrialFailure::Spawn { .. })
    ));
}

#[tokio::test]
async fn hung_estimator_times_out() {
    let estimator =
        CommandEstimator::new(&shell("sleep 30"), Some(Duration::from_secs(1))).unwrap();
    let started = std::time::Instant::now();
    let outcome = estimator.run_trial(&params(1000)).await;
    assert_eq!(
        outcome,
        TrialOutcome::Failed(TrialFailure::TimedOut { after_secs: 1 })
    );
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn full_sweep_without_plotter() {
    let dir = TempDir::new().unwrap();
    let config = SweepConfig {
        estimator: shell(FAKE_ESTIMATOR),
        output_dir: dir.path().to_path_buf(),
        plotter: "rdb-bench-test-missing-plotter".to_string(),
        trial_timeout_secs: Some(60),
        ..Default::default()
    };
    let estimator = CommandEstimator::from_config(&config).unwrap();

    let output = pipeline::run(&config, &estimator).await.unwrap();
    assert!(matches!(output.render, RenderOutcome::Skipped { .. }));

    let report = &output.report;
    assert_eq!(report.records.len(), 120);
    // 500-byte trials fail for all 4 variants × 3 repetitions.
    assert_eq!(report.skipped_count(), 12);
    // The failed key is omitted by default: 4 × 9 rows.
    assert_eq!(report.grouped.row_count(), 36);
    for block in &report.grouped.blocks {
        assert!(block.rows.iter().all(|r| r.value_size != 500));
        for row in &block.rows {
            assert_eq!(row.mean, Some((row.value_size * 2) as f64));
        }
    }

    let raw_path = report.raw_dataset.clone().unwrap();
    assert!(raw_path.starts_with(dir.path()));
    let raw = fs::read_to_string(&raw_path).unwrap();
    let data_rows = raw
        .lines()
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count();
    let skipped_rows = raw.lines().filter(|l| l.starts_with("# skipped ")).count();
    let headers = raw.lines().filter(|l| l.starts_with("# --") || *l == "# ").count();
    assert_eq!(data_rows, 108);
    assert_eq!(skipped_rows, 12);
    assert_eq!(headers, 40);
    assert!(raw.starts_with(
        "# --rdb-block-cache --rdb-force-flush --rdb-force-compaction\n2000000 100 1 200\n"
    ));
    assert!(!dir.path().join(FULL_RANGE_ARTIFACT).exists());
}

#[tokio::test]
async fn gaps_can_be_marked() {
    let dir = TempDir::new().unwrap();
    let config = SweepConfig {
        estimator: shell(FAKE_ESTIMATOR),
        output_dir: dir.path().to_path_buf(),
        plotter: "rdb-bench-test-missing-plotter".to_string(),
        value_sizes: vec![100, 500],
        repetitions: 1,
        gap_policy: GapPolicy::Mark,
        ..Default::default()
    };
    let estimator = CommandEstimator::from_config(&config).unwrap();

    let output = pipeline::run(&config, &estimator).await.unwrap();
    assert_eq!(output.report.grouped.row_count(), 8);

    let raw_path = output.report.raw_dataset.unwrap();
    let grouped_path = config.grouped_dataset_path(Some(&raw_path));
    let grouped = fs::read_to_string(grouped_path).unwrap();
    assert!(grouped.contains("400000 500 2 ?\n"));
    assert!(grouped.contains("2000000 100 2 200\n"));
}

#[tokio::test]
async fn back_to_back_runs_write_separate_raw_datasets() {
    let dir = TempDir::new().unwrap();
    let config = SweepConfig {
        estimator: shell(FAKE_ESTIMATOR),
        output_dir: dir.path().to_path_buf(),
        plotter: "rdb-bench-test-missing-plotter".to_string(),
        value_sizes: vec![100],
        repetitions: 1,
        ..Default::default()
    };
    let estimator = CommandEstimator::from_config(&config).unwrap();

    let first = pipeline::run(&config, &estimator).await.unwrap();
    let second = pipeline::run(&config, &estimator).await.unwrap();

    let first_raw = first.report.raw_dataset.unwrap();
    let second_raw = second.report.raw_dataset.unwrap();
    assert_ne!(first_raw, second_raw);
    for raw_path in [&first_raw, &second_raw] {
        let raw = fs::read_to_string(raw_path).unwrap();
        let data_rows = raw
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .count();
        assert_eq!(data_rows, 4);
    }

    let reaggregated = pipeline::reaggregate(&config, &second_raw).await.unwrap();
    assert_eq!(reaggregated.report.records.len(), 4);
    assert!(reaggregated.report.records.iter().all(|r| r.repetition == 1));
}
