//! Sweep driver: value sizes × variants × repetitions.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::SweepConfig;
use crate::dataset::RawDatasetWriter;
use crate::errors::BenchError;
use crate::trial::{CommandEstimator, Estimator};
use crate::types::{TimeoutPolicy, TrialFailure, TrialOutcome, TrialParams, TrialRecord};

/// One trial the sweep will run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTrial {
    pub variant_index: usize,
    pub repetition: u32,
    pub params: TrialParams,
}

#[derive(Debug, Serialize)]
pub struct PlanEntry {
    pub variant_index: usize,
    pub label: String,
    pub repetition: u32,
    pub value_size: u64,
    pub op_count: u64,
    pub setup_count: u64,
    pub command: String,
}

/// Value-size-major, then variant, then repetition.
pub fn plan_sweep(config: &SweepConfig) -> Result<Vec<PlannedTrial>, BenchError> {
    let mut plan = Vec::with_capacity(
        config.value_sizes.len() * config.variants.len() * config.repetitions as usize,
    );
    for derived in config.derived_params()? {
        for (pos, variant) in config.variants.iter().enumerate() {
            let params = config.trial_params(&derived, variant);
            for repetition in 1..=config.repetitions {
                plan.push(PlannedTrial {
                    variant_index: pos + 1,
                    repetition,
                    params: params.clone(),
                });
            }
        }
    }
    Ok(plan)
}

/// Human-readable form of the plan, with the exact command of each trial.
pub fn describe_plan(
    config: &SweepConfig,
    estimator: &CommandEstimator,
) -> Result<Vec<PlanEntry>, BenchError> {
    let entries = plan_sweep(config)?
        .into_iter()
        .map(|trial| PlanEntry {
            variant_index: trial.variant_index,
            label: config.variants[trial.variant_index - 1].label.clone(),
            repetition: trial.repetition,
            value_size: trial.params.value_size,
            op_count: trial.params.op_count,
            setup_count: trial.params.setup_count,
            command: estimator.command_line(&trial.params),
        })
        .collect();
    Ok(entries)
}

/// Runs every planned trial sequentially and returns the tagged records.
///
/// When `raw` is given, each variant block header and each record is appended
/// to it as soon as it is known, so an interrupted sweep keeps its data.
pub async fn run_sweep<E: Estimator>(
    config: &SweepConfig,
    estimator: &E,
    mut raw: Option<&mut RawDatasetWriter>,
) -> Result<Vec<TrialRecord>, BenchError> {
    let plan = plan_sweep(config)?;
    let total = plan.len();
    let mut records = Vec::with_capacity(total);

    for (n, trial) in plan.into_iter().enumerate() {
        let variant = &config.variants[trial.variant_index - 1];
        if trial.repetition == 1 {
            if let Some(writer) = raw.as_deref_mut() {
                writer.begin_variant(variant)?;
            }
        }

        let outcome = estimator.run_trial(&trial.params).await;
        let record = TrialRecord {
            variant_index: trial.variant_index,
            value_size: trial.params.value_size,
            op_count: trial.params.op_count,
            repetition: trial.repetition,
            outcome,
        };

        if let Some(writer) = raw.as_deref_mut() {
            writer.append(&record)?;
        }

        match &record.outcome {
            TrialOutcome::Measured(gas) => info!(
                trial = n + 1,
                total,
                variant = %variant.label,
                value_size = record.value_size,
                repetition = record.repetition,
                gas,
                "Trial measured"
            ),
            TrialOutcome::Failed(failure) => {
                warn!(
                    trial = n + 1,
                    total,
                    variant = %variant.label,
                    value_size = record.value_size,
                    repetition = record.repetition,
                    %failure,
                    "Trial skipped"
                );
                if should_abort(config, failure) {
                    return Err(BenchError::SweepAborted {
                        value_size: record.value_size,
                        variant_index: record.variant_index,
                        repetition: record.repetition,
                        failure: failure.clone(),
                    });
                }
            }
        }

        records.push(record);
    }

    Ok(records)
}

fn should_abort(config: &SweepConfig, failure: &TrialFailure) -> bool {
    if config.fail_fast {
        return true;
    }
    matches!(failure, TrialFailure::TimedOut { .. }) && config.on_timeout == TimeoutPolicy::Abort
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Replays a fixed script of outcomes and remembers what it was asked.
    struct ScriptedEstimator {
        outcomes: RefCell<Vec<TrialOutcome>>,
        calls: RefCell<Vec<TrialParams>>,
    }

    impl ScriptedEstimator {
        fn new(mut outcomes: Vec<TrialOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: RefCell::new(outcomes),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Estimator for ScriptedEstimator {
        async fn run_trial(&self, params: &TrialParams) -> TrialOutcome {
            self.calls.borrow_mut().push(params.clone());
            self.outcomes
                .borrow_mut()
                .pop()
                .unwrap_or(TrialOutcome::Measured(1.0))
        }
    }

    fn small_config() -> SweepConfig {
        SweepConfig {
            value_sizes: vec![1000, 100],
            repetitions: 2,
            ..Default::default()
        }
    }

    #[test]
    fn plan_is_size_major_then_variant_then_repetition() {
        let plan = plan_sweep(&small_config()).unwrap();
        assert_eq!(plan.len(), 2 * 4 * 2);
        let order: Vec<_> = plan
            .iter()
            .take(5)
            .map(|t| (t.params.value_size, t.variant_index, t.repetition))
            .collect();
        assert_eq!(
            order,
            vec![(1000, 1, 1), (1000, 1, 2), (1000, 2, 1), (1000, 2, 2), (1000, 3, 1)]
        );
        assert_eq!(plan[8].params.value_size, 100);
        assert_eq!(plan[8].params.op_count, 2_000_000);
        assert_eq!(plan[8].params.setup_count, 20_000_000);
    }

    #[test]
    fn plan_carries_variant_flags() {
        let plan = plan_sweep(&small_config()).unwrap();
        assert_eq!(
            plan[0].params.flags,
            vec![
                "--rdb-block-cache",
                "--rdb-force-flush",
                "--rdb-force-compaction"
            ]
        );
        assert!(plan[6].params.flags.is_empty());
    }

    #[test]
    fn overflowing_counts_fail_planning() {
        let config = SweepConfig {
            op_count_multiplier: u64::MAX,
            ..small_config()
        };
        assert!(matches!(plan_sweep(&config), Err(BenchError::InvalidConfig(_))));
    }

    #[test]
    fn described_plan_names_labels_and_commands() {
        let config = small_config();
        let estimator = CommandEstimator::from_config(&config).unwrap();
        let entries = describe_plan(&config, &estimator).unwrap();
        assert_eq!(entries.len(), 16);
        assert_eq!(entries[2].label, "cache+default");
        assert!(entries[2].command.starts_with("cargo run --release"));
        assert!(entries[2].command.ends_with("--rdb-op-count 200000 --rdb-block-cache"));
    }

    #[tokio::test]
    async fn records_are_tagged_at_creation() {
        let config = small_config();
        let estimator = ScriptedEstimator::new(vec![
            TrialOutcome::Measured(10.0),
            TrialOutcome::Failed(TrialFailure::NoMeasurement),
        ]);
        let records = run_sweep(&config, &estimator, None).await.unwrap();
        assert_eq!(records.len(), 16);
        assert_eq!(estimator.calls.borrow().len(), 16);
        assert_eq!(records[0].outcome, TrialOutcome::Measured(10.0));
        assert_eq!(records[1].repetition, 2);
        assert_eq!(
            records[1].outcome,
            TrialOutcome::Failed(TrialFailure::NoMeasurement)
        );
        assert_eq!(records[15].variant_index, 4);
        assert_eq!(records[15].value_size, 100);
        assert_eq!(records[15].op_count, 2_000_000);
    }

    #[tokio::test]
    async fn fail_fast_aborts_on_first_failure() {
        let config = SweepConfig {
            fail_fast: true,
            ..small_config()
        };
        let estimator = ScriptedEstimator::new(vec![
            TrialOutcome::Measured(10.0),
            TrialOutcome::Measured(10.0),
            TrialOutcome::Failed(TrialFailure::NoMeasurement),
        ]);
        let err = run_sweep(&config, &estimator, None).await.unwrap_err();
        assert!(matches!(
            err,
            BenchError::SweepAborted {
                variant_index: 2,
                repetition: 1,
                ..
            }
        ));
        assert_eq!(estimator.calls.borrow().len(), 3);
    }

    #[tokio::test]
    async fn timeout_policy_decides_between_skip_and_abort() {
        let timed_out = || TrialOutcome::Failed(TrialFailure::TimedOut { after_secs: 5 });

        let skip = small_config();
        let estimator = ScriptedEstimator::new(vec![timed_out()]);
        let records = run_sweep(&skip, &estimator, None).await.unwrap();
        assert_eq!(records.len(), 16);

        let abort = SweepConfig {
            on_timeout: TimeoutPolicy::Abort,
            ..small_config()
        };
        let estimator = ScriptedEstimator::new(vec![timed_out()]);
        let err = run_sweep(&abort, &estimator, None).await.unwrap_err();
        assert_eq!(err.exit_code(), 40);
        assert_eq!(estimator.calls.borrow().len(), 1);
    }

    #[tokio::test]
    async fn non_timeout_failures_do_not_abort_under_abort_policy() {
        let config = SweepConfig {
            on_timeout: TimeoutPolicy::Abort,
            ..small_config()
        };
        let estimator =
            ScriptedEstimator::new(vec![TrialOutcome::Failed(TrialFailure::NoMeasurement)]);
        let records = run_sweep(&config, &estimator, None).await.unwrap();
        assert_eq!(records.len(), 16);
    }
}
