//! Trial runner: one estimator invocation, one measurement.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::config::SweepConfig;
use crate::types::{TrialFailure, TrialOutcome, TrialParams};

/// Token identifying the estimator's result line on stderr.
const GAS_TOKEN: &str = "gas";

/// Number of trailing stderr lines kept when the estimator exits non-zero.
const STDERR_TAIL_LINES: usize = 5;

/// Something that can turn a parameter set into a measurement.
pub trait Estimator {
    fn run_trial(&self, params: &TrialParams) -> impl Future<Output = TrialOutcome>;
}

/// Runs the estimator as a child process.
#[derive(Debug, Clone)]
pub struct CommandEstimator {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandEstimator {
    pub fn new(command: &[String], timeout: Option<Duration>) -> Option<Self> {
        let (program, leading_args) = command.split_first()?;
        Some(Self {
            program: PathBuf::from(program),
            leading_args: leading_args.to_vec(),
            timeout,
        })
    }

    pub fn from_config(config: &SweepConfig) -> Option<Self> {
        Self::new(&config.estimator, config.trial_timeout())
    }

    /// The full command line for `params`, for logs and dry runs.
    pub fn command_line(&self, params: &TrialParams) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.leading_args.iter().cloned());
        parts.extend(params.to_args());
        parts.join(" ")
    }
}

impl Estimator for CommandEstimator {
    async fn run_trial(&self, params: &TrialParams) -> TrialOutcome {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(params.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %self.command_line(params), "Spawning estimator");

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return TrialOutcome::Failed(TrialFailure::Spawn {
                    reason: e.to_string(),
                });
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    return TrialOutcome::Failed(TrialFailure::TimedOut {
                        after_secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait_with_output().await,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return TrialOutcome::Failed(TrialFailure::Wait {
                    reason: e.to_string(),
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return TrialOutcome::Failed(TrialFailure::Exit {
                status: output.status.to_string(),
                stderr_tail: stderr_tail(&stderr),
            });
        }

        match parse_gas_output(&stderr) {
            Some(gas) => TrialOutcome::Measured(gas),
            None => TrialOutcome::Failed(TrialFailure::NoMeasurement),
        }
    }
}

/// Finds the first line mentioning `gas` and reads its second field.
///
/// The estimator prints results such as `RocksDbReadValueByte 1_234_567 gas [...]`.
pub fn parse_gas_output(stderr: &str) -> Option<f64> {
    stderr
        .lines()
        .filter(|line| line.contains(GAS_TOKEN))
        .find_map(|line| line.split_whitespace().nth(1).and_then(parse_number))
}

/// Parses a number after removing digit separators and other formatting.
pub fn parse_number(field: &str) -> Option<f64> {
    let cleaned = strip_numeric_artifacts(field);
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

pub fn strip_numeric_artifacts(field: &str) -> String {
    field
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect()
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}
