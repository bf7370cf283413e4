//! Error types for rdb-bench.

use thiserror::Error;

use crate::types::TrialFailure;

#[derive(Debug, Error)]
pub enum BenchError {
    // Input errors (exit code 10)
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("malformed raw dataset row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    // Execution errors (exit code 40)
    #[error(
        "sweep aborted at value size {value_size}, variant {variant_index}, repetition {repetition}: {failure}"
    )]
    SweepAborted {
        value_size: u64,
        variant_index: usize,
        repetition: u32,
        failure: TrialFailure,
    },

    // Render errors (exit code 50)
    #[error("plotting tool failed with status {status}: {stderr}")]
    PlotFailed { status: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "input/invalid_config",
            Self::MalformedRow { .. } => "input/malformed_row",
            Self::SweepAborted { .. } => "execution/sweep_aborted",
            Self::PlotFailed { .. } => "render/plot_failed",
            Self::Io(_) => "internal/io_error",
            Self::Json(_) => "internal/json_error",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) | Self::MalformedRow { .. } => 10,
            Self::SweepAborted { .. } => 40,
            Self::PlotFailed { .. } => 50,
            Self::Io(_) | Self::Json(_) => 70,
        }
    }
}
