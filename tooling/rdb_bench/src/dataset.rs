//! Text formats of the raw and grouped datasets.
//!
//! Raw dataset: one `# <flags>` comment per variant block, then rows of
//! `op-count value-size variant-index measurement`. Failed trials are kept as
//! `# skipped op-count value-size variant-index: <reason>` so that plotting
//! tools ignore them while the parser can still recover them.
//!
//! Grouped dataset: a header comment, then per variant a label line, rows of
//! `op-count value-size variant-index mean` and two blank lines, which is the
//! block separator gnuplot's `index` expects.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::errors::BenchError;
use crate::trial::{parse_number, strip_numeric_artifacts};
use crate::types::{GroupedDataset, TrialFailure, TrialOutcome, TrialRecord, Variant};

pub const GROUPED_HEADER: &str = "# repetitions value_bytes config gas";

/// Written in place of the mean when every repetition of a key failed.
pub const MISSING_MARKER: &str = "?";

const SKIPPED_PREFIX: &str = "# skipped ";

/// Append-only writer for the raw dataset file.
pub struct RawDatasetWriter {
    path: PathBuf,
    file: File,
}

impl RawDatasetWriter {
    /// Creates a fresh raw dataset at `path`. An existing file is never
    /// reused: `<stem>_1.dat`, `<stem>_2.dat`, ... are tried instead.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, BenchError> {
        let requested = path.into();
        if let Some(parent) = requested.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut path = requested.clone();
        let mut attempt = 0u32;
        loop {
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => return Ok(Self { path, file }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    attempt += 1;
                    path = numbered_path(&requested, attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn begin_variant(&mut self, variant: &Variant) -> Result<(), BenchError> {
        writeln!(self.file, "# {}", variant.flag_string())?;
        Ok(())
    }

    pub fn append(&mut self, record: &TrialRecord) -> Result<(), BenchError> {
        writeln!(self.file, "{}", format_raw_record(record))?;
        Ok(())
    }
}

fn numbered_path(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

pub fn format_raw_record(record: &TrialRecord) -> String {
    match &record.outcome {
        TrialOutcome::Measured(gas) => format!(
            "{} {} {} {gas}",
            record.op_count, record.value_size, record.variant_index
        ),
        TrialOutcome::Failed(failure) => format!(
            "{SKIPPED_PREFIX}{} {} {}: {}",
            record.op_count,
            record.value_size,
            record.variant_index,
            single_line(&failure.to_string())
        ),
    }
}

fn single_line(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join(" | ")
}

/// Parses a raw dataset back into tagged records.
///
/// Repetition numbers are recovered from the order in which each
/// (variant, value size, op-count) key appears.
pub fn parse_raw_dataset(text: &str) -> Result<Vec<TrialRecord>, BenchError> {
    let mut records = Vec::new();
    let mut repetitions: HashMap<(usize, u64, u64), u32> = HashMap::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (op_count, value_size, variant_index, outcome) =
            if let Some(rest) = trimmed.strip_prefix(SKIPPED_PREFIX) {
                parse_skipped_row(rest, line_no)?
            } else if trimmed.starts_with('#') {
                continue;
            } else {
                parse_data_row(trimmed, line_no)?
            };

        let counter = repetitions
            .entry((variant_index, value_size, op_count))
            .or_default();
        *counter += 1;

        records.push(TrialRecord {
            variant_index,
            value_size,
            op_count,
            repetition: *counter,
            outcome,
        });
    }

    Ok(records)
}

pub fn read_raw_dataset(path: &Path) -> Result<Vec<TrialRecord>, BenchError> {
    let text = std::fs::read_to_string(path)?;
    parse_raw_dataset(&text)
}

type RowKey = (u64, u64, usize);

fn parse_data_row(line: &str, line_no: usize) -> Result<(u64, u64, usize, TrialOutcome), BenchError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(BenchError::MalformedRow {
            line: line_no,
            reason: format!("expected 4 fields, found {}", fields.len()),
        });
    }
    let (op_count, value_size, variant_index) = parse_key(&fields[..3], line_no)?;
    let gas = parse_number(fields[3]).ok_or_else(|| BenchError::MalformedRow {
        line: line_no,
        reason: format!("measurement '{}' is not a number", fields[3]),
    })?;
    Ok((op_count, value_size, variant_index, TrialOutcome::Measured(gas)))
}

fn parse_skipped_row(
    rest: &str,
    line_no: usize,
) -> Result<(u64, u64, usize, TrialOutcome), BenchError> {
    let (key, reason) = rest.split_once(':').ok_or_else(|| BenchError::MalformedRow {
        line: line_no,
        reason: "skipped row without a reason".to_string(),
    })?;
    let fields: Vec<&str> = key.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(BenchError::MalformedRow {
            line: line_no,
            reason: format!("expected 3 key fields in skipped row, found {}", fields.len()),
        });
    }
    let (op_count, value_size, variant_index) = parse_key(&fields, line_no)?;
    let outcome = TrialOutcome::Failed(TrialFailure::Recorded {
        reason: reason.trim().to_string(),
    });
    Ok((op_count, value_size, variant_index, outcome))
}

fn parse_key(fields: &[&str], line_no: usize) -> Result<RowKey, BenchError> {
    let op_count = parse_integer(fields[0], "op-count", line_no)?;
    let value_size = parse_integer(fields[1], "value size", line_no)?;
    let variant_index = parse_integer(fields[2], "variant index", line_no)?;
    if value_size == 0 {
        return Err(BenchError::MalformedRow {
            line: line_no,
            reason: "value size must be positive".to_string(),
        });
    }
    let variant_index = usize::try_from(variant_index)
        .ok()
        .filter(|i| *i > 0)
        .ok_or_else(|| BenchError::MalformedRow {
            line: line_no,
            reason: format!("variant index {variant_index} is out of range"),
        })?;
    Ok((op_count, value_size, variant_index))
}

fn parse_integer(field: &str, name: &str, line_no: usize) -> Result<u64, BenchError> {
    strip_numeric_artifacts(field)
        .parse()
        .map_err(|_| BenchError::MalformedRow {
            line: line_no,
            reason: format!("{name} '{field}' is not an integer"),
        })
}

pub fn format_grouped_dataset(grouped: &GroupedDataset) -> String {
    let mut out = String::new();
    out.push_str(GROUPED_HEADER);
    out.push('\n');
    for block in &grouped.blocks {
        out.push_str(&block.label);
        out.push('\n');
        for row in &block.rows {
            let mean = match row.mean {
                Some(mean) => mean.to_string(),
                None => MISSING_MARKER.to_string(),
            };
            // Writing to a String cannot fail.
            let _ = writeln!(
                out,
                "{} {} {} {mean}",
                row.op_count, row.value_size, row.variant_index
            );
        }
        out.push_str("\n\n");
    }
    out
}

pub fn write_grouped_dataset(grouped: &GroupedDataset, path: &Path) -> Result<(), BenchError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format_grouped_dataset(grouped))?;
    Ok(())
}
