//! Report rendering through gnuplot.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::SweepConfig;
use crate::dataset::{MISSING_MARKER, write_grouped_dataset};
use crate::errors::BenchError;
use crate::types::GroupedDataset;

pub const FULL_RANGE_ARTIFACT: &str = "rocksdb_read_benchmark.pdf";
pub const ZOOMED_ARTIFACT: &str = "rocksdb_read_benchmark_up_to_6kb.pdf";

/// Upper bound of the zoomed plot, in kB.
const ZOOM_MAX_KB: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered { artifacts: Vec<PathBuf> },
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct ReportRenderer {
    plotter: String,
    output_dir: PathBuf,
    keep_grouped: bool,
}

impl ReportRenderer {
    pub fn new(plotter: impl Into<String>, output_dir: impl Into<PathBuf>, keep_grouped: bool) -> Self {
        Self {
            plotter: plotter.into(),
            output_dir: output_dir.into(),
            keep_grouped,
        }
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        Self::new(
            config.plotter.clone(),
            config.output_dir.clone(),
            config.keep_grouped,
        )
    }

    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        vec![
            self.output_dir.join(FULL_RANGE_ARTIFACT),
            self.output_dir.join(ZOOMED_ARTIFACT),
        ]
    }

    /// Writes the grouped dataset to `grouped_path` and plots it.
    ///
    /// A missing plotting tool is not an error: the grouped dataset stays on
    /// disk and `Skipped` is returned. After a successful plot the grouped
    /// dataset is removed unless it was asked to be kept.
    pub async fn render(
        &self,
        grouped: &GroupedDataset,
        grouped_path: &Path,
    ) -> Result<RenderOutcome, BenchError> {
        write_grouped_dataset(grouped, grouped_path)?;

        let pages = grouped.plottable_blocks(None);
        if pages.is_empty() {
            warn!("Grouped dataset has no measured rows, nothing to plot");
            return Ok(RenderOutcome::Skipped {
                reason: "grouped dataset has no measured rows".to_string(),
            });
        }
        let zoom_pages = grouped.plottable_blocks(Some(u64::from(ZOOM_MAX_KB) * 1000));
        if pages.len() < grouped.blocks.len() {
            warn!(
                plotted = pages.len(),
                blocks = grouped.blocks.len(),
                "Leaving variants without measurements out of the report"
            );
        }

        let Some(plotter) = locate_program(&self.plotter) else {
            warn!(
                plotter = %self.plotter,
                grouped = %grouped_path.display(),
                "Plotting tool not found, skipping report rendering"
            );
            return Ok(RenderOutcome::Skipped {
                reason: format!("{} not found", self.plotter),
            });
        };

        std::fs::create_dir_all(&self.output_dir)?;
        let mut script = tempfile::Builder::new()
            .prefix("rdb-bench-")
            .suffix(".gp")
            .tempfile()?;
        script.write_all(plot_script().as_bytes())?;
        script.flush()?;

        let variables = plot_variables(grouped_path, &self.output_dir, &pages, &zoom_pages);

        let output = match Command::new(&plotter)
            .arg("-e")
            .arg(&variables)
            .arg(script.path())
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                warn!(
                    plotter = %plotter.display(),
                    error = %e,
                    "Plotting tool could not be started, skipping report rendering"
                );
                return Ok(RenderOutcome::Skipped {
                    reason: format!("{} could not be started: {e}", self.plotter),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            return Err(BenchError::PlotFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !self.keep_grouped {
            std::fs::remove_file(grouped_path)?;
        }

        let artifacts = self.artifact_paths();
        for artifact in &artifacts {
            info!(artifact = %artifact.display(), "Plot written");
        }
        Ok(RenderOutcome::Rendered { artifacts })
    }
}

/// Resolves `program` against `PATH`, or checks it directly when it is a path.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Single-quoted gnuplot string literal.
fn gnuplot_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The `-e` definitions the plot script expects. Page lists are
/// space-separated block positions in the grouped dataset.
pub fn plot_variables(
    grouped_path: &Path,
    output_dir: &Path,
    pages: &[usize],
    zoom_pages: &[usize],
) -> String {
    format!(
        "datafile={}; outdir={}; pages={}; zoom_pages={}",
        gnuplot_quote(&grouped_path.display().to_string()),
        gnuplot_quote(&output_dir.display().to_string()),
        gnuplot_quote(&word_list(pages)),
        gnuplot_quote(&word_list(zoom_pages)),
    )
}

fn word_list(positions: &[usize]) -> String {
    positions
        .iter()
        .map(|pos| pos.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn series(pages: &str) -> String {
    format!(
        "datafile index int(word({pages}, n)) using ($2/1000):($4/$2) with linespoints title columnheader(1)"
    )
}

/// Expects `datafile`, `outdir`, `pages` and `zoom_pages` to be defined with `-e`.
pub fn plot_script() -> String {
    let full = series("pages");
    let zoomed = series("zoom_pages");
    format!(
        r#"set terminal pdfcairo noenhanced size 8in,5in
set datafile missing "{MISSING_MARKER}"
set key top right
set grid
set title "RocksDB read cost per value byte"
set xlabel "value size [kB]"
set ylabel "gas per value byte"

set output outdir."/{FULL_RANGE_ARTIFACT}"
plot for [n=1:words(pages)] {full}
do for [n=1:words(pages)] {{
    plot {full}
}}

set output outdir."/{ZOOMED_ARTIFACT}"
set xrange [0:{ZOOM_MAX_KB}]
if (words(zoom_pages) > 0) {{
    plot for [n=1:words(zoom_pages)] {zoomed}
    do for [n=1:words(zoom_pages)] {{
        plot {zoomed}
    }}
}}

unset output
"#
    )
}
