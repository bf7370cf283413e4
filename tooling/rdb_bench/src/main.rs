use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use rdb_bench::{
    config::SweepConfig,
    errors::BenchError,
    pipeline::{self, PipelineOutput},
    render::RenderOutcome,
    sweep::describe_plan,
    trial::CommandEstimator,
    types::{GapPolicy, TimeoutPolicy},
};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, filter::Directive};

#[derive(Parser)]
#[command(
    name = "rdb-bench",
    about = "Sweeps the gas estimator over RocksDB configurations and value sizes"
)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long, global = true, value_name = "CONFIG_PATH")]
    config: Option<PathBuf>,

    #[arg(long = "log.level", global = true, default_value_t = Level::INFO, value_name = "LOG_LEVEL")]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sweep, aggregate the results and render the plots
    Run {
        #[command(flatten)]
        overrides: Overrides,
        /// Write a JSON summary of every trial and the grouped dataset
        #[arg(long, value_name = "SUMMARY_PATH")]
        summary: Option<PathBuf>,
    },
    /// Aggregate and render an existing raw dataset
    Aggregate {
        /// Raw dataset written by a previous run
        #[arg(long, value_name = "RAW_PATH")]
        raw: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
        #[arg(long, value_name = "SUMMARY_PATH")]
        summary: Option<PathBuf>,
    },
    /// Print every planned trial and its command line without running it
    Plan {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Args, Default)]
struct Overrides {
    /// Estimator command line, e.g. "cargo run --release -p runtime-params-estimator --"
    #[arg(long)]
    estimator: Option<String>,
    #[arg(long)]
    metric: Option<String>,
    #[arg(long)]
    vm_kind: Option<String>,
    #[arg(long)]
    costs: Option<String>,
    /// Estimator home directory
    #[arg(long)]
    home: Option<PathBuf>,
    /// Comma-separated value sizes in bytes
    #[arg(long, value_delimiter = ',')]
    value_sizes: Option<Vec<u64>>,
    #[arg(long)]
    repetitions: Option<u32>,
    #[arg(long, value_name = "SECONDS", conflicts_with = "no_timeout")]
    trial_timeout: Option<u64>,
    /// Let trials run without a time limit
    #[arg(long)]
    no_timeout: bool,
    #[arg(long)]
    on_timeout: Option<TimeoutPolicy>,
    /// Abort the sweep on the first failed trial
    #[arg(long)]
    fail_fast: bool,
    /// How to report keys whose trials all failed
    #[arg(long)]
    gap_policy: Option<GapPolicy>,
    /// Directory for datasets and plots
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Plotting program, looked up on PATH
    #[arg(long)]
    plotter: Option<String>,
    /// Keep the grouped dataset after plotting
    #[arg(long)]
    keep_grouped: bool,
}

impl Overrides {
    fn apply(self, config: &mut SweepConfig) {
        if let Some(estimator) = self.estimator {
            config.estimator = estimator.split_whitespace().map(String::from).collect();
        }
        if let Some(metric) = self.metric {
            config.metric = metric;
        }
        if let Some(vm_kind) = self.vm_kind {
            config.vm_kind = vm_kind;
        }
        if let Some(costs) = self.costs {
            config.costs = costs;
        }
        if let Some(home) = self.home {
            config.home = home;
        }
        if let Some(value_sizes) = self.value_sizes {
            config.value_sizes = value_sizes;
        }
        if let Some(repetitions) = self.repetitions {
            config.repetitions = repetitions;
        }
        if self.no_timeout {
            config.trial_timeout_secs = None;
        } else if let Some(secs) = self.trial_timeout {
            config.trial_timeout_secs = Some(secs);
        }
        if let Some(on_timeout) = self.on_timeout {
            config.on_timeout = on_timeout;
        }
        if self.fail_fast {
            config.fail_fast = true;
        }
        if let Some(gap_policy) = self.gap_policy {
            config.gap_policy = gap_policy;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(plotter) = self.plotter {
            config.plotter = plotter;
        }
        if self.keep_grouped {
            config.keep_grouped = true;
        }
    }
}

fn init_tracing(log_level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(Directive::from(log_level))
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print a JSON error and exit with the error's code.
fn exit_error(err: &BenchError) -> ! {
    let response = serde_json::json!({
        "success": false,
        "error": {
            "code": err.error_code(),
            "message": err.to_string(),
        }
    });
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&response).unwrap_or_else(|_| err.to_string())
    );
    process::exit(err.exit_code());
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    if let Err(e) = run(cli.command, cli.config).await {
        exit_error(&e);
    }
}

fn load_config(path: Option<PathBuf>, overrides: Overrides) -> Result<SweepConfig, BenchError> {
    let mut config = match path {
        Some(path) => SweepConfig::from_json_file(&path)?,
        None => SweepConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn estimator_for(config: &SweepConfig) -> Result<CommandEstimator, BenchError> {
    CommandEstimator::from_config(config)
        .ok_or_else(|| BenchError::InvalidConfig("estimator command is empty".to_string()))
}

async fn run(command: Commands, config_path: Option<PathBuf>) -> Result<(), BenchError> {
    match command {
        Commands::Run { overrides, summary } => {
            let config = load_config(config_path, overrides)?;
            let estimator = estimator_for(&config)?;
            let output = pipeline::run(&config, &estimator).await?;
            finish(&output, summary)?;
        }
        Commands::Aggregate {
            raw,
            overrides,
            summary,
        } => {
            let config = load_config(config_path, overrides)?;
            let output = pipeline::reaggregate(&config, &raw).await?;
            finish(&output, summary)?;
        }
        Commands::Plan { overrides } => {
            let config = load_config(config_path, overrides)?;
            let estimator = estimator_for(&config)?;
            let plan = describe_plan(&config, &estimator)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }
    Ok(())
}

fn finish(output: &PipelineOutput, summary: Option<PathBuf>) -> Result<(), BenchError> {
    if let Some(raw) = &output.report.raw_dataset {
        info!(raw = %raw.display(), "Raw dataset kept");
    }
    match &output.render {
        RenderOutcome::Rendered { artifacts } => {
            info!(artifacts = artifacts.len(), "Report rendered");
        }
        RenderOutcome::Skipped { reason } => {
            info!(%reason, "Report not rendered, datasets left on disk");
        }
    }
    if let Some(path) = summary {
        pipeline::write_summary(&output.report, &path)?;
        info!(summary = %path.display(), "Summary written");
    }
    Ok(())
}
