//! CLI for ragtriage - weighted scoring and cost-bounded failure triage for
//! RAG evaluations.

mod formatting;
mod progress;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use formatting::{
    print_budgets, print_cost_summary, print_diagnosis_summary, print_score_report,
    print_trend_report,
};
use progress::ProgressDisplay;
use ragtriage_core::config::{load_default_config, ConfigOverrides};
use ragtriage_core::trend::{compare, select_previous};
use ragtriage_core::{
    score_report, Budget, Config, CostAccountant, EvaluationResult, FailureTriage, Judge,
    OpenAiJudge,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "ragtriage.yaml";

#[derive(Debug, Parser)]
#[command(
    name = "ragtriage",
    version,
    about = "Weighted scoring and cost-bounded failure triage for RAG evaluations"
)]
struct Cli {
    /// Path to the configuration file. Without it, ./ragtriage.yaml is used
    /// when present, otherwise built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Score an evaluation result and print its grade.
    Score {
        /// Evaluation result JSON file.
        result: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Compare an evaluation result against the latest earlier one.
    Compare {
        /// Evaluation result JSON file.
        current: PathBuf,
        /// Earlier results (each file holds one result or an array of results).
        #[arg(required = true)]
        history: Vec<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Diagnose failed cases with heuristics, sampling and an LLM judge.
    Triage {
        /// Evaluation result JSON file.
        result: PathBuf,
        /// Where to write the annotated result (defaults to <result>.triaged.json).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Override the number of concurrent judge calls.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Judge this percentage of ambiguous cases.
        #[arg(long)]
        ratio: Option<f64>,
        /// Override the sampling seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Override retries per judge call.
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long)]
        json: bool,
    },

    /// Load and print the resolved configuration.
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let overrides = match &cli.command {
        Command::Triage {
            concurrency,
            ratio,
            seed,
            max_retries,
            ..
        } => ConfigOverrides {
            concurrency: *concurrency,
            max_retries: *max_retries,
            sampling_ratio: *ratio,
            seed: *seed,
        },
        _ => ConfigOverrides::default(),
    };
    let config = load(cli.config.as_deref(), overrides)?;

    match cli.command {
        Command::Score { result, json } => {
            let evaluation = read_result(&result)?;
            let catalog = config.metric_catalog()?;
            let report = score_report(&catalog, &evaluation.scores, config.scoring.warning_floor)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_score_report(&evaluation.id, &report);
            }
        }
        Command::Compare {
            current,
            history,
            json,
        } => {
            let current = read_result(&current)?;
            let mut past = Vec::new();
            for path in &history {
                past.extend(read_results(path)?);
            }
            let catalog = config.metric_catalog()?;
            let previous = select_previous(&past, &current);
            let report = compare(&catalog, &current, previous)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_trend_report(&current.id, report.as_ref());
            }
        }
        Command::Triage {
            result,
            output,
            json,
            ..
        } => {
            let evaluation = read_result(&result)?;
            let output = output.unwrap_or_else(|| triaged_path(&result));
            run_triage(&config, evaluation, &output, json)?;
        }
        Command::ShowConfig => {
            let catalog = config.metric_catalog()?;
            println!(
                "Loaded config: {} metric(s), {} budget(s), judge {}/{}.",
                catalog.len(),
                config.budgets.len(),
                config.judge.provider,
                config.judge.model
            );
            let yaml = serde_yaml::to_string(&config)?;
            println!("{yaml}");
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path, overrides)
            .with_context(|| format!("loading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Config::from_file(DEFAULT_CONFIG_FILE, overrides)
                .with_context(|| format!("loading {DEFAULT_CONFIG_FILE}"))?
        }
        None => {
            debug!("no config file found, using built-in defaults");
            load_default_config(overrides)?
        }
    };
    Ok(config)
}

fn read_result(path: &Path) -> Result<EvaluationResult> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn read_results(path: &Path) -> Result<Vec<EvaluationResult>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    let results = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(results)
}

fn triaged_path(result: &Path) -> PathBuf {
    let stem = result
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".into());
    result.with_file_name(format!("{stem}.triaged.json"))
}

#[derive(Serialize)]
struct TriageOutput<'a> {
    summary: &'a ragtriage_core::DiagnosisSummary,
    cost: ragtriage_core::CostSummary,
    budgets: Vec<ragtriage_core::cost::BudgetStatus>,
    alerts: Vec<ragtriage_core::CostAlert>,
    output: &'a Path,
}

fn run_triage(
    config: &Config,
    mut evaluation: EvaluationResult,
    output: &Path,
    json: bool,
) -> Result<()> {
    if config.judge.provider != "openai" {
        return Err(anyhow!(
            "unsupported judge provider: {} (supported: openai)",
            config.judge.provider
        ));
    }

    let accountant = Arc::new(CostAccountant::with_budgets(
        config.budgets.iter().map(Budget::from),
    ));
    accountant.ensure_can_start()?;

    let judge: Arc<dyn Judge> = Arc::new(OpenAiJudge::from_config(&config.judge));
    let triage = FailureTriage::new(config.triage.clone(), judge, accountant.clone())?;

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let token = triage.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling: waiting for in-flight judge calls to settle...");
                token.cancel();
            }
        });

        let display = ProgressDisplay::new();
        let display_handle = tokio::spawn(display.run(triage.subscribe()));

        let result = triage.run(&mut evaluation).await;
        // Closing the event channel stops the display if the run bailed early.
        drop(triage);
        let _ = display_handle.await;
        result
    })?;

    let content = serde_json::to_string_pretty(&evaluation)?;
    fs::write(output, content).with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), "wrote annotated result");

    let cost = accountant.summary();
    let budgets = accountant.budgets();
    let alerts = accountant.alerts();
    if json {
        let out = TriageOutput {
            summary: &summary,
            cost,
            budgets,
            alerts,
            output,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_diagnosis_summary(&summary);
        print_cost_summary(&cost);
        print_budgets(&budgets, &alerts);
        println!();
        println!("Annotated result written to {}", output.display());
    }
    Ok(())
}
