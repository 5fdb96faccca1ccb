use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use resilient_runner::diagnostics::FileSnapshotSink;
use resilient_runner::driver::scripted::ScriptedDriver;
use resilient_runner::limits::ExecutionLimits;
use resilient_runner::loader::load_scenario_from_file;
use resilient_runner::protocol::{Scenario, ScenarioReport};
use resilient_runner::runner::ScenarioRunner;
use resilient_runner::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use resilient_runner::validation::validate_scenario;

/// Cenário passou.
const EXIT_PASSED: u8 = 0;
/// Cenário executou e falhou.
const EXIT_FAILED: u8 = 1;
/// Cenário não pôde ser carregado, validado ou iniciado.
const EXIT_INVALID: u8 = 2;

#[derive(Parser)]
#[command(name = "runner")]
#[command(about = "Resilient UI automation runner", long_about = None)]
struct Cli {
    /// Only warnings and errors on the console
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DriverKind {
    /// In-memory document loaded from --document
    Scripted,
    /// Real Chromium over CDP (requires the `chromium` feature)
    Chromium,
}

#[derive(Subcommand)]
enum Commands {
    /// Executes a scenario
    Run {
        /// Path to the scenario file
        #[arg(short, long)]
        file: PathBuf,

        /// Path to the output report file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for failure snapshots (overrides config.snapshot_dir)
        #[arg(long)]
        snapshots: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "scripted")]
        driver: DriverKind,

        /// Scripted document fixture (scripted driver only)
        #[arg(long)]
        document: Option<PathBuf>,

        /// Show the browser window (chromium driver only; also RUNNER_HEADFUL=1)
        #[arg(long)]
        headed: bool,
    },
    /// Validates a scenario without running it
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if cli.quiet {
        telemetry.log_level = tracing::Level::WARN;
    }
    if let Err(e) = init_telemetry(telemetry) {
        eprintln!("❌ Falha ao inicializar telemetria: {:#}", e);
    }

    let code = match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Run {
            file,
            output,
            snapshots,
            driver,
            document,
            headed,
        } => {
            let result = run(
                &file,
                output.as_deref(),
                snapshots,
                driver,
                document.as_deref(),
                headed,
            )
            .await;
            match result {
                Ok(code) => code,
                Err(e) => {
                    error!("❌ {:#}", e);
                    EXIT_INVALID
                }
            }
        }
    };

    shutdown_telemetry();
    ExitCode::from(code)
}

fn load_valid(file: &Path, limits: &ExecutionLimits) -> Result<Scenario, u8> {
    let scenario = load_scenario_from_file(file).map_err(|e| {
        error!("❌ {:#}", e);
        EXIT_INVALID
    })?;

    if let Err(errors) = validate_scenario(&scenario, limits) {
        for e in &errors {
            error!(code = %e.code(), what = e.code().description(), "{}", e);
        }
        error!(count = errors.len(), "❌ Cenário inválido");
        return Err(EXIT_INVALID);
    }
    Ok(scenario)
}

fn validate(file: &Path) -> u8 {
    match load_valid(file, &ExecutionLimits::from_env()) {
        Ok(scenario) => {
            info!(
                scenario_id = %scenario.meta.id,
                steps = scenario.steps.len(),
                "✅ Cenário válido"
            );
            EXIT_PASSED
        }
        Err(code) => code,
    }
}

async fn run(
    file: &Path,
    output: Option<&Path>,
    snapshots: Option<PathBuf>,
    driver: DriverKind,
    document: Option<&Path>,
    headed: bool,
) -> Result<u8> {
    let limits = ExecutionLimits::from_env();
    let scenario = match load_valid(file, &limits) {
        Ok(s) => s,
        Err(code) => return Ok(code),
    };
    info!(scenario = %scenario.meta.name, "📋 Cenário carregado");

    let snapshot_dir = snapshots
        .or_else(|| scenario.config.snapshot_dir.clone())
        .unwrap_or_else(|| PathBuf::from("snapshots"));
    let runner =
        ScenarioRunner::new(limits).with_sink(Arc::new(FileSnapshotSink::new(snapshot_dir)));

    let report = match driver {
        DriverKind::Scripted => {
            let mut driver = match document {
                Some(path) => ScriptedDriver::load(path)?,
                None => {
                    warn!("Nenhum --document informado; usando documento vazio");
                    ScriptedDriver::new()
                }
            };
            runner.run(&scenario, &mut driver).await?
        }
        DriverKind::Chromium => {
            let headed = headed
                || std::env::var("RUNNER_HEADFUL").is_ok_and(|v| v == "1" || v == "true");
            run_chromium(&runner, &scenario, headed).await?
        }
    };

    write_report(&report, output)?;
    Ok(if report.passed() { EXIT_PASSED } else { EXIT_FAILED })
}

#[cfg(feature = "chromium")]
async fn run_chromium(
    runner: &ScenarioRunner,
    scenario: &Scenario,
    headed: bool,
) -> Result<ScenarioReport> {
    use resilient_runner::driver::chromium::ChromiumDriver;

    let mut driver = ChromiumDriver::launch(headed).await?;
    let report = runner.run(scenario, &mut driver).await;
    if let Err(e) = driver.close().await {
        warn!("Falha ao encerrar o browser: {:#}", e);
    }
    report
}

#[cfg(not(feature = "chromium"))]
async fn run_chromium(_: &ScenarioRunner, _: &Scenario, _: bool) -> Result<ScenarioReport> {
    anyhow::bail!("driver chromium indisponível: compile com `--features chromium`")
}

fn write_report(report: &ScenarioReport, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write report {:?}", path))?;
            info!(path = ?path, "📄 Relatório salvo");
        }
        None => println!("{}", json),
    }
    Ok(())
}
