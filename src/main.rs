use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use suiterun::cli::{Cli, Commands, RunArgs};
use suiterun::commands::doctor;
use suiterun::environment::LogSwitch;
use suiterun::registry::catalog_from_commands;
use suiterun::report::{self, AggregateReport, FailureReport, RunReport};
use suiterun::{history, Config, Database, EnvironmentGuard, Orchestrator, SuiteRegistry, SystemMemoryProbe};

/// JSON response structure for --json output mode
#[derive(Serialize, Deserialize)]
struct JsonResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl JsonResponse {
    fn new(success: bool, data: serde_json::Value) -> Self {
        Self {
            success,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }

    fn print(&self) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize response: {}", e),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;

    let log_switch = init_tracing(cli.verbose);

    match dispatch(cli, log_switch).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            if json_mode {
                JsonResponse::error(format!("{:#}", e)).print();
            } else {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
            }
            std::process::exit(1);
        }
    }
}

/// Install the stderr subscriber. Unless `RUST_LOG` pins the filter, the returned
/// switch lets the environment guard retune it while a run is optimized.
fn init_tracing(verbose: bool) -> Option<LogSwitch> {
    let base = if verbose { "debug" } else { "warn" };

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return None;
    }

    let (filter, handle) = reload::Layer::new(EnvFilter::new(base));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Some(LogSwitch::new(move |channel| {
        let directive = match channel {
            "null" => "error",
            "single" => "debug",
            _ => base,
        };
        if let Err(e) = handle.reload(EnvFilter::new(directive)) {
            eprintln!("Failed to switch log filter: {}", e);
        }
    }))
}

/// Returns whether the command succeeded; `Err` is reserved for setup problems.
async fn dispatch(cli: Cli, log_switch: Option<LogSwitch>) -> Result<bool> {
    let json_mode = cli.json;
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { force } => handle_init_command(config_path, force, json_mode).await,
        Commands::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "suiterun", &mut std::io::stdout());
            Ok(true)
        }
        command => {
            let config = Config::load(config_path)
                .await
                .context("Failed to load configuration")?;

            match command {
                Commands::Run(args) => handle_run_command(&config, &args, log_switch, json_mode).await,
                Commands::Suites { all } => handle_suites_command(&config, all, json_mode),
                Commands::Doctor => handle_doctor_command(&config, json_mode).await,
                Commands::History { limit } => handle_history_command(&config, limit, json_mode).await,
                Commands::Init { .. } | Commands::Completion { .. } => Ok(true),
            }
        }
    }
}

async fn open_database(config: &Config) -> Result<Arc<Database>> {
    config.ensure_database_directory().await?;
    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    Ok(Arc::new(db))
}

fn guard_for(db: &Arc<Database>) -> EnvironmentGuard {
    EnvironmentGuard::new(db.clone(), db.clone(), Arc::new(SystemMemoryProbe::new()))
}

async fn handle_run_command(
    config: &Config,
    args: &RunArgs,
    log_switch: Option<LogSwitch>,
    json_mode: bool,
) -> Result<bool> {
    let mut options = config.run.clone();
    args.apply(&mut options);

    let db = open_database(config).await?;
    let purged = db.purge_expired().await?;
    tracing::debug!(purged, "Purged expired cache entries");

    let registry = SuiteRegistry::builtin(&options, catalog_from_commands(&config.suites))?;
    let guard = match log_switch {
        Some(switch) => guard_for(&db).with_log_switch(switch),
        None => guard_for(&db),
    };
    let mut orchestrator = Orchestrator::new(options, registry, Arc::new(guard))
        .with_thresholds(config.thresholds);

    let run_report = orchestrator.run().await;
    db.close().await;

    let saved = match (&run_report, args.save) {
        (RunReport::Completed(completed), true) => report::save(completed, &config.report_path).await?,
        _ => Vec::new(),
    };

    if json_mode {
        JsonResponse::new(run_report.is_success(), serde_json::to_value(&run_report)?).print();
    } else {
        match &run_report {
            RunReport::Completed(completed) => print_aggregate_report(completed),
            RunReport::Failed(failure) => print_failure_report(failure),
        }
        if !saved.is_empty() {
            println!("\n📄 Reports saved to {}:", config.report_path.display());
            for path in &saved {
                println!("   {}", path.display());
            }
        }
    }

    Ok(run_report.is_success())
}

fn print_aggregate_report(report: &AggregateReport) {
    let summary = &report.summary;
    let context = &report.execution_context;

    println!("\n{}", "━".repeat(60).bright_black());
    println!("{}", "Comprehensive Test Report".bold().bright_white());
    println!("{}", format!("Session {}", context.session_id).bright_black());
    println!("{}\n", "━".repeat(60).bright_black());

    for record in &report.records {
        match record.error() {
            None => println!("{} {} {}", "✅".green(), record.suite_name.bold(), format!("({:.1} ms)", record.duration_ms).bright_black()),
            Some(error) => {
                println!("{} {} {}", "❌".red(), record.suite_name.bold(), format!("({:.1} ms)", record.duration_ms).bright_black());
                println!("   {} {}", "✗".red(), error.message.red());
            }
        }
    }
    for suite in &context.timed_out_suites {
        println!("{} {} {}", "⏱".yellow(), suite.bold(), "(timed out)".yellow());
    }

    println!("\n{}", "━".repeat(60).bright_black());

    let rate = format!("{:.1}%", summary.success_rate_percent);
    let rate = if summary.failed == 0 { rate.green() } else { rate.red() };
    println!(
        "Suites: {}/{} passed ({})  Cases: {}/{} passed",
        summary.passed, summary.total_tests, rate, summary.cases.passed, summary.cases.total
    );
    println!(
        "Scores: performance {:.1}  security {:.1}  integration {:.1}",
        summary.performance_score, summary.security_score, summary.integration_score
    );
    if let Some(coverage) = summary.coverage {
        println!("Coverage: {:.1}%", coverage);
    }
    println!("Strategy: {} in {:.0} ms", context.strategy, context.duration_ms);

    if !report.recommendations.is_empty() {
        println!("\n{}", "Recommendations:".bold());
        for (i, recommendation) in report.recommendations.iter().enumerate() {
            println!("  {}. {}", i + 1, recommendation);
        }
    }

    if let Some(analyses) = &report.advanced_metrics.failure_analysis {
        for analysis in analyses.iter().filter(|a| !a.suggestions.is_empty()) {
            println!("\n{} {}", "Failure analysis:".bold(), analysis.suite_name);
            for suggestion in &analysis.suggestions {
                println!("  • {}", suggestion);
            }
        }
    }

    println!();
}

fn print_failure_report(failure: &FailureReport) {
    eprintln!("\n{} {}", "❌ Test run failed during".red().bold(), failure.phase.red().bold());
    eprintln!("   {}", failure.error.red());
    eprintln!("   {}", format!("Session {}", failure.session_id).bright_black());
}

fn handle_suites_command(config: &Config, all: bool, json_mode: bool) -> Result<bool> {
    let registry = SuiteRegistry::builtin(&config.run, catalog_from_commands(&config.suites))?;
    let selected: Vec<String> = registry
        .resolve(&config.run.groups)
        .iter()
        .map(|d| d.name().to_string())
        .collect();

    let rows: Vec<(String, bool, bool)> = registry
        .descriptors()
        .iter()
        .filter(|d| all || d.enabled())
        .map(|d| (d.name().to_string(), d.enabled(), selected.iter().any(|s| s == d.name())))
        .collect();

    if json_mode {
        let data: Vec<_> = rows
            .iter()
            .map(|(name, enabled, selected)| {
                serde_json::json!({ "name": name, "enabled": enabled, "selected": selected })
            })
            .collect();
        JsonResponse::new(true, serde_json::json!({ "suites": data })).print();
        return Ok(true);
    }

    println!("{}", "Registered suites".bold());
    for (name, enabled, selected) in rows {
        let marker = if selected {
            "●".green()
        } else if enabled {
            "○".yellow()
        } else {
            "○".bright_black()
        };
        let cases: usize = config
            .suites
            .get(&name)
            .map(|categories| categories.values().map(Vec::len).sum())
            .unwrap_or(0);
        let note = if enabled { "" } else { " (disabled)" };
        println!("  {} {} {}{}", marker, name, format!("{} case(s)", cases).bright_black(), note.bright_black());
    }
    Ok(true)
}

async fn handle_doctor_command(config: &Config, json_mode: bool) -> Result<bool> {
    let db = open_database(config).await?;
    let guard = guard_for(&db);
    let checks = doctor::run_doctor(&guard, config).await?;
    db.close().await;

    let healthy = doctor::ready_to_run(&checks);

    if json_mode {
        JsonResponse::new(
            healthy,
            serde_json::json!({
                "checks": checks,
                "health_score": doctor::calculate_health_score(&checks),
            }),
        )
        .print();
    } else {
        doctor::print_report(&checks);
    }

    Ok(healthy)
}

async fn handle_history_command(config: &Config, limit: usize, json_mode: bool) -> Result<bool> {
    let db = open_database(config).await?;
    db.purge_expired().await?;
    let entries = history::load(&*db).await?;
    db.close().await;

    let recent = &entries[entries.len().saturating_sub(limit)..];

    if json_mode {
        JsonResponse::new(true, serde_json::json!({ "history": recent })).print();
        return Ok(true);
    }

    if recent.is_empty() {
        println!("{}", "No stored runs. Use `suiterun run --cache` to record one.".bright_black());
        return Ok(true);
    }

    println!("{}", "Recent runs".bold());
    for entry in recent.iter().rev() {
        let summary = &entry.summary;
        let rate = format!("{:.1}%", summary.success_rate_percent);
        let rate = if summary.failed == 0 { rate.green() } else { rate.red() };
        println!(
            "  {} {} {}/{} suites ({}) {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().bright_black(),
            entry.session_id,
            summary.passed,
            summary.total_tests,
            rate,
            format!("perf {:.0} sec {:.0} int {:.0}", summary.performance_score, summary.security_score, summary.integration_score).bright_black()
        );
    }
    Ok(true)
}

async fn handle_init_command(path: Option<&Path>, force: bool, json_mode: bool) -> Result<bool> {
    let target = match path {
        Some(p) => p.to_path_buf(),
        None => Config::get_config_path()?,
    };

    if target.exists() && !force {
        bail!("Config file already exists at {} (use --force to overwrite)", target.display());
    }

    let written = Config::default().save(Some(target.as_path())).await?;

    if json_mode {
        JsonResponse::new(true, serde_json::json!({ "config_path": written })).print();
    } else {
        println!("{} Wrote default config to {}", "✅".green(), written.display().to_string().bold());
    }
    Ok(true)
}
