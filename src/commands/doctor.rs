use anyhow::Result;
use colored::*;
use serde::Serialize;

use crate::config::Config;
use crate::environment::EnvironmentGuard;
use crate::memory::megabytes;
use crate::registry::{BUILTIN_SUITES, CHAOS_SUITE, LOAD_SUITE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    /// Share of a check's weight that counts toward the health score
    fn credit(self) -> f64 {
        match self {
            CheckStatus::Pass => 1.0,
            CheckStatus::Warn => 0.5,
            CheckStatus::Fail => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub level: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub category: String,
    pub weight: u32,
    /// Failing this check stops `run` at validation
    pub gates_run: bool,
    pub status: CheckStatus,
    pub notes: Vec<Note>,
}

impl HealthCheck {
    fn gate(category: &str, weight: u32) -> Self {
        Self {
            category: category.to_string(),
            weight,
            gates_run: true,
            status: CheckStatus::Pass,
            notes: Vec::new(),
        }
    }

    fn advisory(category: &str, weight: u32) -> Self {
        Self {
            gates_run: false,
            ..Self::gate(category, weight)
        }
    }

    fn note(&mut self, level: CheckStatus, message: impl Into<String>) {
        self.status = self.status.max(level);
        self.notes.push(Note {
            level,
            message: message.into(),
        });
    }

    fn count(&self, level: CheckStatus) -> usize {
        self.notes.iter().filter(|n| n.level == level).count()
    }
}

/// Run each environment check on its own so every problem is reported, not just the first.
pub async fn run_doctor(guard: &EnvironmentGuard, config: &Config) -> Result<Vec<HealthCheck>> {
    Ok(vec![
        check_storage(guard).await,
        check_cache(guard).await,
        check_memory(guard, config),
        check_configuration(config),
    ])
}

async fn check_storage(guard: &EnvironmentGuard) -> HealthCheck {
    let mut check = HealthCheck::gate("Storage Connectivity", 3);
    let driver = guard.snapshot(chrono::Utc::now()).storage_driver;

    match guard.check_storage().await {
        Ok(()) => check.note(CheckStatus::Pass, format!("Connected to {} storage", driver)),
        Err(e) => check.note(CheckStatus::Fail, e.to_string()),
    }
    check
}

async fn check_cache(guard: &EnvironmentGuard) -> HealthCheck {
    let mut check = HealthCheck::gate("Cache Round Trip", 3);

    match guard.check_cache().await {
        Ok(()) => check.note(
            CheckStatus::Pass,
            format!("{} cache accepted a put/forget round trip", guard.cache().driver()),
        ),
        Err(e) => check.note(CheckStatus::Fail, e.to_string()),
    }
    check
}

fn check_memory(guard: &EnvironmentGuard, config: &Config) -> HealthCheck {
    let mut check = HealthCheck::gate("Memory Headroom", 2);
    let floor = config.run.memory_limit_bytes();

    match guard.probe().available_bytes() {
        Some(available) => {
            check.note(
                CheckStatus::Pass,
                format!(
                    "{} MB available, {} MB required",
                    available / megabytes(1),
                    config.run.memory_limit_mb
                ),
            );
            if let Err(e) = guard.check_memory(floor) {
                check.note(CheckStatus::Fail, e.to_string());
            } else if available < floor.saturating_mul(2) {
                check.note(CheckStatus::Warn, "Less than twice the memory limit is available");
            }
        }
        None => check.note(
            CheckStatus::Warn,
            "Host does not report available memory; the memory check is skipped",
        ),
    }
    check
}

fn check_configuration(config: &Config) -> HealthCheck {
    let mut check = HealthCheck::advisory("Configuration", 1);

    match Config::get_config_path() {
        Ok(path) if path.exists() => check.note(CheckStatus::Pass, format!("Config file: {}", path.display())),
        Ok(path) => check.note(
            CheckStatus::Warn,
            format!("No config file at {}; using defaults", path.display()),
        ),
        Err(e) => check.note(CheckStatus::Warn, format!("Cannot locate config directory: {}", e)),
    }

    let empty: Vec<&str> = BUILTIN_SUITES
        .iter()
        .copied()
        .filter(|name| config.suites.get(*name).map_or(true, |c| c.values().all(Vec::is_empty)))
        .collect();
    if empty.is_empty() {
        check.note(CheckStatus::Pass, "Every built-in suite has test cases");
    } else {
        check.note(
            CheckStatus::Warn,
            format!("Built-in suites without test cases: {}", empty.join(", ")),
        );
    }

    for (name, enabled) in [(CHAOS_SUITE, config.run.chaos), (LOAD_SUITE, config.run.load_testing)] {
        if enabled {
            check.note(CheckStatus::Pass, format!("{} suite enabled", name));
        }
    }

    if config.run.max_processes == 0 {
        check.note(CheckStatus::Warn, "max_processes is 0; parallel runs will use a single worker");
    }

    check
}

/// False when a run would stop at validation
pub fn ready_to_run(checks: &[HealthCheck]) -> bool {
    !checks.iter().any(|c| c.gates_run && c.status == CheckStatus::Fail)
}

/// Weighted share of passing checks, 0-100. A warning earns half its check's weight.
pub fn calculate_health_score(checks: &[HealthCheck]) -> u32 {
    let total: u32 = checks.iter().map(|c| c.weight).sum();
    if total == 0 {
        return 0;
    }

    let earned: f64 = checks.iter().map(|c| c.weight as f64 * c.status.credit()).sum();
    (earned / total as f64 * 100.0).round() as u32
}

pub fn print_report(checks: &[HealthCheck]) {
    println!("\n{}", "━".repeat(60).bright_black());
    println!("{}", "suiterun Environment Health Check".bold().bright_white());
    println!("{}\n", "━".repeat(60).bright_black());

    for check in checks {
        let icon = match check.status {
            CheckStatus::Pass => "✅".green(),
            CheckStatus::Warn => "⚠️ ".yellow(),
            CheckStatus::Fail => "❌".red(),
        };
        let role = if check.gates_run { "required" } else { "advisory" };
        println!("{} {} {}", icon, check.category.bold(), format!("({})", role).bright_black());

        for note in &check.notes {
            match note.level {
                CheckStatus::Pass => println!("   • {}", note.message.bright_black()),
                CheckStatus::Warn => println!("   {} {}", "⚠".yellow(), note.message.yellow()),
                CheckStatus::Fail => println!("   {} {}", "✗".red(), note.message.red()),
            }
        }
        println!();
    }

    println!("{}", "━".repeat(60).bright_black());

    let score = calculate_health_score(checks);
    let score_text = match score {
        90.. => score.to_string().green(),
        70..=89 => score.to_string().yellow(),
        _ => score.to_string().red(),
    };
    println!("Health Score: {}/100", score_text.bold());

    let blocking: Vec<&str> = checks
        .iter()
        .filter(|c| c.gates_run && c.status == CheckStatus::Fail)
        .map(|c| c.category.as_str())
        .collect();
    let warnings: usize = checks.iter().map(|c| c.count(CheckStatus::Warn)).sum();

    if !blocking.is_empty() {
        println!("\n{} {}", "Runs will stop at validation:".red().bold(), blocking.join(", "));
    } else if warnings > 0 {
        println!("\n{} {} warning(s) to review", "Ready to run,".green(), warnings);
    } else {
        println!("{}", "Environment ready! 🎉".green().bold());
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StaticMemoryProbe;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_doctor_flags_low_memory() {
        let guard = EnvironmentGuard::in_memory(Arc::new(StaticMemoryProbe::with_available(megabytes(10))));
        let config = Config::default();

        let checks = run_doctor(&guard, &config).await.unwrap();
        let memory = checks.iter().find(|c| c.category == "Memory Headroom").unwrap();

        assert_eq!(memory.status, CheckStatus::Fail);
        assert!(memory.gates_run);
        assert_eq!(checks[0].status, CheckStatus::Pass);
        assert!(!ready_to_run(&checks));
        assert!(calculate_health_score(&checks) < 100);
    }

    #[test]
    fn test_health_score_weights_checks() {
        let mut storage = HealthCheck::gate("storage", 3);
        let mut config = HealthCheck::advisory("config", 1);
        assert_eq!(calculate_health_score(&[storage.clone(), config.clone()]), 100);

        config.note(CheckStatus::Warn, "no config file");
        assert_eq!(calculate_health_score(&[storage.clone(), config.clone()]), 88);
        assert!(ready_to_run(&[storage.clone(), config.clone()]));

        storage.note(CheckStatus::Fail, "connection refused");
        assert_eq!(calculate_health_score(&[storage.clone(), config.clone()]), 13);
        assert!(!ready_to_run(&[storage, config]));

        assert_eq!(calculate_health_score(&[]), 0);
    }

    #[test]
    fn test_advisory_failure_does_not_block_runs() {
        let mut config = HealthCheck::advisory("config", 1);
        config.note(CheckStatus::Fail, "unreadable");
        config.note(CheckStatus::Pass, "fallback to defaults");

        assert_eq!(config.status, CheckStatus::Fail);
        assert!(ready_to_run(&[config]));
    }
}
