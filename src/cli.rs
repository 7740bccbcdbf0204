use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::RunOptions;

#[derive(Parser)]
#[command(
    name = "suiterun",
    version,
    about = "Test-suite orchestration and aggregate scoring",
    long_about = "Runs named test suites sequentially or in a bounded worker pool, records timing and memory for each suite, and reduces the results into performance, security, integration and coverage scores."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the registered test suites and print the aggregate report
    Run(RunArgs),

    /// List registered suites and whether they would run
    #[command(alias = "ls")]
    Suites {
        /// Include suites that are disabled by the current options
        #[arg(long)]
        all: bool,
    },

    /// Check storage, cache and memory without running anything
    Doctor,

    /// Show stored run history
    History {
        /// Number of most recent runs to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions for suiterun
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags for `run`; each one set on the command line overrides the config file.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Run suites in a bounded worker pool
    #[arg(short, long)]
    pub parallel: bool,

    /// Maximum concurrent pools
    #[arg(long)]
    pub max_processes: Option<usize>,

    /// Overall timeout in seconds for parallel runs
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Per-suite timeout in seconds
    #[arg(long)]
    pub suite_timeout: Option<u64>,

    /// Memory floor in megabytes checked before the run
    #[arg(long)]
    pub memory_limit: Option<u64>,

    /// Only run these suites (repeatable)
    #[arg(short, long = "group")]
    pub groups: Vec<String>,

    /// Keep suite logging on while running
    #[arg(long)]
    pub debug: bool,

    /// Enable the chaos suite
    #[arg(long)]
    pub chaos: bool,

    /// Enable the load suite
    #[arg(long)]
    pub load: bool,

    /// Attach failure analysis to the report
    #[arg(long)]
    pub analyze_failures: bool,

    /// Record real-time memory and response-time samples
    #[arg(long)]
    pub monitor: bool,

    /// Store this run in the history
    #[arg(long)]
    pub cache: bool,

    /// Skip environment optimization
    #[arg(long)]
    pub no_optimize: bool,

    /// Write JSON, markdown and CSV reports to the report directory
    #[arg(long)]
    pub save: bool,
}

impl RunArgs {
    pub fn apply(&self, options: &mut RunOptions) {
        options.parallel |= self.parallel;
        options.debug |= self.debug;
        options.chaos |= self.chaos;
        options.load_testing |= self.load;
        options.failure_analysis |= self.analyze_failures;
        options.real_time_monitoring |= self.monitor;
        options.caching |= self.cache;
        if self.no_optimize {
            options.optimization = false;
        }

        if let Some(max) = self.max_processes {
            options.max_processes = max;
        }
        if let Some(timeout) = self.timeout {
            options.timeout_seconds = timeout;
        }
        if let Some(timeout) = self.suite_timeout {
            options.suite_timeout_seconds = Some(timeout);
        }
        if let Some(limit) = self.memory_limit {
            options.memory_limit_mb = limit;
        }
        if !self.groups.is_empty() {
            options.groups = self.groups.iter().cloned().collect();
        }
    }
}
