//! Run lifecycle
//!
//! `Created -> Validating -> Optimizing -> Executing -> Aggregating -> Reporting -> TornDown`.
//! Any phase from Validating on may move to `Failed`, which still ends in teardown.
//! `run` always returns a report; errors never escape it.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::{self, FailureContext};
use crate::clock::{Clock, SystemClock};
use crate::config::{RunOptions, Thresholds};
use crate::environment::{EnvironmentGuard, EnvironmentSnapshot};
use crate::execution::{ExecutionStrategy, SuiteRunner};
use crate::history::{self, HistoryEntry};
use crate::metrics::MetricsRecorder;
use crate::registry::SuiteRegistry;
use crate::report::{self, AdvancedMetrics, AggregateReport, ExecutionContext, FailureReport, RunReport};
use crate::scoring::{self, Scores};
use crate::suite::panic_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Validating,
    Optimizing,
    Executing,
    Aggregating,
    Reporting,
    TornDown,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Created => "created",
            RunState::Validating => "validating",
            RunState::Optimizing => "optimizing",
            RunState::Executing => "executing",
            RunState::Aggregating => "aggregating",
            RunState::Reporting => "reporting",
            RunState::TornDown => "torn_down",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-run state. Closed (`end_time` set) during teardown.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub config: RunOptions,
    pub environment_snapshot: Option<EnvironmentSnapshot>,
    /// Stored history loaded at start when caching is on; the new entry is appended to it.
    pub history: Vec<HistoryEntry>,
    started: Instant,
}

impl RunContext {
    fn open(clock: &dyn Clock, config: RunOptions) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            start_time: clock.wall(),
            end_time: None,
            config,
            environment_snapshot: None,
            history: Vec::new(),
            started: clock.monotonic(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

struct PhaseFailure {
    phase: RunState,
    error: anyhow::Error,
}

impl PhaseFailure {
    fn new(phase: RunState, error: impl Into<anyhow::Error>) -> Self {
        Self {
            phase,
            error: error.into(),
        }
    }
}

pub struct Orchestrator {
    options: RunOptions,
    thresholds: Thresholds,
    registry: SuiteRegistry,
    guard: Arc<EnvironmentGuard>,
    clock: Arc<dyn Clock>,
    transitions: Vec<RunState>,
    last_run: Option<RunContext>,
}

impl Orchestrator {
    pub fn new(options: RunOptions, registry: SuiteRegistry, guard: Arc<EnvironmentGuard>) -> Self {
        Self {
            options,
            thresholds: Thresholds::default(),
            registry,
            guard,
            clock: Arc::new(SystemClock),
            transitions: Vec::new(),
            last_run: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn state(&self) -> RunState {
        self.transitions.last().copied().unwrap_or(RunState::Created)
    }

    /// States visited by the most recent run, in order
    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    pub fn last_run(&self) -> Option<&RunContext> {
        self.last_run.as_ref()
    }

    pub async fn run(&mut self) -> RunReport {
        let mut context = RunContext::open(self.clock.as_ref(), self.options.clone());
        let span = info_span!("run", session_id = %context.session_id);

        let report = self.run_in_context(&mut context).instrument(span).await;
        self.last_run = Some(context);
        report
    }

    async fn run_in_context(&mut self, context: &mut RunContext) -> RunReport {
        self.transitions.clear();
        self.transition(RunState::Created);

        info!(
            session_id = %context.session_id,
            parallel = self.options.parallel,
            "Starting comprehensive test run"
        );

        if self.options.caching {
            match history::load(self.guard.persistent_cache().as_ref()).await {
                Ok(entries) => {
                    debug!(entries = entries.len(), "Loaded test history");
                    context.history = entries;
                }
                Err(e) => warn!(error = %e, "Could not load test history"),
            }
        }

        let phases = AssertUnwindSafe(self.run_phases(context)).catch_unwind().await;
        let outcome = phases.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            Err(PhaseFailure::new(self.state(), anyhow::anyhow!("panicked: {}", message)))
        });

        let report = match outcome {
            Ok(report) => RunReport::Completed(Box::new(report)),
            Err(failure) => {
                self.transition(RunState::Failed);
                RunReport::Failed(Box::new(self.failure_report(context, failure)))
            }
        };

        self.teardown(context, &report).await;
        report
    }

    async fn run_phases(&mut self, context: &mut RunContext) -> Result<AggregateReport, PhaseFailure> {
        self.transition(RunState::Validating);
        self.guard
            .validate(self.options.memory_limit_bytes())
            .await
            .map_err(|e| PhaseFailure::new(RunState::Validating, e))?;

        self.transition(RunState::Optimizing);
        // Restores the previous settings when this function returns, on every path
        let _optimization = self.guard.optimize(&self.options);
        context.environment_snapshot = Some(self.guard.snapshot(self.clock.wall()));

        self.transition(RunState::Executing);
        let descriptors = self.registry.resolve(&self.options.groups);
        let strategy = ExecutionStrategy::from_options(&self.options);
        let runner = SuiteRunner::new(Arc::clone(&self.clock), self.guard.probe())
            .with_suite_timeout(self.options.suite_timeout());
        let mut recorder = if self.options.real_time_monitoring {
            MetricsRecorder::new().with_real_time_monitoring()
        } else {
            MetricsRecorder::new()
        };

        info!(
            session_id = %context.session_id,
            strategy = strategy.name(),
            suites = descriptors.len(),
            "Executing test suites"
        );
        let outcome = strategy
            .run(descriptors, &mut recorder, &runner)
            .await
            .map_err(|e| PhaseFailure::new(RunState::Executing, e))?;

        self.transition(RunState::Aggregating);
        let (records, real_time) = recorder.into_parts();
        let scores = Scores::from_records(&records);
        let coverage = scoring::coverage(&records);
        let recommendations = report::recommendations(&scores, coverage, &self.thresholds);

        let probe = self.guard.probe();
        let peak_memory_bytes = records
            .iter()
            .map(|r| r.peak_memory_bytes)
            .chain(std::iter::once(probe.peak_bytes()))
            .max()
            .unwrap_or(0);

        let advanced_metrics = AdvancedMetrics {
            peak_memory_bytes,
            optimization_suggestions: analysis::optimization_suggestions(
                &scores,
                self.thresholds.performance,
                peak_memory_bytes,
                self.options.memory_limit_bytes(),
            ),
            threshold_violations: analysis::threshold_violations(&records, self.options.max_execution_time_ms),
            failure_analysis: self
                .options
                .failure_analysis
                .then(|| analysis::analyze_failures(&records, &FailureContext::capture(probe.as_ref()))),
            real_time,
        };

        self.transition(RunState::Reporting);
        let end_time = self.clock.wall();
        let execution_context = ExecutionContext {
            session_id: context.session_id,
            start_time: context.start_time,
            end_time,
            duration_ms: self
                .clock
                .monotonic()
                .saturating_duration_since(context.started)
                .as_secs_f64()
                * 1000.0,
            strategy: strategy.name().to_string(),
            pools: outcome.pools,
            timed_out_suites: outcome.timed_out_suites,
            environment: context
                .environment_snapshot
                .clone()
                .unwrap_or_else(|| self.guard.snapshot(end_time)),
            config: self.options.clone(),
        };

        let report = report::assemble(
            records,
            scores,
            coverage,
            recommendations,
            advanced_metrics,
            execution_context,
        );

        info!(
            session_id = %context.session_id,
            total = report.summary.total_tests,
            passed = report.summary.passed,
            failed = report.summary.failed,
            "Comprehensive test run completed"
        );
        Ok(report)
    }

    fn failure_report(&self, context: &RunContext, failure: PhaseFailure) -> FailureReport {
        let message = format!("{:#}", failure.error);
        error!(
            session_id = %context.session_id,
            phase = %failure.phase,
            error = %message,
            "Comprehensive test run failed"
        );

        FailureReport {
            error: message,
            trace: format!("{:?}", failure.error),
            phase: failure.phase.to_string(),
            context: FailureContext::capture(self.guard.probe().as_ref()),
            config: self.options.clone(),
            session_id: context.session_id,
            timestamp: self.clock.wall(),
        }
    }

    async fn teardown(&mut self, context: &mut RunContext, report: &RunReport) {
        self.guard.teardown();
        context.end_time = Some(self.clock.wall());

        if self.options.caching {
            if let RunReport::Completed(completed) = report {
                context.history.push(HistoryEntry {
                    session_id: context.session_id,
                    timestamp: completed.execution_context.end_time,
                    summary: completed.summary.clone(),
                    records: completed.records.clone(),
                });
                history::trim(&mut context.history);
                match history::store(self.guard.persistent_cache().as_ref(), &context.history).await {
                    Ok(()) => debug!(entries = context.history.len(), "Stored test history"),
                    Err(e) => warn!(error = %e, "Could not store test history"),
                }
            }
        }

        self.transition(RunState::TornDown);
        info!(session_id = %context.session_id, "Test environment teardown completed");
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = %self.state(), to = %next, "Run state transition");
        self.transitions.push(next);
    }
}
