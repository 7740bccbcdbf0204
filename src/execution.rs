//! Suite execution strategies
//!
//! Sequential runs descriptors in order. BoundedParallel splits them into contiguous
//! pools, one tokio task per pool, and fans records back in over a channel so the
//! recorder keeps a single writer. Suite failures and panics never escape: they are
//! stored as `Failed` records.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::config::RunOptions;
use crate::error::{Result, SuiteError};
use crate::memory::MemoryProbe;
use crate::metrics::{MetricsRecorder, SuiteExecutionRecord, SuiteOutcome};
use crate::registry::{ResultMap, SuiteDescriptor};
use crate::suite::panic_message;

/// Runs one descriptor and measures it.
#[derive(Debug, Clone)]
pub struct SuiteRunner {
    clock: Arc<dyn Clock>,
    probe: Arc<dyn MemoryProbe>,
    suite_timeout: Option<Duration>,
}

impl SuiteRunner {
    pub fn new(clock: Arc<dyn Clock>, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            clock,
            probe,
            suite_timeout: None,
        }
    }

    pub fn with_suite_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.suite_timeout = timeout;
        self
    }

    pub async fn execute(&self, descriptor: &SuiteDescriptor) -> SuiteExecutionRecord {
        let started_at = self.clock.wall();
        let start = self.clock.monotonic();
        let start_memory = self.probe.current_bytes();

        debug!(suite = descriptor.name(), "Running suite");

        let outcome = match invoke_guarded(descriptor, self.suite_timeout).await {
            Ok(result) => SuiteOutcome::Success { result },
            Err(e) => {
                warn!(suite = descriptor.name(), error = %e, "Suite failed");
                SuiteOutcome::Failed { error: e.into() }
            }
        };

        let duration = self.clock.monotonic().saturating_duration_since(start);
        let end_memory = self.probe.current_bytes();

        SuiteExecutionRecord {
            suite_name: descriptor.name().to_string(),
            started_at,
            ended_at: self.clock.wall(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            memory_delta_bytes: end_memory as i64 - start_memory as i64,
            peak_memory_bytes: self.probe.peak_bytes(),
            outcome,
        }
    }
}

async fn invoke_guarded(descriptor: &SuiteDescriptor, timeout: Option<Duration>) -> Result<ResultMap> {
    let name = descriptor.name();

    let future = std::panic::catch_unwind(AssertUnwindSafe(|| descriptor.invoke()))
        .map_err(|payload| panic_failure(name, panic_message(payload.as_ref())))?;
    let guarded = AssertUnwindSafe(future).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(SuiteError::suite_execution(
                    name,
                    format!("suite '{}' timed out after {:?}", name, limit),
                    format!("{} <timed out after {:?}>", name, limit),
                ))
            }
        },
        None => guarded.await,
    };

    match outcome {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => {
            let mut message = format!("{:#}", e);
            if message.trim().is_empty() {
                message = format!("suite '{}' failed without a message", name);
            }
            Err(SuiteError::suite_execution(name, message, format!("{:?}", e)))
        }
        Err(payload) => Err(panic_failure(name, panic_message(payload.as_ref()))),
    }
}

fn panic_failure(suite: &str, message: String) -> SuiteError {
    SuiteError::suite_execution(
        suite,
        format!("panicked: {}", message),
        format!("panicked in suite '{}': {}", suite, message),
    )
}

/// Split into at most `max_workers` contiguous chunks of `ceil(n / max_workers)`.
pub fn partition<T>(items: Vec<T>, max_workers: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let chunk = items.len().div_ceil(max_workers.max(1));
    let mut pools = Vec::new();
    let mut iter = items.into_iter();
    loop {
        let pool: Vec<T> = iter.by_ref().take(chunk).collect();
        if pool.is_empty() {
            break;
        }
        pools.push(pool);
    }
    pools
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Sequential,
    BoundedParallel { max_workers: usize, timeout: Duration },
}

/// What the strategy observed beyond the records themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub pools: usize,
    pub timed_out_suites: Vec<String>,
}

impl ExecutionStrategy {
    pub fn from_options(options: &RunOptions) -> Self {
        if options.parallel {
            ExecutionStrategy::BoundedParallel {
                max_workers: options.worker_count(),
                timeout: options.timeout(),
            }
        } else {
            ExecutionStrategy::Sequential
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::BoundedParallel { .. } => "bounded_parallel",
        }
    }

    pub async fn run(
        &self,
        descriptors: Vec<SuiteDescriptor>,
        recorder: &mut MetricsRecorder,
        runner: &SuiteRunner,
    ) -> Result<ExecutionOutcome> {
        ensure_unique(&descriptors)?;

        match *self {
            ExecutionStrategy::Sequential => {
                for descriptor in &descriptors {
                    let record = runner.execute(descriptor).await;
                    recorder.record(record)?;
                }
                Ok(ExecutionOutcome {
                    pools: usize::from(!descriptors.is_empty()),
                    timed_out_suites: Vec::new(),
                })
            }
            ExecutionStrategy::BoundedParallel {
                max_workers,
                timeout,
            } => run_parallel(descriptors, recorder, runner, max_workers, timeout).await,
        }
    }
}

fn ensure_unique(descriptors: &[SuiteDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();
    for descriptor in descriptors {
        if !seen.insert(descriptor.name()) {
            return Err(SuiteError::DuplicateSuite {
                name: descriptor.name().to_string(),
            });
        }
    }
    Ok(())
}

async fn run_parallel(
    descriptors: Vec<SuiteDescriptor>,
    recorder: &mut MetricsRecorder,
    runner: &SuiteRunner,
    max_workers: usize,
    timeout: Duration,
) -> Result<ExecutionOutcome> {
    let expected: Vec<String> = descriptors.iter().map(|d| d.name().to_string()).collect();
    let pools = partition(descriptors, max_workers);
    let pool_count = pools.len();

    let (tx, mut rx) = mpsc::unbounded_channel::<SuiteExecutionRecord>();
    let mut tasks = JoinSet::new();

    for (index, pool) in pools.into_iter().enumerate() {
        let tx = tx.clone();
        let runner = runner.clone();
        tasks.spawn(async move {
            for descriptor in pool {
                let record = runner.execute(&descriptor).await;
                if tx.send(record).is_err() {
                    break;
                }
            }
            debug!(pool = index, "Pool completed");
        });
    }
    drop(tx);

    let collected = tokio::time::timeout(timeout, async {
        while let Some(record) = rx.recv().await {
            recorder.record(record)?;
        }
        Ok::<(), SuiteError>(())
    })
    .await;

    match collected {
        Ok(result) => {
            result?;
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Pool task ended abnormally");
                }
            }
        }
        Err(_) => {
            tasks.shutdown().await;
            while let Ok(record) = rx.try_recv() {
                recorder.record(record)?;
            }
        }
    }

    let timed_out_suites: Vec<String> = expected
        .into_iter()
        .filter(|name| recorder.get(name).is_none())
        .collect();

    if !timed_out_suites.is_empty() {
        let err = SuiteError::Timeout {
            timeout,
            pending: timed_out_suites.len(),
        };
        warn!(suites = ?timed_out_suites, "{}", err);
    }

    Ok(ExecutionOutcome {
        pools: pool_count,
        timed_out_suites,
    })
}
