//! Case-level suite bodies
//!
//! A suite body is a list of categories, each holding test cases. Running the
//! categories produces a result map of category name -> [`CategoryReport`], which
//! is exactly the per-category shape the scorers read.

use anyhow::{anyhow, bail, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;

use crate::registry::{ResultMap, SuiteFuture};

pub type CaseFuture = BoxFuture<'static, Result<()>>;

#[derive(Clone)]
pub struct TestCase {
    name: String,
    body: Arc<dyn Fn() -> CaseFuture + Send + Sync>,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

impl TestCase {
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move || body().boxed()),
        }
    }

    /// A case that passes when the shell command exits successfully.
    pub fn command(command: impl Into<String>) -> Self {
        let command = command.into();
        let name = command.clone();
        Self::new(name, move || run_command(command.clone()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the case, turning a panic into an error
    pub async fn run(&self) -> Result<()> {
        let future = std::panic::catch_unwind(AssertUnwindSafe(|| (self.body)()))
            .map_err(|payload| anyhow!("panicked: {}", panic_message(payload.as_ref())))?;

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Category {
    name: String,
    cases: Vec<TestCase>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
        }
    }

    pub fn from_commands<I, S>(name: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            cases: commands.into_iter().map(TestCase::command).collect(),
        }
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    pub fn push(&mut self, case: TestCase) {
        self.cases.push(case);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub status: CaseStatus,
    pub error: Option<String>,
    /// Milliseconds
    pub execution_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub suite_name: String,
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    /// Mean case time in milliseconds; absent for a category without cases
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_execution_time: Option<f64>,
    pub test_results: BTreeMap<String, CaseResult>,
}

pub async fn run_category(category: &Category) -> CategoryReport {
    let mut report = CategoryReport {
        suite_name: category.name.clone(),
        total_tests: category.cases.len(),
        passed: 0,
        failed: 0,
        average_execution_time: None,
        test_results: BTreeMap::new(),
    };
    let mut total_ms = 0.0;

    for case in &category.cases {
        let start = Instant::now();
        let outcome = case.run().await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        total_ms += elapsed_ms;

        let result = match outcome {
            Ok(()) => {
                report.passed += 1;
                CaseResult {
                    status: CaseStatus::Passed,
                    error: None,
                    execution_time: elapsed_ms,
                }
            }
            Err(e) => {
                report.failed += 1;
                CaseResult {
                    status: CaseStatus::Failed,
                    error: Some(format!("{:#}", e)),
                    execution_time: elapsed_ms,
                }
            }
        };
        report.test_results.insert(case.name.clone(), result);
    }

    if !category.cases.is_empty() {
        report.average_execution_time = Some(total_ms / category.cases.len() as f64);
    }

    report
}

pub async fn run_categories(categories: &[Category]) -> Result<ResultMap> {
    let mut results = ResultMap::new();
    for category in categories {
        let report = run_category(category).await;
        results.insert(category.name.clone(), serde_json::to_value(report)?);
    }
    Ok(results)
}

/// Wrap categories into a zero-argument suite body.
pub fn category_suite(categories: Vec<Category>) -> impl Fn() -> SuiteFuture + Send + Sync + 'static {
    let categories = Arc::new(categories);
    move || {
        let categories = Arc::clone(&categories);
        async move { run_categories(&categories).await }.boxed()
    }
}

async fn run_command(command: String) -> Result<()> {
    let mut process = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(&command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        cmd
    };

    let output = process
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| anyhow!("failed to spawn `{}`: {}", command, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        bail!("`{}` exited with {}: {}", command, output.status, last_line.trim());
    }

    Ok(())
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
