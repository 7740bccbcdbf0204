use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("Environment validation failed ({check}): {message}")]
    Validation { check: String, message: String },

    /// Stored as a failed record; never aborts the run
    #[error("Suite '{suite}' failed: {message}")]
    SuiteExecution { suite: String, message: String, trace: String },

    #[error("Parallel execution timed out after {timeout:?} with {pending} suite(s) unfinished")]
    Timeout { timeout: Duration, pending: usize },

    #[error("Suite already registered: {name}")]
    DuplicateSuite { name: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SuiteError {
    pub fn validation(check: impl Into<String>, message: impl Into<String>) -> Self {
        SuiteError::Validation {
            check: check.into(),
            message: message.into(),
        }
    }

    pub fn suite_execution(suite: impl Into<String>, message: impl Into<String>, trace: impl Into<String>) -> Self {
        SuiteError::SuiteExecution {
            suite: suite.into(),
            message: message.into(),
            trace: trace.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SuiteError>;
