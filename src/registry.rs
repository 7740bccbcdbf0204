//! Suite registration and resolution.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::config::RunOptions;
use crate::error::{Result, SuiteError};
use crate::suite::{category_suite, Category};

pub type ResultMap = serde_json::Map<String, Value>;
pub type SuiteFuture = BoxFuture<'static, anyhow::Result<ResultMap>>;
pub type SuiteFn = Arc<dyn Fn() -> SuiteFuture + Send + Sync>;

/// Suites registered on every run, in execution order
pub const BUILTIN_SUITES: [&str; 8] = [
    "unit",
    "integration",
    "performance",
    "security",
    "api",
    "database",
    "error_handling",
    "validation",
];
pub const CHAOS_SUITE: &str = "chaos";
pub const LOAD_SUITE: &str = "load";

/// Suite bodies for the built-ins (and any extra suites), keyed by suite name
pub type SuiteCatalog = BTreeMap<String, Vec<Category>>;

#[derive(Clone)]
pub struct SuiteDescriptor {
    name: String,
    enabled: bool,
    invoke: SuiteFn,
}

impl fmt::Debug for SuiteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuiteDescriptor")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl SuiteDescriptor {
    pub fn new<F, Fut>(name: impl Into<String>, enabled: bool, invoke: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ResultMap>> + Send + 'static,
    {
        Self {
            name: name.into(),
            enabled,
            invoke: Arc::new(move || invoke().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn invoke(&self) -> SuiteFuture {
        (self.invoke)()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuiteRegistry {
    descriptors: Vec<SuiteDescriptor>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard registry: the eight built-ins, then `chaos` and `load` gated by the
    /// run options, then any extra suites found in the catalog.
    pub fn builtin(options: &RunOptions, mut catalog: SuiteCatalog) -> Result<Self> {
        let mut registry = Self::new();

        for name in BUILTIN_SUITES {
            let categories = catalog.remove(name).unwrap_or_default();
            registry.register(name, true, category_suite(categories))?;
        }

        let chaos = catalog.remove(CHAOS_SUITE).unwrap_or_default();
        registry.register(CHAOS_SUITE, options.chaos, category_suite(chaos))?;

        let load = catalog.remove(LOAD_SUITE).unwrap_or_default();
        registry.register(LOAD_SUITE, options.load_testing, category_suite(load))?;

        for (name, categories) in catalog {
            registry.register(name, true, category_suite(categories))?;
        }

        Ok(registry)
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, enabled: bool, invoke: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ResultMap>> + Send + 'static,
    {
        self.register_descriptor(SuiteDescriptor::new(name, enabled, invoke))
    }

    pub fn register_descriptor(&mut self, descriptor: SuiteDescriptor) -> Result<()> {
        if self.contains(descriptor.name()) {
            return Err(SuiteError::DuplicateSuite {
                name: descriptor.name,
            });
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Enabled descriptors in registration order, narrowed to `groups` when it is non-empty.
    /// Names in `groups` that match nothing are dropped.
    pub fn resolve(&self, groups: &BTreeSet<String>) -> Vec<SuiteDescriptor> {
        if !groups.is_empty() {
            let unknown: Vec<&str> = groups
                .iter()
                .filter(|g| !self.contains(g))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                debug!(groups = ?unknown, "Ignoring unknown suite groups");
            }
        }

        self.descriptors
            .iter()
            .filter(|d| d.enabled)
            .filter(|d| groups.is_empty() || groups.contains(&d.name))
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.iter().any(|d| d.name == name)
    }

    pub fn descriptors(&self) -> &[SuiteDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Turn the `[suites]` table of the config file into a catalog of command cases.
pub fn catalog_from_commands(suites: &BTreeMap<String, BTreeMap<String, Vec<String>>>) -> SuiteCatalog {
    suites
        .iter()
        .map(|(suite, categories)| {
            let categories = categories
                .iter()
                .map(|(category, commands)| Category::from_commands(category.clone(), commands.clone()))
                .collect();
            (suite.clone(), categories)
        })
        .collect()
}
