use std::collections::{BTreeMap, BTreeSet};

use suiterun::config::RunOptions;
use suiterun::error::SuiteError;
use suiterun::registry::{catalog_from_commands, ResultMap, SuiteCatalog, SuiteRegistry, BUILTIN_SUITES};
use suiterun::suite::{Category, TestCase};

fn groups(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn names(registry: &SuiteRegistry, requested: &[&str]) -> Vec<String> {
    registry
        .resolve(&groups(requested))
        .iter()
        .map(|d| d.name().to_string())
        .collect()
}

#[test]
fn test_resolve_single_group() {
    let registry = SuiteRegistry::builtin(&RunOptions::default(), SuiteCatalog::new()).unwrap();
    assert_eq!(names(&registry, &["unit"]), vec!["unit"]);
}

#[test]
fn test_builtins_run_in_fixed_order_without_optional_suites() {
    let registry = SuiteRegistry::builtin(&RunOptions::default(), SuiteCatalog::new()).unwrap();

    assert_eq!(registry.len(), BUILTIN_SUITES.len() + 2);
    assert_eq!(names(&registry, &[]), BUILTIN_SUITES.to_vec());
    assert!(registry.contains("chaos"));
    assert!(registry.contains("load"));
}

#[test]
fn test_chaos_and_load_are_opt_in() {
    let options = RunOptions {
        chaos: true,
        load_testing: true,
        ..RunOptions::default()
    };
    let registry = SuiteRegistry::builtin(&options, SuiteCatalog::new()).unwrap();
    let resolved = names(&registry, &[]);

    assert_eq!(resolved.len(), BUILTIN_SUITES.len() + 2);
    assert_eq!(resolved[resolved.len() - 2..], ["chaos", "load"]);

    let only_chaos = RunOptions {
        chaos: true,
        ..RunOptions::default()
    };
    let registry = SuiteRegistry::builtin(&only_chaos, SuiteCatalog::new()).unwrap();
    assert!(names(&registry, &["load"]).is_empty());
    assert_eq!(names(&registry, &["chaos"]), vec!["chaos"]);
}

#[test]
fn test_unknown_groups_are_dropped() {
    let registry = SuiteRegistry::builtin(&RunOptions::default(), SuiteCatalog::new()).unwrap();

    assert!(names(&registry, &["nonexistent"]).is_empty());
    assert_eq!(names(&registry, &["api", "nonexistent", "unit"]), vec!["unit", "api"]);
}

#[test]
fn test_duplicate_registration_fails() {
    let mut registry = SuiteRegistry::new();
    registry
        .register("unit", true, || async { anyhow::Ok(ResultMap::new()) })
        .unwrap();

    let err = registry
        .register("unit", false, || async { anyhow::Ok(ResultMap::new()) })
        .unwrap_err();

    assert!(matches!(err, SuiteError::DuplicateSuite { ref name } if name == "unit"));
    assert_eq!(registry.len(), 1);
    assert!(registry.descriptors()[0].enabled());
}

#[test]
fn test_extra_catalog_suites_follow_builtins() {
    let mut catalog = SuiteCatalog::new();
    catalog.insert("smoke".to_string(), vec![Category::new("boot")]);

    let registry = SuiteRegistry::builtin(&RunOptions::default(), catalog).unwrap();
    let resolved = names(&registry, &[]);

    assert_eq!(resolved.last().map(String::as_str), Some("smoke"));
}

#[tokio::test]
async fn test_builtin_bodies_run_their_categories() {
    let mut catalog = SuiteCatalog::new();
    catalog.insert(
        "security".to_string(),
        vec![Category::new("auth")
            .with_case(TestCase::new("rejects_bad_token", || async { anyhow::Ok(()) }))
            .with_case(TestCase::new("rejects_expired", || async { anyhow::Ok(()) }))],
    );

    let registry = SuiteRegistry::builtin(&RunOptions::default(), catalog).unwrap();
    let security = registry.resolve(&groups(&["security"])).remove(0);
    let result = security.invoke().await.unwrap();

    assert_eq!(result["auth"]["passed"], 2);
    assert_eq!(result["auth"]["failed"], 0);

    let unit = registry.resolve(&groups(&["unit"])).remove(0);
    assert!(unit.invoke().await.unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_catalog_from_config_table() {
    let mut categories = BTreeMap::new();
    categories.insert("shell".to_string(), vec!["true".to_string(), "false".to_string()]);
    let mut suites = BTreeMap::new();
    suites.insert("integration".to_string(), categories);

    let registry = SuiteRegistry::builtin(&RunOptions::default(), catalog_from_commands(&suites)).unwrap();
    let integration = registry.resolve(&groups(&["integration"])).remove(0);
    let result = integration.invoke().await.unwrap();

    assert_eq!(result["shell"]["total_tests"], 2);
    assert_eq!(result["shell"]["passed"], 1);
    assert_eq!(result["shell"]["test_results"]["false"]["status"], "failed");
}
