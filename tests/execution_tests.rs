use anyhow::anyhow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use suiterun::clock::SystemClock;
use suiterun::error::SuiteError;
use suiterun::execution::{partition, ExecutionStrategy, SuiteRunner};
use suiterun::memory::StaticMemoryProbe;
use suiterun::metrics::{MetricsRecorder, SuiteStatus};
use suiterun::registry::{ResultMap, SuiteDescriptor};

mod common;
use common::category_result;

fn runner() -> SuiteRunner {
    SuiteRunner::new(
        Arc::new(SystemClock),
        Arc::new(StaticMemoryProbe {
            current: 1024,
            peak: 4096,
            available: None,
        }),
    )
}

fn ok(name: &str) -> SuiteDescriptor {
    let result = category_result(name, 1, 0, 1.0);
    SuiteDescriptor::new(name, true, move || {
        let result = result.clone();
        async move { anyhow::Ok(result) }
    })
}

fn sleeping(name: &str, delay: Duration) -> SuiteDescriptor {
    SuiteDescriptor::new(name, true, move || async move {
        tokio::time::sleep(delay).await;
        anyhow::Ok(ResultMap::new())
    })
}

#[test]
fn test_partitions_are_disjoint_and_cover_everything() {
    for n in 0..40usize {
        for workers in 1..10usize {
            let pools = partition((0..n).collect::<Vec<_>>(), workers);

            assert!(pools.len() <= workers);
            assert!(pools.iter().all(|p| !p.is_empty()));

            let flattened: Vec<usize> = pools.iter().flatten().copied().collect();
            assert_eq!(flattened, (0..n).collect::<Vec<_>>());

            let unique: HashSet<usize> = flattened.iter().copied().collect();
            assert_eq!(unique.len(), n);
        }
    }
}

#[tokio::test]
async fn test_sequential_invokes_each_descriptor_once_in_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut descriptors = Vec::new();
    for name in ["a", "b", "c"] {
        let calls = Arc::clone(&calls);
        descriptors.push(SuiteDescriptor::new(name, true, move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Ok(ResultMap::new()) }
        }));
    }

    let mut recorder = MetricsRecorder::new();
    let outcome = ExecutionStrategy::Sequential
        .run(descriptors, &mut recorder, &runner())
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.pools, 1);
    let order: Vec<&str> = recorder.records().iter().map(|r| r.suite_name.as_str()).collect();
    assert_eq!(order, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_errors_and_panics_become_failed_records() {
    let descriptors = vec![
        ok("before"),
        SuiteDescriptor::new("erroring", true, || async {
            Err::<ResultMap, _>(anyhow!("assertion failed: left != right"))
        }),
        SuiteDescriptor::new("panicking", true, || async {
            if true {
                panic!("index out of bounds");
            }
            anyhow::Ok(ResultMap::new())
        }),
        ok("after"),
    ];

    let mut recorder = MetricsRecorder::new();
    ExecutionStrategy::Sequential
        .run(descriptors, &mut recorder, &runner())
        .await
        .unwrap();

    assert_eq!(recorder.len(), 4);
    assert_eq!(recorder.passed(), 2);

    let erroring = recorder.get("erroring").unwrap();
    assert_eq!(erroring.status(), SuiteStatus::Failed);
    assert!(erroring.error().unwrap().message.contains("assertion failed"));
    assert!(erroring.result().is_none());

    let panicking = recorder.get("panicking").unwrap().error().unwrap();
    assert!(panicking.message.contains("panicked"));
    assert!(panicking.message.contains("index out of bounds"));
    assert!(!panicking.trace.is_empty());

    assert!(recorder.get("after").unwrap().is_success());
}

#[tokio::test]
async fn test_record_captures_memory_figures() {
    let mut recorder = MetricsRecorder::new();
    ExecutionStrategy::Sequential
        .run(vec![ok("unit")], &mut recorder, &runner())
        .await
        .unwrap();

    let record = recorder.get("unit").unwrap();
    assert_eq!(record.memory_delta_bytes, 0);
    assert_eq!(record.peak_memory_bytes, 4096);
    assert!(record.ended_at >= record.started_at);
    assert!(record.duration_ms >= 0.0);
}

#[tokio::test]
async fn test_suite_timeout_fails_only_the_slow_suite() {
    let runner = runner().with_suite_timeout(Some(Duration::from_millis(50)));
    let descriptors = vec![sleeping("slow", Duration::from_secs(10)), ok("fast")];

    let mut recorder = MetricsRecorder::new();
    ExecutionStrategy::Sequential
        .run(descriptors, &mut recorder, &runner)
        .await
        .unwrap();

    let slow = recorder.get("slow").unwrap();
    assert_eq!(slow.status(), SuiteStatus::Failed);
    assert!(slow.error().unwrap().message.contains("timed out"));
    assert!(recorder.get("fast").unwrap().is_success());
}

#[tokio::test]
async fn test_parallel_timeout_keeps_finished_records() {
    // Two pools: [a, b] and [stuck, c]
    let descriptors = vec![
        ok("a"),
        ok("b"),
        sleeping("stuck", Duration::from_secs(30)),
        ok("c"),
    ];
    let strategy = ExecutionStrategy::BoundedParallel {
        max_workers: 2,
        timeout: Duration::from_millis(300),
    };

    let mut recorder = MetricsRecorder::new();
    let outcome = strategy.run(descriptors, &mut recorder, &runner()).await.unwrap();

    assert_eq!(outcome.pools, 2);
    assert!(recorder.get("a").is_some());
    assert!(recorder.get("b").is_some());
    assert!(recorder.get("stuck").is_none());
    assert_eq!(outcome.timed_out_suites, vec!["stuck".to_string(), "c".to_string()]);
}

#[tokio::test]
async fn test_parallel_failures_do_not_stop_other_pools() {
    let descriptors = vec![
        ok("a"),
        SuiteDescriptor::new("broken", true, || async {
            Err::<ResultMap, _>(anyhow!("boom"))
        }),
        ok("c"),
        ok("d"),
    ];
    let strategy = ExecutionStrategy::BoundedParallel {
        max_workers: 4,
        timeout: Duration::from_secs(30),
    };

    let mut recorder = MetricsRecorder::new();
    let outcome = strategy.run(descriptors, &mut recorder, &runner()).await.unwrap();

    assert_eq!(outcome.pools, 4);
    assert_eq!(recorder.len(), 4);
    assert_eq!(recorder.failed(), 1);
    assert!(outcome.timed_out_suites.is_empty());
}

#[tokio::test]
async fn test_duplicate_descriptor_names_are_rejected() {
    let mut recorder = MetricsRecorder::new();
    let err = ExecutionStrategy::Sequential
        .run(vec![ok("unit"), ok("unit")], &mut recorder, &runner())
        .await
        .unwrap_err();

    assert!(matches!(err, SuiteError::DuplicateSuite { ref name } if name == "unit"));
    assert!(recorder.is_empty());
}
