//! Scheduler boundary behavior

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use weft_llm::{LlmError, LlmProvider, MockProvider};
use weft_runtime::{Coordinator, CoordinatorConfig, JoinMode};

fn coordinator(workers: usize) -> Coordinator {
    Coordinator::new(CoordinatorConfig {
        workers,
        ..CoordinatorConfig::default()
    })
}

/// Tracks how many completions run at once.
#[derive(Debug, Default)]
struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl LlmProvider for ConcurrencyProbe {
    async fn complete(&self, prompt: &str, _role: Option<&str>) -> Result<String, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(prompt.to_string())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_worker_serializes_llm_calls() {
    let coordinator = coordinator(1);
    let probe = Arc::new(ConcurrencyProbe::default());
    coordinator.use_llm(probe.clone(), true);

    let tasks: Vec<_> = (0..5)
        .map(|i| coordinator.gen(format!("t{i}"), format!("p{i}"), "X").schedule())
        .collect();
    let results = coordinator.join(&tasks, JoinMode::All, None).await;

    assert_eq!(results.len(), 5);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn multiple_workers_overlap_llm_calls() {
    let coordinator = coordinator(4);
    let probe = Arc::new(ConcurrencyProbe::default());
    coordinator.use_llm(probe.clone(), true);

    let tasks: Vec<_> = (0..8)
        .map(|i| coordinator.gen(format!("t{i}"), format!("p{i}"), "X").schedule())
        .collect();
    coordinator.join(&tasks, JoinMode::All, None).await;

    assert!(probe.peak.load(Ordering::SeqCst) > 1);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_retries_failing_contract_yields_tagged_error() {
    let coordinator = coordinator(1);
    let llm = Arc::new(MockProvider::constant("nope"));
    coordinator.use_llm(llm.clone(), true);

    let task = coordinator
        .gen("strict", "give me digits", "X")
        .with_regex(Regex::new(r"\d+").expect("pattern compiles"))
        .schedule();

    let result = task.wait().await;
    assert!(result.starts_with("[error:strict]"), "got: {result}");
    assert_eq!(llm.calls(), 1);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_are_bounded_by_policy() {
    let coordinator = coordinator(1);
    let llm = Arc::new(MockProvider::constant("never valid"));
    coordinator.use_llm(llm.clone(), true);

    let task = coordinator
        .gen("bounded", "digits please", "X")
        .with_regex(Regex::new(r"\d+").expect("pattern compiles"))
        .with_retries(2)
        .with_backoff(Duration::from_millis(1))
        .schedule();

    let result = task.wait().await;
    assert!(result.starts_with("[error:bounded]"), "got: {result}");
    // max_retries = 2 means at most three attempts in total.
    assert_eq!(llm.calls(), 3);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn provider_failure_is_embedded_in_the_result() {
    let coordinator = coordinator(1);
    let llm = Arc::new(MockProvider::failing("boom"));
    coordinator.use_llm(llm.clone(), true);

    let task = coordinator
        .gen("doomed", "explode", "X")
        .with_retries(1)
        .with_backoff(Duration::from_millis(1))
        .schedule();

    let result = task.wait().await;
    assert!(result.starts_with("[error:doomed]"), "got: {result}");
    assert!(result.contains("boom"), "got: {result}");
    assert_eq!(llm.calls(), 2);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_fallback_keeps_the_tagged_error() {
    let coordinator = coordinator(1);
    let llm = Arc::new(MockProvider::failing("still down"));
    coordinator.use_llm(llm.clone(), true);

    let task = coordinator
        .gen("cursed", "primary", "X")
        .with_fallback("secondary")
        .schedule();

    let result = task.wait().await;
    assert!(result.starts_with("[error:cursed]"), "got: {result}");
    // One primary attempt, one fallback attempt.
    assert_eq!(llm.calls(), 2);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disabling_the_cache_skips_both_read_and_write() {
    let coordinator = coordinator(2);
    let llm = Arc::new(MockProvider::from_fn(|prompt, _| Ok(format!("R:{prompt}"))));
    coordinator.use_llm(llm.clone(), false);

    let a = coordinator.gen("a", "same prompt", "X").schedule();
    coordinator.join(&[a], JoinMode::All, None).await;
    let b = coordinator.gen("b", "same prompt", "X").schedule();
    coordinator.join(&[b], JoinMode::All, None).await;

    assert_eq!(llm.calls(), 2, "uncached mode must always call the llm");
    assert!(coordinator.cache().is_empty(), "uncached mode must not write back");
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_results_are_written_back_for_exact_reuse() {
    let coordinator = coordinator(1);
    let llm = Arc::new(MockProvider::constant("answer"));
    coordinator.use_llm(llm, true);

    let task = coordinator.gen("t", "question", "X").schedule();
    task.wait().await;

    assert_eq!(coordinator.cache().get("question").as_deref(), Some("answer"));
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_outputs_are_not_cached() {
    let coordinator = coordinator(1);
    let llm = Arc::new(MockProvider::constant("garbage"));
    coordinator.use_llm(llm, true);

    let task = coordinator
        .gen("t", "question", "X")
        .with_regex(Regex::new(r"\d+").expect("pattern compiles"))
        .schedule();
    task.wait().await;

    assert_eq!(coordinator.cache().get("question"), None);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_abandons_queued_tasks_but_finishes_in_flight_work() {
    let coordinator = coordinator(1);
    let probe = Arc::new(ConcurrencyProbe::default());
    coordinator.use_llm(probe.clone(), true);

    let first = coordinator.gen("first", "a", "X").schedule();
    // Wait until the worker has the first task in hand.
    while probe.in_flight.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let second = coordinator.gen("second", "b", "X").schedule();
    let third = coordinator.gen("third", "c", "X").schedule();

    coordinator.shutdown().await;

    assert_eq!(first.wait().await, "a");
    assert!(!second.is_done(), "queued task should be abandoned");
    assert!(!third.is_done(), "queued task should be abandoned");
}
