//! Coordination facade
//!
//! The entrypoint programs use to declare tasks, wait on results, and
//! exchange bus notifications. Wires the prefix cache, scheduler, bus, and
//! metrics together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_bus::EventBus;
use weft_cache::PrefixCache;
use weft_llm::{AgentHandle, LlmProvider};

use crate::contract::{Contract, Validate};
use crate::metrics::Metrics;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::task::{Task, TaskHandle, TaskParams};

/// How `join` waits on a set of tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Wait for every task (or until the budget elapses).
    All,
    /// Return as soon as one task has completed.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Scheduler worker count (min 1).
    pub workers: usize,
    /// Accepted for reproducibility bookkeeping; the core does not consume
    /// randomness.
    pub seed: u64,
    /// Prefix cache capacity in keys (min 8).
    pub cache_capacity: usize,
    /// Bus queue length in messages (min 1).
    pub bus_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            seed: 7,
            cache_capacity: weft_cache::DEFAULT_CAPACITY,
            bus_capacity: weft_bus::DEFAULT_CAPACITY,
        }
    }
}

/// Coordination runtime: task declaration, result joining, and bus access.
///
/// Must be created inside a tokio runtime (workers and the bus consumer are
/// spawned on construction).
pub struct Coordinator {
    cache: Arc<PrefixCache<String>>,
    scheduler: Scheduler,
    bus: EventBus,
    metrics: Arc<Metrics>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        tracing::debug!(
            workers = config.workers,
            seed = config.seed,
            cache_capacity = config.cache_capacity,
            bus_capacity = config.bus_capacity,
            "coordinator initialized"
        );
        Self {
            cache: Arc::new(PrefixCache::new(config.cache_capacity)),
            scheduler: Scheduler::new(SchedulerConfig {
                workers: config.workers.max(1),
                ..SchedulerConfig::default()
            }),
            bus: EventBus::new(config.bus_capacity.max(1)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Install the LLM provider used by scheduler workers and toggle cache
    /// participation. Calling again replaces both. With `use_cache` off, the
    /// fast path is skipped, nothing is written back, and new tasks are
    /// prioritized as if no prefix matched.
    pub fn use_llm(&self, llm: Arc<dyn LlmProvider>, use_cache: bool) {
        self.scheduler
            .configure(llm, self.cache.clone(), self.metrics.clone(), use_cache);
    }

    /// Start declaring a task. `schedule()` on the returned builder enqueues
    /// it.
    pub fn gen(
        &self,
        name: impl Into<String>,
        prompt: impl Into<String>,
        agent: impl Into<AgentHandle>,
    ) -> TaskBuilder<'_> {
        TaskBuilder {
            coordinator: self,
            params: TaskParams {
                name: name.into(),
                prompt: prompt.into(),
                agent: agent.into(),
                priority: 0,
                timeout: Duration::from_secs(10),
                max_retries: 0,
                backoff: Duration::from_millis(200),
                constraint: None,
                fallback_prompt: None,
            },
        }
    }

    /// Wait on `tasks` and collect `{name: result}`.
    ///
    /// `JoinMode::All` waits for every task; with a budget, per-task waits
    /// are truncated to what remains of it and only completed tasks appear
    /// in the map. `JoinMode::Any` returns the first completed task as a
    /// singleton map (empty on budget exhaustion). Tasks keep running after
    /// a timed-out join.
    pub async fn join(
        &self,
        tasks: &[TaskHandle],
        mode: JoinMode,
        within: Option<Duration>,
    ) -> HashMap<String, String> {
        let mut results = HashMap::new();
        match mode {
            JoinMode::All => {
                let deadline = within.map(|budget| Instant::now() + budget);
                for task in tasks {
                    let result = match deadline {
                        None => Some(task.wait().await),
                        Some(deadline) => {
                            let remaining = deadline.saturating_duration_since(Instant::now());
                            if remaining.is_zero() {
                                // Budget spent: pick up tasks that already
                                // finished, skip the rest.
                                task.result()
                            } else {
                                task.wait_timeout(remaining).await
                            }
                        }
                    };
                    if let Some(result) = result {
                        results.insert(task.name.clone(), result);
                    }
                }
            }
            JoinMode::Any => {
                if tasks.is_empty() {
                    return results;
                }
                let waiters = tasks.iter().map(|task| Box::pin(task.wait()));
                let first = futures::future::select_all(waiters);
                match within {
                    None => {
                        let (result, index, _) = first.await;
                        results.insert(tasks[index].name.clone(), result);
                    }
                    Some(budget) => {
                        if let Ok((result, index, _)) = tokio::time::timeout(budget, first).await {
                            results.insert(tasks[index].name.clone(), result);
                        }
                    }
                }
            }
        }
        results
    }

    /// Subscribe `f` to a bus topic.
    pub fn on(&self, topic: &str, f: impl Fn(Value) + Send + Sync + 'static) {
        self.bus.subscribe(topic, f);
    }

    /// Publish a payload to a bus topic. Best-effort; never fails the
    /// caller.
    pub fn emit(&self, topic: &str, payload: Value) {
        self.bus.publish(topic, payload);
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// The shared prefix cache, e.g. for pre-seeding known outputs.
    pub fn cache(&self) -> &Arc<PrefixCache<String>> {
        &self.cache
    }

    /// Stop scheduler workers, then the bus consumer. Queued tasks are
    /// abandoned; in-flight ones complete in the background.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.bus.shutdown().await;
    }
}

/// Fluent task declaration, created by [`Coordinator::gen`].
pub struct TaskBuilder<'a> {
    coordinator: &'a Coordinator,
    params: TaskParams,
}

impl TaskBuilder<'_> {
    /// Higher runs sooner among equally-warm tasks.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.params.priority = priority;
        self
    }

    /// Advisory per-task wait budget for callers; the scheduler itself never
    /// cancels work.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.params.timeout = timeout;
        self
    }

    /// Retry failed attempts up to `retries` extra times.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.params.max_retries = retries;
        self
    }

    /// Base delay between retry attempts (doubles each attempt). Default
    /// 200 ms.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.params.backoff = backoff;
        self
    }

    /// Attach an output validator.
    pub fn with_contract(mut self, contract: impl Validate + 'static) -> Self {
        self.params.constraint = Some(Arc::new(contract));
        self
    }

    /// Shorthand for a full-match regex contract.
    pub fn with_regex(self, re: Regex) -> Self {
        let name = format!("{}-re", self.params.name);
        self.with_contract(Contract::new(name).with_regex(re))
    }

    /// Prompt to try once if all retries fail validation.
    pub fn with_fallback(mut self, prompt: impl Into<String>) -> Self {
        self.params.fallback_prompt = Some(prompt.into());
        self
    }

    /// Enqueue the task and return its handle immediately.
    pub fn schedule(self) -> TaskHandle {
        let task = Task::from_params(self.params);
        self.coordinator.scheduler.add(task.clone());
        task
    }
}
