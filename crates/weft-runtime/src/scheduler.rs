//! Cache-aware task scheduler
//!
//! A fixed pool of workers drains a shared priority queue. Tasks whose
//! prompts share a long prefix with cached entries sort first (warm work is
//! cheap work), then higher caller priority, then FIFO. Each pop runs the
//! full execute cycle: cache fast path, bounded retry loop against the LLM
//! provider, optional fallback prompt, cache write-back, completion latch,
//! metrics.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use weft_cache::PrefixCache;
use weft_llm::{LlmError, LlmProvider};

use crate::metrics::Metrics;
use crate::task::{Task, TaskHandle};

/// Backoff doubling stops after this many attempts to keep delays sane.
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Worker count, fixed for the scheduler's lifetime.
    pub workers: usize,
    /// How long an idle worker waits before re-checking the stop flag.
    pub poll_interval: Duration,
    /// How long `shutdown` waits for each worker to exit.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            poll_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// Execution wiring, installed via [`Scheduler::configure`] and replaced
/// wholesale on each call.
#[derive(Debug, Default)]
struct ExecContext {
    llm: Option<Arc<dyn LlmProvider>>,
    cache: Option<Arc<PrefixCache<String>>>,
    metrics: Option<Arc<Metrics>>,
    use_cache: bool,
}

/// Queue entry ordered by scheduling key `(-prefix_len, -priority, seq)`,
/// lexicographically ascending. `seq` is unique, so the order is total and
/// ties degenerate to FIFO.
struct QueueEntry {
    prefix_len: usize,
    priority: i32,
    seq: u64,
    task: TaskHandle,
}

impl QueueEntry {
    fn key(&self) -> (i64, i64, u64) {
        (-(self.prefix_len as i64), -(self.priority as i64), self.seq)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse order: the smallest key is the most urgent entry.
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct SchedulerShared {
    queue: Mutex<BinaryHeap<QueueEntry>>,
    seq: AtomicU64,
    wakeup: Notify,
    stop: AtomicBool,
    ctx: RwLock<ExecContext>,
    poll_interval: Duration,
}

impl SchedulerShared {
    fn ctx(&self) -> std::sync::RwLockReadGuard<'_, ExecContext> {
        self.ctx.read().expect("scheduler context lock poisoned")
    }
}

/// Priority scheduler with a fixed worker pool.
///
/// Must be created inside a tokio runtime; workers are spawned on
/// construction and live until [`Scheduler::shutdown`].
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let shared = Arc::new(SchedulerShared {
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            wakeup: Notify::new(),
            stop: AtomicBool::new(false),
            ctx: RwLock::new(ExecContext::default()),
            poll_interval: config.poll_interval,
        });

        let workers = config.workers.max(1);
        let handles = (0..workers)
            .map(|worker_id| {
                let shared = shared.clone();
                tokio::spawn(Self::worker_loop(shared, worker_id))
            })
            .collect();
        tracing::info!(workers, "scheduler started");

        Self {
            shared,
            workers: Mutex::new(handles),
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Install the LLM provider, cache, and metrics used by workers, and
    /// toggle cache participation. Calling again replaces all of them.
    pub fn configure(
        &self,
        llm: Arc<dyn LlmProvider>,
        cache: Arc<PrefixCache<String>>,
        metrics: Arc<Metrics>,
        use_cache: bool,
    ) {
        let mut ctx = self.shared.ctx.write().expect("scheduler context lock poisoned");
        *ctx = ExecContext {
            llm: Some(llm),
            cache: Some(cache),
            metrics: Some(metrics),
            use_cache,
        };
    }

    /// Enqueue a task. Never fails; the task is owned by the scheduler until
    /// its latch fires.
    pub fn add(&self, task: TaskHandle) {
        let (prefix_len, metrics) = {
            let ctx = self.shared.ctx();
            let prefix_len = if ctx.use_cache {
                ctx.cache
                    .as_ref()
                    .map(|c| c.get_with_lmp(&task.prompt).0)
                    .unwrap_or(0)
            } else {
                0
            };
            (prefix_len, ctx.metrics.clone())
        };
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            task_id = %task.id,
            task = %task.name,
            prefix_len,
            priority = task.priority,
            seq,
            "task enqueued"
        );
        self.shared
            .queue
            .lock()
            .expect("task queue lock poisoned")
            .push(QueueEntry {
                prefix_len,
                priority: task.priority,
                seq,
                task,
            });
        if let Some(metrics) = metrics {
            metrics.on_submit();
        }
        self.shared.wakeup.notify_one();
    }

    /// Tasks waiting in the queue (not counting ones being executed).
    pub fn queued(&self) -> usize {
        self.shared
            .queue
            .lock()
            .expect("task queue lock poisoned")
            .len()
    }

    /// Stop the workers. Tasks already popped complete normally; tasks still
    /// queued are abandoned. Workers are waited on with a bounded grace
    /// period each.
    pub async fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wakeup.notify_waiters();
        let handles: Vec<_> = {
            let mut workers = self.workers.lock().expect("worker handle lock poisoned");
            workers.drain(..).collect()
        };
        for handle in handles {
            if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
                tracing::warn!("scheduler worker did not stop within grace period");
            }
        }
    }

    async fn worker_loop(shared: Arc<SchedulerShared>, worker_id: usize) {
        loop {
            if shared.stop.load(Ordering::Acquire) {
                break;
            }
            let next = shared
                .queue
                .lock()
                .expect("task queue lock poisoned")
                .pop();
            match next {
                Some(entry) => Self::execute(&shared, &entry.task).await,
                None => {
                    tokio::select! {
                        _ = shared.wakeup.notified() => {}
                        _ = tokio::time::sleep(shared.poll_interval) => {}
                    }
                }
            }
        }
        tracing::debug!(worker_id, "scheduler worker exited");
    }

    async fn execute(shared: &SchedulerShared, task: &Task) {
        let start = Instant::now();
        let (llm, cache, metrics, use_cache) = {
            let ctx = shared.ctx();
            (
                ctx.llm.clone(),
                ctx.cache.clone(),
                ctx.metrics.clone(),
                ctx.use_cache,
            )
        };
        let cache = cache.filter(|_| use_cache);

        // Fast path: the whole prompt is a stored key.
        if let Some(cache) = &cache {
            let (prefix_len, hit) = cache.get_with_lmp(&task.prompt);
            if let Some(value) = hit {
                if prefix_len == task.prompt.chars().count() {
                    tracing::debug!(task_id = %task.id, task = %task.name, "full cache hit");
                    task.complete(value);
                    if let Some(metrics) = &metrics {
                        metrics.on_complete(elapsed_ms(start), true);
                    }
                    return;
                }
            }
        }

        let role = task.agent.role();
        let mut output = String::new();
        let mut ok = false;
        let mut rejected = false;
        let mut attempts: u32 = 0;

        while attempts <= task.max_retries && !ok {
            match invoke(llm.as_deref(), &task.prompt, role).await {
                Ok(text) => {
                    rejected = match &task.constraint {
                        Some(constraint) => !constraint.validate(&text),
                        None => false,
                    };
                    ok = !rejected;
                    output = text;
                    if rejected {
                        tracing::debug!(
                            task_id = %task.id,
                            task = %task.name,
                            attempt = attempts,
                            "output rejected by contract"
                        );
                    }
                }
                Err(err) => {
                    ok = false;
                    rejected = false;
                    output = format!("[error:{}] {}", task.name, err);
                    tracing::warn!(
                        task_id = %task.id,
                        task = %task.name,
                        attempt = attempts,
                        error = %err,
                        "llm attempt failed"
                    );
                }
            }
            if !ok {
                attempts += 1;
                if attempts <= task.max_retries {
                    tokio::time::sleep(backoff_delay(task.backoff, attempts)).await;
                }
            }
        }

        if !ok {
            if let Some(fallback) = &task.fallback_prompt {
                tracing::debug!(task_id = %task.id, task = %task.name, "invoking fallback prompt");
                match invoke(llm.as_deref(), fallback, role).await {
                    Ok(text) => {
                        output = text;
                        ok = true;
                        rejected = false;
                    }
                    Err(err) => {
                        output = format!("[error:{}] {}", task.name, err);
                        rejected = false;
                    }
                }
            }
        }

        if !ok && rejected {
            // A rejected output is not a usable result; callers rely on the
            // error-prefix convention to detect failure.
            output = format!(
                "[error:{}] output rejected by contract after {} attempts",
                task.name, attempts
            );
        }

        if ok {
            if let Some(cache) = &cache {
                cache.put(&task.prompt, output.clone());
            }
        }

        task.complete(output);
        if let Some(metrics) = &metrics {
            metrics.on_complete(elapsed_ms(start), false);
        }
    }
}

async fn invoke(
    llm: Option<&dyn LlmProvider>,
    prompt: &str,
    role: &str,
) -> Result<String, LlmError> {
    match llm {
        Some(provider) => provider.complete(prompt, Some(role)).await,
        // No provider configured: echo a placeholder so programs keep
        // working offline.
        None => Ok(format!("[LLM:{}] {}", role, prompt)),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(1u32 << shift)
}
