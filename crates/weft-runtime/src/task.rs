//! Task record and completion latch

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use weft_llm::AgentHandle;

use crate::contract::Validate;

/// Task identifier, used in logs only; result maps are keyed by name.
pub type TaskId = Uuid;

/// Shared handle to a scheduled task. Cloning is cheap; every clone waits on
/// the same completion latch and observes the same result.
pub type TaskHandle = Arc<Task>;

/// One unit of LLM-backed work.
///
/// All policy fields are frozen at construction; after enqueue, only the
/// executing worker touches the task, and only to publish its result.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    /// Caller-supplied name. Not unique across the process; used as the
    /// result-map key in `join`.
    pub name: String,
    pub prompt: String,
    pub agent: AgentHandle,
    /// Higher is more urgent.
    pub priority: i32,
    /// Advisory upper bound applied by waiters, not by the scheduler.
    pub timeout: Duration,
    pub max_retries: u32,
    /// Base backoff between retry attempts; doubles per attempt.
    pub backoff: Duration,
    pub constraint: Option<Arc<dyn Validate>>,
    pub fallback_prompt: Option<String>,
    latch: watch::Sender<Option<String>>,
}

pub(crate) struct TaskParams {
    pub name: String,
    pub prompt: String,
    pub agent: AgentHandle,
    pub priority: i32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    pub constraint: Option<Arc<dyn Validate>>,
    pub fallback_prompt: Option<String>,
}

impl Task {
    pub(crate) fn from_params(params: TaskParams) -> TaskHandle {
        let (latch, _) = watch::channel(None);
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: params.name,
            prompt: params.prompt,
            agent: params.agent,
            priority: params.priority,
            timeout: params.timeout,
            max_retries: params.max_retries,
            backoff: params.backoff,
            constraint: params.constraint,
            fallback_prompt: params.fallback_prompt,
            latch,
        })
    }

    /// Publish the result and release all waiters. Fires at most once;
    /// later calls are ignored.
    pub(crate) fn complete(&self, result: String) -> bool {
        let mut fired = false;
        self.latch.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(result);
                fired = true;
                true
            } else {
                false
            }
        });
        if !fired {
            tracing::warn!(task_id = %self.id, task = %self.name, "task completed twice, result ignored");
        }
        fired
    }

    /// Non-blocking probe of the completion latch.
    pub fn is_done(&self) -> bool {
        self.latch.borrow().is_some()
    }

    /// The result, if the task has completed.
    pub fn result(&self) -> Option<String> {
        self.latch.borrow().clone()
    }

    /// Wait until the task completes and return its result.
    pub async fn wait(&self) -> String {
        let mut rx = self.latch.subscribe();
        let result = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone().unwrap_or_default(),
            // The latch sender lives inside `self`, so it cannot drop while
            // we hold `&self`.
            Err(_) => self.result().unwrap_or_default(),
        };
        result
    }

    /// Wait up to `timeout`; `None` means the budget elapsed first. The task
    /// keeps running regardless.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}
