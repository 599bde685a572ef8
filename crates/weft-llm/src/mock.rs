//! Mock LLM provider for tests and offline runs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{LlmError, LlmProvider};

type ReplyFn = dyn Fn(&str, Option<&str>) -> Result<String, LlmError> + Send + Sync;

enum Script {
    /// Echo the prompt back, tagged with the role.
    Echo,
    /// Cycle through canned replies; `Err` entries simulate provider failure.
    Sequence(Vec<Result<String, String>>),
    /// Compute the reply from the request.
    Fn(Box<ReplyFn>),
}

/// A scripted provider: canned replies, scripted failures, or a closure.
/// Counts calls and can simulate latency, which is all the scheduler tests
/// need to observe retries, fallbacks, and cache hits.
pub struct MockProvider {
    name: String,
    script: Script,
    calls: AtomicUsize,
    latency: Duration,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.name)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl MockProvider {
    fn with_script(script: Script) -> Self {
        Self {
            name: "mock".to_string(),
            script,
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Replies `[LLM:<role>] <prompt>` to every request.
    pub fn echo() -> Self {
        Self::with_script(Script::Echo)
    }

    /// Always returns the same reply.
    pub fn constant(reply: &str) -> Self {
        Self::with_script(Script::Sequence(vec![Ok(reply.to_string())]))
    }

    /// Cycles through `replies` in order, wrapping around.
    pub fn sequence<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Sequence(
            replies.into_iter().map(|r| Ok(r.into())).collect(),
        ))
    }

    /// Cycles through scripted outcomes; `Err` entries fail the attempt with
    /// that message.
    pub fn outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self::with_script(Script::Sequence(outcomes.into_iter().collect()))
    }

    /// Fails every request with `message`.
    pub fn failing(message: &str) -> Self {
        Self::with_script(Script::Sequence(vec![Err(message.to_string())]))
    }

    /// Computes replies with `f`.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self::with_script(Script::Fn(Box::new(f)))
    }

    /// Sleep this long before answering each request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// How many times `complete` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str, role: Option<&str>) -> Result<String, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.script {
            Script::Echo => Ok(format!("[LLM:{}] {}", role.unwrap_or("-"), prompt)),
            Script::Sequence(replies) => match replies.get(call % replies.len().max(1)) {
                Some(Ok(reply)) => Ok(reply.clone()),
                Some(Err(message)) => Err(LlmError::RequestFailed(message.clone())),
                None => Err(LlmError::NotAvailable),
            },
            Script::Fn(f) => f(prompt, role),
        }
    }
}
