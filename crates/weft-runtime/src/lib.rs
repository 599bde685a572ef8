//! # Weft Runtime
//!
//! Coordination runtime for LLM-driven multi-agent workflows: a cache-aware
//! priority scheduler with a fixed worker pool, per-task validation and
//! retry policy, a fluent task builder, and joined waiting with deadlines.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_llm::MockProvider;
//! use weft_runtime::{Coordinator, CoordinatorConfig, JoinMode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = Coordinator::new(CoordinatorConfig::default());
//!     coordinator.use_llm(Arc::new(MockProvider::constant("on my way")), true);
//!
//!     let task = coordinator
//!         .gen("greet", "say hello to the fleet", "dispatcher")
//!         .with_priority(1)
//!         .schedule();
//!
//!     let results = coordinator.join(&[task], JoinMode::All, None).await;
//!     assert_eq!(results["greet"], "on my way");
//!     coordinator.shutdown().await;
//! }
//! ```

pub mod contract;
pub mod coordinator;
pub mod metrics;
pub mod scheduler;
pub mod task;

pub use contract::{Contract, ContractError, Validate};
pub use coordinator::{Coordinator, CoordinatorConfig, JoinMode, TaskBuilder};
pub use metrics::{MetricEvent, Metrics, MetricsError, MetricsSnapshot};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::{Task, TaskHandle, TaskId};
