//! # Weft LLM
//!
//! The LLM boundary of the Weft runtime: the [`LlmProvider`] trait the
//! scheduler calls into, the [`AgentHandle`] it extracts a role string from,
//! and a [`MockProvider`] for tests and offline runs.
//!
//! ## Quick Start
//!
//! ```rust
//! use weft_llm::{LlmProvider, MockProvider};
//!
//! #[tokio::main]
//! async fn main() {
//!     let llm = MockProvider::constant("four");
//!     let answer = llm.complete("2 + 2?", Some("math-tutor")).await.unwrap();
//!     assert_eq!(answer, "four");
//!     assert_eq!(llm.calls(), 1);
//! }
//! ```

pub mod agent;
pub mod mock;
pub mod provider;

pub use agent::{AgentHandle, AgentProfile};
pub use mock::MockProvider;
pub use provider::{LlmError, LlmProvider};
