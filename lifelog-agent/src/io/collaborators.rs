//! Capability traits for the external calls the engine makes.
//!
//! The engine only sees these seams. Model clients, the vector store and any
//! prompt construction live behind them; tests use scripted implementations
//! that return predetermined outputs.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::{ContextItem, InputVerdict, OutputVerdict, Plan, Reflection};

/// Input/output content-policy checkpoint.
///
/// Errors are handled by the engine: input failures block, output failures
/// deliver the answer.
#[async_trait]
pub trait SafetyGate: Send + Sync {
    async fn check_input(&self, text: &str) -> Result<InputVerdict>;
    async fn check_output(&self, text: &str, context: &str) -> Result<OutputVerdict>;
}

/// Similarity search over the user's log entries.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `limit` items, most relevant first. Repeated calls may
    /// return the same items; the engine does not deduplicate.
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<ContextItem>>;
}

/// Proposes the next action given what has been observed so far.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, query: &str, prior_observations: &[String]) -> Result<Plan>;
}

/// Judges an action's result.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn reflect(&self, action_summary: &str, query: &str) -> Result<Reflection>;
}

/// Turns the query and the accumulated context into the final answer.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, query: &str, context: &[ContextItem]) -> Result<String>;
}

/// The full set of collaborators one engine drives. Cheap to clone.
#[derive(Clone)]
pub struct Collaborators {
    pub safety: Arc<dyn SafetyGate>,
    pub retriever: Arc<dyn Retriever>,
    pub planner: Arc<dyn Planner>,
    pub observer: Arc<dyn Observer>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Collaborators {
    pub fn new(
        safety: Arc<dyn SafetyGate>,
        retriever: Arc<dyn Retriever>,
        planner: Arc<dyn Planner>,
        observer: Arc<dyn Observer>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            safety,
            retriever,
            planner,
            observer,
            synthesizer,
        }
    }
}
