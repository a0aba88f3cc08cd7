//! Test-only helpers for building engines over scripted collaborators.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::types::{ActionKind, ContextItem, Plan, Reflection};
use crate::engine::ReActEngine;
use crate::io::collaborators::{Collaborators, Planner, Retriever};
use crate::io::config::EngineConfig;
use crate::io::scenario::{CallCounts, Scenario};

/// `n` deterministic sleep-log entries with increasing distance.
pub fn sleep_items(n: usize) -> Vec<ContextItem> {
    (0..n)
        .map(|i| {
            let mut item = ContextItem::new(
                format!("2024-03-{:02}", i + 1),
                format!("Slept {} hours, quality {}/10", 6 + i % 3, 5 + i % 5),
            )
            .with_distance(0.1 * (i as f32 + 1.0));
            item.metadata.insert("source".to_string(), "sleep".to_string());
            item
        })
        .collect()
}

pub fn reflection(observation: &str, is_sufficient: bool) -> Reflection {
    Reflection {
        observation: observation.to_string(),
        is_sufficient,
    }
}

/// Build an engine over `scenario`, panicking on invalid config.
pub fn engine_for(scenario: Scenario, config: EngineConfig) -> (ReActEngine, CallCounts) {
    let (collaborators, counts) = scenario.into_collaborators();
    (engine_with(collaborators, config), counts)
}

pub fn engine_with(collaborators: Collaborators, config: EngineConfig) -> ReActEngine {
    ReActEngine::new(collaborators, config).expect("valid engine config")
}

/// Retriever that waits before answering.
pub struct SlowRetriever {
    pub delay: Duration,
    pub items: Vec<ContextItem>,
}

#[async_trait]
impl Retriever for SlowRetriever {
    async fn query(&self, _text: &str, limit: usize) -> Result<Vec<ContextItem>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.items.iter().take(limit).cloned().collect())
    }
}

/// Planner that records the observations it was shown on each call.
#[derive(Default)]
pub struct RecordingPlanner {
    seen: Mutex<Vec<Vec<String>>>,
}

impl RecordingPlanner {
    pub fn seen(&self) -> Vec<Vec<String>> {
        self.seen.lock().expect("planner log").clone()
    }
}

#[async_trait]
impl Planner for RecordingPlanner {
    async fn plan(&self, _query: &str, prior_observations: &[String]) -> Result<Plan> {
        self.seen
            .lock()
            .expect("planner log")
            .push(prior_observations.to_vec());
        Ok(Plan {
            rationale: format!("{} observations so far", prior_observations.len()),
            action: ActionKind::DataRetrieval,
        })
    }
}
