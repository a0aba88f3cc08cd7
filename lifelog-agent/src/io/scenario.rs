//! Scripted collaborators loaded from a TOML scenario file.
//!
//! A scenario fixes every external answer up front so a run is fully
//! deterministic. The CLI drives the engine with one; tests build them
//! in code.
//!
//! ```toml
//! synthesis = "You sleep better after exercise."
//!
//! [input]
//! is_safe = true
//! category = "safe"
//! should_block = false
//!
//! [[retrieval]]
//! id = "2024-03-01"
//! content = "Slept 8h, ran 5k"
//! distance = 0.12
//!
//! [[reflections]]
//! observation = "Need more nights"
//! is_sufficient = false
//!
//! [failures]
//! synthesizer = "model overloaded"
//! ```

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::types::{
    ActionKind, ContextItem, InputVerdict, OutputVerdict, Plan, Reflection,
};
use crate::error::Collaborator;
use crate::io::collaborators::{
    Collaborators, Observer, Planner, Retriever, SafetyGate, Synthesizer,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Scenario {
    pub input: InputVerdict,
    pub output: OutputVerdict,
    /// Returned (up to the requested limit) on every retrieval call.
    pub retrieval: Vec<ContextItem>,
    /// Consumed in order; the last plan repeats once the queue is exhausted.
    pub plans: Vec<Plan>,
    /// Consumed in order; the last reflection repeats once the queue is exhausted.
    pub reflections: Vec<Reflection>,
    pub synthesis: String,
    pub failures: Failures,
}

/// Error messages to raise instead of answering. `None` means the call succeeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Failures {
    pub safety_input: Option<String>,
    pub safety_output: Option<String>,
    pub planner: Option<String>,
    pub retriever: Option<String>,
    pub observer: Option<String>,
    pub synthesizer: Option<String>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            input: InputVerdict::allow(),
            output: OutputVerdict::allow(),
            retrieval: Vec::new(),
            plans: Vec::new(),
            reflections: Vec::new(),
            synthesis: "Based on your log entries, there is no clear pattern yet.".to_string(),
            failures: Failures::default(),
        }
    }
}

impl Scenario {
    /// Build scripted collaborators plus the counters they report calls to.
    pub fn into_collaborators(self) -> (Collaborators, CallCounts) {
        let counts = CallCounts::default();
        let collaborators = Collaborators::new(
            Arc::new(ScriptedSafetyGate {
                input: self.input,
                output: self.output,
                fail_input: self.failures.safety_input,
                fail_output: self.failures.safety_output,
                calls: counts.safety_gate.clone(),
            }),
            Arc::new(ScriptedRetriever {
                items: self.retrieval,
                fail: self.failures.retriever,
                calls: counts.retriever.clone(),
            }),
            Arc::new(ScriptedPlanner {
                plans: Script::new(self.plans, default_plan()),
                fail: self.failures.planner,
                calls: counts.planner.clone(),
            }),
            Arc::new(ScriptedObserver {
                reflections: Script::new(self.reflections, default_reflection()),
                fail: self.failures.observer,
                calls: counts.observer.clone(),
            }),
            Arc::new(ScriptedSynthesizer {
                text: self.synthesis,
                fail: self.failures.synthesizer,
                calls: counts.synthesizer.clone(),
            }),
        );
        (collaborators, counts)
    }
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse scenario {}", path.display()))
}

fn default_plan() -> Plan {
    Plan {
        rationale: "Retrieve log entries related to the question".to_string(),
        action: ActionKind::DataRetrieval,
    }
}

fn default_reflection() -> Reflection {
    Reflection {
        observation: "The retrieved entries address the question".to_string(),
        is_sufficient: true,
    }
}

/// Per-collaborator call counters shared with the scripted collaborators.
#[derive(Debug, Clone, Default)]
pub struct CallCounts {
    safety_gate: Arc<AtomicUsize>,
    planner: Arc<AtomicUsize>,
    retriever: Arc<AtomicUsize>,
    observer: Arc<AtomicUsize>,
    synthesizer: Arc<AtomicUsize>,
}

impl CallCounts {
    pub fn get(&self, collaborator: Collaborator) -> usize {
        let counter = match collaborator {
            Collaborator::SafetyGate => &self.safety_gate,
            Collaborator::Planner => &self.planner,
            Collaborator::Retriever => &self.retriever,
            Collaborator::Observer => &self.observer,
            Collaborator::Synthesizer => &self.synthesizer,
        };
        counter.load(Ordering::SeqCst)
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn scripted_failure(fail: Option<&String>) -> Result<()> {
    match fail {
        Some(message) => Err(anyhow!("{message}")),
        None => Ok(()),
    }
}

/// Queue of scripted answers whose last entry repeats.
struct Script<T> {
    queue: Mutex<VecDeque<T>>,
    fallback: T,
}

impl<T: Clone> Script<T> {
    fn new(items: Vec<T>, fallback: T) -> Self {
        Self {
            queue: Mutex::new(items.into()),
            fallback,
        }
    }

    async fn next(&self) -> T {
        let mut queue = self.queue.lock().await;
        if queue.len() > 1 {
            if let Some(item) = queue.pop_front() {
                return item;
            }
        }
        queue.front().cloned().unwrap_or_else(|| self.fallback.clone())
    }
}

struct ScriptedSafetyGate {
    input: InputVerdict,
    output: OutputVerdict,
    fail_input: Option<String>,
    fail_output: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SafetyGate for ScriptedSafetyGate {
    async fn check_input(&self, _text: &str) -> Result<InputVerdict> {
        bump(&self.calls);
        scripted_failure(self.fail_input.as_ref())?;
        Ok(self.input.clone())
    }

    async fn check_output(&self, _text: &str, _context: &str) -> Result<OutputVerdict> {
        bump(&self.calls);
        scripted_failure(self.fail_output.as_ref())?;
        Ok(self.output.clone())
    }
}

struct ScriptedRetriever {
    items: Vec<ContextItem>,
    fail: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn query(&self, _text: &str, limit: usize) -> Result<Vec<ContextItem>> {
        bump(&self.calls);
        scripted_failure(self.fail.as_ref())?;
        Ok(self.items.iter().take(limit).cloned().collect())
    }
}

struct ScriptedPlanner {
    plans: Script<Plan>,
    fail: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _query: &str, _prior_observations: &[String]) -> Result<Plan> {
        bump(&self.calls);
        scripted_failure(self.fail.as_ref())?;
        Ok(self.plans.next().await)
    }
}

struct ScriptedObserver {
    reflections: Script<Reflection>,
    fail: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Observer for ScriptedObserver {
    async fn reflect(&self, _action_summary: &str, _query: &str) -> Result<Reflection> {
        bump(&self.calls);
        scripted_failure(self.fail.as_ref())?;
        Ok(self.reflections.next().await)
    }
}

struct ScriptedSynthesizer {
    text: String,
    fail: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, _query: &str, _context: &[ContextItem]) -> Result<String> {
        bump(&self.calls);
        scripted_failure(self.fail.as_ref())?;
        Ok(self.text.clone())
    }
}
