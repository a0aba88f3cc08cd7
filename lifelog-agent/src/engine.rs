//! The ReAct state machine.
//!
//! One run walks `safety_check_input → (react_reason → react_act →
//! react_observe)* → synthesize_response → safety_check_output → done`
//! following [`transitions::TRANSITIONS`]. `run` and `stream` share the same
//! driver; streaming only adds an event after each node.

use std::future::Future;
use std::time::Instant;

use anyhow::anyhow;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::invariants::validate_invariants;
use crate::core::messages;
use crate::core::policy::{self, ExitReason, LoopDecision, LoopSignals};
use crate::core::run_state::RunState;
use crate::core::transitions::{self, Node, Signal};
use crate::core::types::{
    ActionKind, InputVerdict, OutputVerdict, Plan, ResultRecord, SafetyCheckResult, Terminal,
};
use crate::error::{Collaborator, EngineError};
use crate::io::collaborators::Collaborators;
use crate::io::config::EngineConfig;
use crate::stream::{Emitter, Event, RunStream};

/// Content of retrieved entries quoted in the Observer's action summary.
const SUMMARY_PREVIEW_CHARS: usize = 200;

/// Engine instance shared by any number of concurrent runs.
///
/// Holds no per-run state; every call creates its own [`RunState`].
#[derive(Clone)]
pub struct ReActEngine {
    collaborators: Collaborators,
    config: EngineConfig,
}

/// A finished run: the terminal state plus its projection.
#[derive(Debug, Clone)]
pub struct Execution {
    pub state: RunState,
    pub record: ResultRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub status: &'static str,
    pub max_iterations: u32,
    pub retrieval_limit: usize,
    pub call_timeout_secs: u64,
    pub stream_buffer: usize,
    pub collaborators: Vec<Collaborator>,
    pub nodes: Vec<Node>,
}

/// Values handed from one node to the next within a cycle.
#[derive(Default)]
struct Scratch {
    plan: Option<Plan>,
    action_summary: String,
}

impl ReActEngine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            collaborators,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            status: "ready",
            max_iterations: self.config.max_iterations,
            retrieval_limit: self.config.retrieval_limit,
            call_timeout_secs: self.config.call_timeout_secs,
            stream_buffer: self.config.stream_buffer,
            collaborators: Collaborator::ALL.to_vec(),
            nodes: vec![
                Node::InputSafety,
                Node::Reason,
                Node::Act,
                Node::Observe,
                Node::Synthesize,
                Node::OutputSafety,
                Node::Done,
            ],
        }
    }

    /// Run one query to completion. Never returns an error: failures end the
    /// run as [`Terminal::Failed`] with an apology response.
    pub async fn run(&self, query: &str) -> ResultRecord {
        self.run_with_cancel(query, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, query: &str, cancel: CancellationToken) -> ResultRecord {
        self.execute(query, cancel).await.record
    }

    /// Like [`run_with_cancel`](Self::run_with_cancel) but also returns the
    /// terminal [`RunState`] (observations, retrieved context).
    pub async fn execute(&self, query: &str, cancel: CancellationToken) -> Execution {
        self.drive(query, &cancel, &Emitter::Silent).await
    }

    /// Return the events of a run that starts on a new task at the first poll.
    ///
    /// Nothing runs until the stream is polled, which must happen within a
    /// Tokio runtime.
    pub fn stream(&self, query: impl Into<String>) -> RunStream {
        self.stream_with_cancel(query, CancellationToken::new())
    }

    pub fn stream_with_cancel(
        &self,
        query: impl Into<String>,
        cancel: CancellationToken,
    ) -> RunStream {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer);
        let run_token = cancel.child_token();
        let guard = run_token.clone().drop_guard();
        let engine = self.clone();
        let query = query.into();
        let producer = async move {
            engine.drive(&query, &run_token, &Emitter::Channel(tx)).await;
        };
        RunStream::new(producer, rx, guard)
    }

    async fn drive(&self, query: &str, cancel: &CancellationToken, emitter: &Emitter) -> Execution {
        let started = Instant::now();
        let span = info_span!("run", query_len = query.len());
        async move {
            let mut state = RunState::new(query);
            if let Err(err) = self.walk(&mut state, cancel, emitter, started).await {
                contain(&mut state, &err);
            }

            for violation in validate_invariants(&state, self.config.max_iterations) {
                warn!(%violation, "run invariant violated");
            }
            let record = state.to_record(started.elapsed());
            info!(
                terminal = ?record.terminal,
                cycles = record.react_cycles,
                entries = record.retrieved_entry_count,
                elapsed_ms = record.elapsed_ms,
                "run finished"
            );

            // The consumer may already be gone; nothing is left to cancel.
            let _ = emitter.emit(|| Event::terminal(record.clone())).await;
            Execution { state, record }
        }
        .instrument(span)
        .await
    }

    async fn walk(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
        emitter: &Emitter,
        started: Instant,
    ) -> Result<(), EngineError> {
        if state.query().trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }

        let mut scratch = Scratch::default();
        let mut node = Node::ENTRY;
        while node != Node::Done {
            // A node starts only once its event has somewhere to go.
            let slot = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(EngineError::cancelled("cancellation requested"));
                }
                slot = emitter.reserve() => slot?,
            };
            let signal = self.step(node, state, &mut scratch, cancel).await?;
            debug!(%node, ?signal, iteration = state.iteration(), "node completed");
            slot.fill(|| Event::intermediate(node, &*state, elapsed_ms(started)));
            node = transitions::next(node, signal).ok_or_else(|| {
                EngineError::Transition(format!("{node} has no edge for {signal:?}"))
            })?;
        }
        Ok(())
    }

    async fn step(
        &self,
        node: Node,
        state: &mut RunState,
        scratch: &mut Scratch,
        cancel: &CancellationToken,
    ) -> Result<Signal, EngineError> {
        match node {
            Node::InputSafety => self.check_input(state, cancel).await,
            Node::Reason => self.reason(state, scratch, cancel).await,
            Node::Act => self.act(state, scratch, cancel).await,
            Node::Observe => self.observe(state, scratch, cancel).await,
            Node::Synthesize => self.synthesize(state, cancel).await,
            Node::OutputSafety => self.check_output(state, cancel).await,
            Node::Done => Err(EngineError::Transition("done is terminal".to_string())),
        }
    }

    async fn check_input(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Signal, EngineError> {
        let verdict = match self
            .call(
                Collaborator::SafetyGate,
                cancel,
                self.collaborators.safety.check_input(state.query()),
            )
            .await
        {
            Ok(verdict) => verdict,
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) => {
                warn!(error = %err, "input safety check failed, blocking");
                InputVerdict::fail_closed(messages::diagnostic_summary(&err.to_string()))
            }
        };
        state.record_safety(SafetyCheckResult::from_input(&verdict))?;

        if verdict.should_block {
            let category = verdict.category.as_deref().unwrap_or("unknown");
            info!(category, "input blocked");
            state.push_step("Safety Check (Input)", format!("Blocked: {category}"))?;
            state.finish(Terminal::Blocked, messages::input_refusal(category))?;
            return Ok(Signal::Blocked);
        }
        state.push_step("Safety Check (Input)", "Passed")?;
        Ok(Signal::Proceed)
    }

    async fn reason(
        &self,
        state: &mut RunState,
        scratch: &mut Scratch,
        cancel: &CancellationToken,
    ) -> Result<Signal, EngineError> {
        let cycle = state.iteration() + 1;
        let plan = self
            .call(
                Collaborator::Planner,
                cancel,
                self.collaborators
                    .planner
                    .plan(state.query(), state.observations()),
            )
            .await?;
        state.push_step(
            format!("ReAct Reason (cycle {cycle})"),
            format!("{} [next action: {}]", plan.rationale, plan.action.as_label()),
        )?;
        scratch.plan = Some(plan);
        Ok(Signal::Proceed)
    }

    /// Execute the planned action. Every action is served by retrieval.
    async fn act(
        &self,
        state: &mut RunState,
        scratch: &mut Scratch,
        cancel: &CancellationToken,
    ) -> Result<Signal, EngineError> {
        let cycle = state.iteration() + 1;
        if let Some(plan) = scratch.plan.take() {
            if plan.action != ActionKind::DataRetrieval {
                debug!(action = plan.action.as_label(), "serving planned action with retrieval");
            }
        }
        let items = self
            .call(
                Collaborator::Retriever,
                cancel,
                self.collaborators
                    .retriever
                    .query(state.query(), self.config.retrieval_limit),
            )
            .await?;

        let found = format!("Found {} relevant entries", items.len());
        let mut summary = found.clone();
        for item in &items {
            summary.push_str("\n- ");
            summary.extend(item.content.chars().take(SUMMARY_PREVIEW_CHARS));
        }
        scratch.action_summary = summary;

        state.extend_context(items)?;
        state.push_step(format!("ReAct Act (cycle {cycle})"), found)?;
        Ok(Signal::Proceed)
    }

    async fn observe(
        &self,
        state: &mut RunState,
        scratch: &mut Scratch,
        cancel: &CancellationToken,
    ) -> Result<Signal, EngineError> {
        let reflection = self
            .call(
                Collaborator::Observer,
                cancel,
                self.collaborators
                    .observer
                    .reflect(&scratch.action_summary, state.query()),
            )
            .await?;

        let iteration = state.complete_cycle(reflection.observation.clone())?;
        let decision = policy::decide(LoopSignals {
            iteration,
            max_iterations: self.config.max_iterations,
            observer_sufficient: reflection.is_sufficient,
            observation_count: state.observations().len(),
            has_context: !state.retrieved_context().is_empty(),
        });
        state.set_continue_policy(decision.should_continue())?;

        let detail = match decision {
            LoopDecision::Continue => format!("{} (continuing)", reflection.observation),
            LoopDecision::Exit(reason) => {
                if reason == ExitReason::EvidenceThreshold {
                    debug!(iteration, "evidence threshold ended the loop");
                }
                format!("{} (stopping: {})", reflection.observation, reason.describe())
            }
        };
        state.push_step(format!("ReAct Observe (cycle {iteration})"), detail)?;

        Ok(if decision.should_continue() {
            Signal::Continue
        } else {
            Signal::Exit
        })
    }

    async fn synthesize(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Signal, EngineError> {
        let text = self
            .call(
                Collaborator::Synthesizer,
                cancel,
                self.collaborators
                    .synthesizer
                    .synthesize(state.query(), state.retrieved_context()),
            )
            .await?;
        state.set_draft(text)?;
        state.push_step(
            "Response Synthesis",
            format!(
                "Generated response from {} entries",
                state.retrieved_context().len()
            ),
        )?;
        Ok(Signal::Proceed)
    }

    async fn check_output(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<Signal, EngineError> {
        let draft = state
            .draft()
            .ok_or_else(|| EngineError::Transition("output check without a draft".to_string()))?
            .to_string();
        let verdict = match self
            .call(
                Collaborator::SafetyGate,
                cancel,
                self.collaborators.safety.check_output(&draft, state.query()),
            )
            .await
        {
            Ok(verdict) => verdict,
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) => {
                warn!(error = %err, "output safety check failed, delivering response");
                OutputVerdict::fail_open(messages::diagnostic_summary(&err.to_string()))
            }
        };
        state.record_safety(SafetyCheckResult::from_output(&verdict))?;

        let response = if verdict.should_block {
            warn!("output blocked, using fallback response");
            state.push_step("Safety Check (Output)", "Blocked; replaced with a safe fallback")?;
            messages::OUTPUT_FALLBACK.to_string()
        } else if verdict.needs_revision {
            info!("output flagged for revision");
            state.push_step("Safety Check (Output)", "Passed with revision suggested")?;
            draft
        } else {
            state.push_step("Safety Check (Output)", "Passed")?;
            draft
        };
        state.finish(Terminal::Completed, response)?;
        Ok(Signal::Proceed)
    }

    /// Await one collaborator call under the per-call timeout, racing the
    /// cancellation token.
    async fn call<T>(
        &self,
        collaborator: Collaborator,
        cancel: &CancellationToken,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, EngineError> {
        let bounded = async {
            match self.config.call_timeout() {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("timed out after {}s", limit.as_secs())),
                },
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::cancelled("cancellation requested")),
            result = bounded => result.map_err(|err| {
                debug!(%collaborator, error = %format!("{err:#}"), "collaborator call failed");
                EngineError::external(collaborator, &err)
            }),
        }
    }
}

/// Seal a run that stopped on an error as Failed.
fn contain(state: &mut RunState, err: &EngineError) {
    if err.is_cancellation() {
        info!(error = %err, "run cancelled");
    } else {
        warn!(error = %err, "run failed");
    }
    if state.terminal().is_terminal() {
        warn!(terminal = ?state.terminal(), "error after the run was sealed");
        return;
    }
    let apology = messages::apology(&err.to_string());
    if let Err(sealed) = state.fail(err, apology) {
        warn!(error = %sealed, "could not record failure");
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Reflection;
    use crate::io::scenario::Scenario;
    use crate::test_support::{engine_for, sleep_items};

    #[test]
    fn zero_iterations_is_a_configuration_error() {
        let (collaborators, _) = Scenario::default().into_collaborators();
        let config = EngineConfig {
            max_iterations: 0,
            ..EngineConfig::default()
        };
        let err = ReActEngine::new(collaborators, config)
            .err()
            .expect("configuration error");
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn reasoning_log_follows_node_order() {
        let (engine, _) = engine_for(
            Scenario {
                retrieval: sleep_items(2),
                ..Scenario::default()
            },
            EngineConfig::default(),
        );
        let record = engine.run("How did I sleep?").await;
        let labels: Vec<&str> = record.reasoning_log.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            [
                "Safety Check (Input)",
                "ReAct Reason (cycle 1)",
                "ReAct Act (cycle 1)",
                "ReAct Observe (cycle 1)",
                "Response Synthesis",
                "Safety Check (Output)",
            ]
        );
        assert_eq!(record.reasoning_log[2].detail, "Found 2 relevant entries");
        assert!(record.reasoning_log[3].detail.contains("observer judged"));
    }

    #[tokio::test]
    async fn observer_sees_retrieved_content() {
        let scenario = Scenario {
            retrieval: sleep_items(1),
            reflections: vec![Reflection {
                observation: "ok".to_string(),
                is_sufficient: true,
            }],
            ..Scenario::default()
        };
        let (engine, _) = engine_for(scenario, EngineConfig::default());
        let execution = engine.execute("sleep?", CancellationToken::new()).await;
        assert_eq!(execution.state.observations(), ["ok"]);
        assert_eq!(execution.state.retrieved_context().len(), 1);
        assert_eq!(execution.record.terminal, Terminal::Completed);
    }

    #[tokio::test]
    async fn empty_query_fails_without_calling_collaborators() {
        let (engine, counts) = engine_for(Scenario::default(), EngineConfig::default());
        let record = engine.run("   ").await;
        assert_eq!(record.terminal, Terminal::Failed);
        assert!(record.safety_log.is_empty());
        assert!(record.response.starts_with("Sorry, I encountered an error"));
        for collaborator in Collaborator::ALL {
            assert_eq!(counts.get(collaborator), 0);
        }
    }

    #[test]
    fn info_reports_configuration() {
        let (engine, _) = engine_for(
            Scenario::default(),
            EngineConfig {
                max_iterations: 4,
                ..EngineConfig::default()
            },
        );
        let info = engine.info();
        assert_eq!(info.status, "ready");
        assert_eq!(info.max_iterations, 4);
        assert_eq!(info.collaborators.len(), 5);
        assert_eq!(info.nodes.first(), Some(&Node::InputSafety));
        assert_eq!(info.nodes.last(), Some(&Node::Done));
    }
}
