//! Per-query mutable record threaded through the state machine.
//!
//! Collections are append-only and every mutator refuses to run once the
//! state is terminal.

use std::time::Duration;

use serde::Serialize;

use crate::core::messages;
use crate::core::types::{
    ContextItem, ReasoningStep, ResultRecord, SafetyCheckResult, SafetyPhase, Terminal,
};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    query: String,
    retrieved_context: Vec<ContextItem>,
    reasoning_log: Vec<ReasoningStep>,
    safety_log: Vec<SafetyCheckResult>,
    observations: Vec<String>,
    iteration: u32,
    continue_policy: bool,
    /// Synthesizer output awaiting the output check.
    #[serde(skip)]
    draft: Option<String>,
    response: String,
    terminal: Terminal,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Point-in-time copy of the observable parts of a RunState.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub reasoning_log: Vec<ReasoningStep>,
    pub safety_log: Vec<SafetyCheckResult>,
    pub iteration: u32,
    pub continue_policy: bool,
}

impl RunState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            retrieved_context: Vec::new(),
            reasoning_log: Vec::new(),
            safety_log: Vec::new(),
            observations: Vec::new(),
            iteration: 0,
            continue_policy: true,
            draft: None,
            response: String::new(),
            terminal: Terminal::Running,
            error: None,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn retrieved_context(&self) -> &[ContextItem] {
        &self.retrieved_context
    }

    pub fn reasoning_log(&self) -> &[ReasoningStep] {
        &self.reasoning_log
    }

    pub fn safety_log(&self) -> &[SafetyCheckResult] {
        &self.safety_log
    }

    pub fn observations(&self) -> &[String] {
        &self.observations
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn continue_policy(&self) -> bool {
        self.continue_policy
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn terminal(&self) -> Terminal {
        self.terminal
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn push_step(
        &mut self,
        label: impl Into<String>,
        detail: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.ensure_running("append a reasoning step")?;
        self.reasoning_log.push(ReasoningStep::new(label, detail));
        Ok(())
    }

    /// Append a safety check. At most one entry per phase, input first.
    pub fn record_safety(&mut self, check: SafetyCheckResult) -> Result<(), EngineError> {
        self.ensure_running("record a safety check")?;
        let has_phase = |phase| self.safety_log.iter().any(|c| c.phase == phase);
        let allowed = match check.phase {
            SafetyPhase::Input => self.safety_log.is_empty(),
            SafetyPhase::Output => has_phase(SafetyPhase::Input) && !has_phase(SafetyPhase::Output),
        };
        if !allowed {
            return Err(EngineError::Sealed("record a duplicate or out-of-order safety check"));
        }
        self.safety_log.push(check);
        Ok(())
    }

    pub fn extend_context(&mut self, items: Vec<ContextItem>) -> Result<(), EngineError> {
        self.ensure_running("extend retrieved context")?;
        self.retrieved_context.extend(items);
        Ok(())
    }

    /// Close one ReAct cycle: record its observation and advance the counter.
    pub fn complete_cycle(&mut self, observation: impl Into<String>) -> Result<u32, EngineError> {
        self.ensure_running("complete a cycle")?;
        self.observations.push(observation.into());
        self.iteration += 1;
        Ok(self.iteration)
    }

    pub fn set_continue_policy(&mut self, value: bool) -> Result<(), EngineError> {
        self.ensure_running("update the continue policy")?;
        self.continue_policy = value;
        Ok(())
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> Result<(), EngineError> {
        self.ensure_running("store a draft response")?;
        if self.draft.is_some() {
            return Err(EngineError::Sealed("overwrite the synthesized draft"));
        }
        self.draft = Some(text.into());
        Ok(())
    }

    /// Seal the run with its one and only response.
    pub fn finish(
        &mut self,
        terminal: Terminal,
        response: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.ensure_running("finish the run")?;
        if !terminal.is_terminal() {
            return Err(EngineError::Sealed("finish with a non-terminal state"));
        }
        self.terminal = terminal;
        self.response = response.into();
        self.continue_policy = false;
        Ok(())
    }

    /// Seal the run as failed. The result record keeps only the first line of
    /// the error, truncated.
    pub fn fail(
        &mut self,
        error: &EngineError,
        response: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.finish(Terminal::Failed, response)?;
        self.error = Some(messages::diagnostic_summary(&error.to_string()));
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            reasoning_log: self.reasoning_log.clone(),
            safety_log: self.safety_log.clone(),
            iteration: self.iteration,
            continue_policy: self.continue_policy,
        }
    }

    pub fn to_record(&self, elapsed: Duration) -> ResultRecord {
        ResultRecord {
            success: self.terminal != Terminal::Failed,
            query: self.query.clone(),
            response: self.response.clone(),
            terminal: self.terminal,
            reasoning_log: self.reasoning_log.clone(),
            safety_log: self.safety_log.clone(),
            react_cycles: self.iteration,
            retrieved_entry_count: self.retrieved_context.len(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            error: self.error.clone(),
        }
    }

    fn ensure_running(&self, action: &'static str) -> Result<(), EngineError> {
        if self.terminal.is_terminal() {
            return Err(EngineError::Sealed(action));
        }
        Ok(())
    }
}
