//! Stage agent plumbing: lifecycle state machine, shared dependencies, and the
//! generic [`Agent`] that wraps a stage-specific [`StageTask`].

use std::sync::Arc;

use async_trait::async_trait;
use mito_llm::LlmClient;
use mito_tools::{CancelToken, ToolRunner};
use mito_types::{MitoError, Result, StageName, StageResult, StageView};
use serde_json::json;

use crate::analysis::analyze_stage;
use crate::diagnosis::{Diagnoser, RuleDiagnoser};
use crate::events::{AgentEventKind, EventEmitter};
use crate::healing::{input_failure, HealingLoop};
use crate::knowledge::{MemoryAdapter, MemoryRecord, NoRag, RagAdapter};
use crate::simulation::{SimulatedRunner, Simulation};

// ---------------------------------------------------------------------------
// AgentState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Preparing,
    Running,
    Finished,
    Failed,
    Cancelled,
    Paused,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentState::Finished | AgentState::Failed | AgentState::Cancelled | AgentState::Paused
        )
    }

    /// Whether `self → to` is a legal move. `Paused` needs `can_pause`.
    pub fn can_transition(&self, to: AgentState, can_pause: bool) -> bool {
        use AgentState::*;
        match (self, to) {
            (Idle, Preparing) => true,
            (Preparing, Running) => true,
            (Preparing | Running, Failed | Cancelled) => true,
            (Running, Finished) => true,
            (Running, Paused) => can_pause,
            // A terminal agent can be driven again (executor retry, resume).
            (from, Preparing) if from.is_terminal() => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentDeps
// ---------------------------------------------------------------------------

/// Handles shared by every agent of one run.
#[derive(Clone)]
pub struct AgentDeps {
    pub runner: Arc<dyn ToolRunner>,
    pub diagnoser: Arc<dyn Diagnoser>,
    pub llm: Arc<LlmClient>,
    pub rag: Arc<dyn RagAdapter>,
    pub events: EventEmitter,
    pub simulation: Option<Arc<Simulation>>,
}

impl AgentDeps {
    /// Rule-based diagnosis, no LLM, no retrieval.
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            runner,
            diagnoser: Arc::new(RuleDiagnoser::new()),
            llm: Arc::new(LlmClient::disabled()),
            rag: Arc::new(NoRag),
            events: EventEmitter::default(),
            simulation: None,
        }
    }

    pub fn with_diagnoser(mut self, diagnoser: Arc<dyn Diagnoser>) -> Self {
        self.diagnoser = diagnoser;
        self
    }

    pub fn with_llm(mut self, llm: Arc<LlmClient>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_rag(mut self, rag: Arc<dyn RagAdapter>) -> Self {
        self.rag = rag;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_simulation(mut self, simulation: Arc<Simulation>) -> Self {
        self.simulation = Some(simulation);
        self
    }

    /// The runner for `stage`: simulated when `MITO_SIM` names the stage.
    pub fn runner_for(&self, stage: StageName) -> Arc<dyn ToolRunner> {
        match &self.simulation {
            Some(sim) if sim.covers(stage) => Arc::new(SimulatedRunner::new(sim.clone(), stage)),
            _ => self.runner.clone(),
        }
    }
}

/// What a task gets to work with during one execution.
pub struct TaskContext<'a> {
    pub deps: &'a AgentDeps,
    pub view: &'a StageView<'a>,
    pub runner: Arc<dyn ToolRunner>,
}

impl TaskContext<'_> {
    pub fn healing_loop(&self) -> HealingLoop<'_> {
        HealingLoop {
            runner: self.runner.as_ref(),
            diagnoser: self.deps.diagnoser.as_ref(),
            events: &self.deps.events,
            view: self.view,
        }
    }

    pub fn emit(&self, kind: AgentEventKind, payload: serde_json::Value) {
        self.deps
            .events
            .send(kind, self.view.stage, self.view.pipeline_id, payload);
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Stage-specific behaviour plugged into [`Agent`].
#[async_trait]
pub trait StageTask: Send + Sync {
    fn stage(&self) -> StageName;

    /// Only agents that wait on external completion may pause.
    fn can_pause(&self) -> bool {
        false
    }

    /// Reasons the stage cannot start; empty when inputs are usable.
    fn input_issues(&self, view: &StageView<'_>) -> Vec<String>;

    /// Produce the stage result. `Err` is reserved for cancellation and
    /// unexpected I/O; tool failures are `StageResult::Failed`.
    async fn run(&self, ctx: &TaskContext<'_>, cancel: &CancelToken) -> Result<StageResult>;
}

/// What the executor drives.
#[async_trait]
pub trait StageAgent: Send {
    fn stage(&self) -> StageName;
    fn state(&self) -> AgentState;
    fn input_issues(&self, view: &StageView<'_>) -> Vec<String>;

    fn validate_inputs(&self, view: &StageView<'_>) -> bool {
        self.input_issues(view).is_empty()
    }

    async fn execute_stage(&mut self, view: &StageView<'_>, cancel: &CancelToken) -> Result<StageResult>;
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent<T: StageTask> {
    task: T,
    deps: AgentDeps,
    memory: Box<dyn MemoryAdapter>,
    state: AgentState,
}

impl<T: StageTask> Agent<T> {
    pub fn new(task: T, deps: AgentDeps, memory: Box<dyn MemoryAdapter>) -> Self {
        Self {
            task,
            deps,
            memory,
            state: AgentState::Idle,
        }
    }

    fn transition(&mut self, to: AgentState) -> Result<()> {
        if !self.state.can_transition(to, self.task.can_pause()) {
            return Err(MitoError::Other(format!(
                "{} agent cannot move from {:?} to {:?}",
                self.task.stage(),
                self.state,
                to
            )));
        }
        tracing::debug!(stage = %self.task.stage(), from = ?self.state, to = ?to, "Agent state change");
        self.state = to;
        Ok(())
    }

    fn emit(&self, view: &StageView<'_>, kind: AgentEventKind, payload: serde_json::Value) {
        self.deps.events.send(kind, view.stage, view.pipeline_id, payload);
    }

    async fn remember(&mut self, view: &StageView<'_>, result: &StageResult) {
        let (tool, content) = match result {
            StageResult::Ok(ok) => (
                ok.tool.clone().unwrap_or_default(),
                format!("succeeded after {} re-attempts", ok.reattempts),
            ),
            StageResult::Failed(f) => (
                f.tool.clone().unwrap_or_default(),
                format!("failed ({}): {}", f.kind, f.message),
            ),
            StageResult::Paused { reason, .. } => (String::new(), format!("paused: {reason}")),
            StageResult::Skipped { reason } => (String::new(), format!("skipped: {reason}")),
        };
        let mut tags = vec![view.stage.to_string()];
        if !tool.is_empty() {
            tags.push(tool);
        }
        let record = MemoryRecord {
            stage: view.stage,
            tags,
            content,
        };
        if let Err(e) = self.memory.write(record).await {
            tracing::debug!(stage = %view.stage, error = %e, "Memory write failed");
        }
    }
}

#[async_trait]
impl<T: StageTask> StageAgent for Agent<T> {
    fn stage(&self) -> StageName {
        self.task.stage()
    }

    fn state(&self) -> AgentState {
        self.state
    }

    fn input_issues(&self, view: &StageView<'_>) -> Vec<String> {
        self.task.input_issues(view)
    }

    async fn execute_stage(&mut self, view: &StageView<'_>, cancel: &CancelToken) -> Result<StageResult> {
        self.transition(AgentState::Preparing)?;
        self.emit(view, AgentEventKind::Started, json!({ "retries_used": view.retries_used }));
        tokio::fs::create_dir_all(view.stage_dir()).await?;

        let issues = self.task.input_issues(view);
        if !issues.is_empty() {
            tracing::warn!(stage = %view.stage, issues = ?issues, "Stage inputs rejected");
            self.transition(AgentState::Failed)?;
            let result = StageResult::Failed(input_failure(&issues));
            self.emit(view, AgentEventKind::Error, json!({ "issues": issues }));
            return Ok(result);
        }

        self.transition(AgentState::Running)?;
        let ctx = TaskContext {
            deps: &self.deps,
            view,
            runner: self.deps.runner_for(view.stage),
        };
        let mut result = match self.task.run(&ctx, cancel).await {
            Ok(result) => result,
            Err(MitoError::Cancelled) => {
                self.transition(AgentState::Cancelled)?;
                self.emit(view, AgentEventKind::Error, json!({ "cancelled": true }));
                return Err(MitoError::Cancelled);
            }
            Err(e) => {
                tracing::error!(stage = %view.stage, error = %e, "Stage raised an unexpected error");
                StageResult::failed(mito_types::FailureKind::Unknown, e.to_string())
            }
        };

        if let StageResult::Ok(success) = &mut result {
            let tool = success.tool.clone().unwrap_or_default();
            success.output.ai_analysis =
                analyze_stage(&self.deps, self.memory.as_ref(), view, &success.output, &tool).await;
        }
        self.remember(view, &result).await;

        let next = match &result {
            StageResult::Ok(_) | StageResult::Skipped { .. } => AgentState::Finished,
            StageResult::Failed(_) => AgentState::Failed,
            StageResult::Paused { .. } => AgentState::Paused,
        };
        self.transition(next)?;
        match &result {
            StageResult::Failed(f) => self.emit(
                view,
                AgentEventKind::Error,
                json!({ "kind": f.kind, "message": f.message, "tool": f.tool, "reattempts": f.reattempts }),
            ),
            other => self.emit(
                view,
                AgentEventKind::StageComplete,
                json!({ "result": other, "reattempts": other.reattempts() }),
            ),
        }
        Ok(result)
    }
}
