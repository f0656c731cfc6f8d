//! Stage-graph executor.
//!
//! Drives a [`PipelineState`] from its `current_stage` to `END`, one node at a
//! time: run the node, merge its [`StageResult`], pick the next edge, write a
//! checkpoint. Agents only ever see a read-only view; every mutation of the
//! state happens here between stage invocations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use mito_agent::healing::input_failure;
use mito_agent::{agent_for, AgentDeps, InMemoryMemory, StageAgent};
use mito_tools::{lookup, CancelToken};
use mito_types::{
    now_epoch, round_to, ErrorRecord, FailureKind, Kingdom, MitoError, NodeId, PipelineState, Result, SeqType,
    StageFailure, StageName, StageOutput, StageResult, StageRoute, StageStatus,
};
use serde_json::json;

use crate::checkpoint::{save_checkpoint, save_paused, CHECKPOINT_FILE};
use crate::events::{EventEmitter, PipelineEvent};
use crate::plan::{detect_input_formats, detect_seq_type, resolve_plan};
use crate::report::{build_summary, HtmlReport, ReportRenderer};
use crate::routing::{self, Decision};

/// File the supervisor writes the resolved plan to.
pub const EXECUTION_PLAN_FILE: &str = "execution_plan.json";
pub const SUMMARY_FILE: &str = "summary.json";

const DEFAULT_ANNOTATOR: &str = "mitos";
const WEB_ANNOTATOR: &str = "geseq";

/// How a call to [`PipelineExecutor::run`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Failed {
        stage: StageName,
        error: Option<ErrorRecord>,
    },
    Paused {
        task_id: String,
        checkpoint: PathBuf,
    },
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed | RunOutcome::Paused { .. } => 0,
            RunOutcome::Failed { .. } | RunOutcome::Cancelled => 1,
        }
    }
}

/// Annotator for a run: explicit choice, then GeSeq for interactive plant runs, then MITOS.
pub fn resolve_annotator(state: &PipelineState) -> String {
    state
        .config
        .annotator
        .clone()
        .or_else(|| state.config.tool_chain.annotation.clone())
        .unwrap_or_else(|| {
            if state.inputs.kingdom == Kingdom::Plant && state.config.interactive {
                WEB_ANNOTATOR.to_string()
            } else {
                DEFAULT_ANNOTATOR.to_string()
            }
        })
        .to_ascii_lowercase()
}

pub struct PipelineExecutor {
    deps: AgentDeps,
    agents: BTreeMap<StageName, Box<dyn StageAgent>>,
    renderer: Arc<dyn ReportRenderer>,
    events: EventEmitter,
    paused_dir: PathBuf,
}

impl PipelineExecutor {
    pub fn new(deps: AgentDeps, paused_dir: impl Into<PathBuf>) -> Self {
        let agents = StageName::ALL
            .into_iter()
            .filter_map(|stage| {
                agent_for(stage, deps.clone(), Box::new(InMemoryMemory::new())).map(|agent| (stage, agent))
            })
            .collect();
        Self {
            deps,
            agents,
            renderer: Arc::new(HtmlReport),
            events: EventEmitter::default(),
            paused_dir: paused_dir.into(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Replace the agent for one stage.
    pub fn with_agent(mut self, agent: Box<dyn StageAgent>) -> Self {
        self.agents.insert(agent.stage(), agent);
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn deps(&self) -> &AgentDeps {
        &self.deps
    }

    /// Run until `END`, a pause, or cancellation.
    pub async fn run(&mut self, state: &mut PipelineState, cancel: &CancelToken) -> Result<RunOutcome> {
        let started = Instant::now();
        tokio::fs::create_dir_all(&state.workdir).await?;
        self.events.emit(PipelineEvent::PipelineStarted {
            pipeline_id: state.pipeline_id.clone(),
            resumed: !state.completed_stages.is_empty(),
        });
        tracing::info!(
            pipeline_id = %state.pipeline_id,
            stage = %state.current_stage,
            workdir = %state.workdir.display(),
            "Pipeline run starting"
        );

        // every edge either advances or spends a retry, so this bounds the loop
        let max_steps = StageName::ALL.len() * (state.config.max_retries as usize + 2);
        let mut steps = 0;

        while let Some(stage) = state.current_stage.stage() {
            steps += 1;
            if steps > max_steps {
                return Err(MitoError::Other(format!(
                    "stage graph did not reach END after {max_steps} steps"
                )));
            }
            if cancel.is_cancelled() {
                return Ok(self.cancelled(state, None).await);
            }

            self.begin(state, stage);
            let result = match self.execute(state, stage, cancel).await {
                Ok(result) => result,
                Err(MitoError::Cancelled) => return Ok(self.cancelled(state, Some(stage)).await),
                Err(e) => {
                    tracing::error!(stage = %stage, error = %e, "Stage raised an error");
                    StageResult::Failed(StageFailure::new(FailureKind::Unknown, e.to_string()))
                }
            };

            let decision = self.apply(state, stage, result);
            self.checkpoint(state, stage).await;

            if decision.route == StageRoute::Pause {
                if let Some(task_id) = state.paused_task_id.clone() {
                    return self.pause(state, task_id).await;
                }
            }
        }

        state.done = true;
        state.end_time = Some(now_epoch());
        if let Err(e) = save_checkpoint(state, &state.workdir.join(CHECKPOINT_FILE)).await {
            tracing::warn!(error = %e, "Final checkpoint failed");
            state.warnings.push(format!("final checkpoint failed: {e}"));
        }

        self.events.emit(PipelineEvent::PipelineCompleted {
            pipeline_id: state.pipeline_id.clone(),
            completed_stages: state.completed_stages.clone(),
            failed_stages: state.failed_stages.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        });

        let failed = state
            .failed_stages
            .iter()
            .copied()
            .find(|stage| *stage != StageName::Polish);
        Ok(match failed {
            Some(stage) => {
                let error = state.errors.iter().rev().find(|e| e.stage == stage).cloned();
                tracing::warn!(stage = %stage, "Pipeline finished with a failed stage");
                RunOutcome::Failed { stage, error }
            }
            None => {
                tracing::info!(
                    completed = state.completed_stages.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Pipeline completed"
                );
                RunOutcome::Completed
            }
        })
    }

    fn begin(&self, state: &mut PipelineState, stage: StageName) {
        state.stage_status.insert(stage, StageStatus::Running);
        let metrics = state.stage_metrics.entry(stage).or_default();
        if metrics.attempts == 0 {
            metrics.started_at = now_epoch();
        }
        metrics.attempts += 1;
        let attempt = metrics.attempts;
        tracing::info!(stage = %stage, attempt, "Stage starting");
        self.events.emit(PipelineEvent::StageStarted { stage, attempt });
    }

    async fn execute(&mut self, state: &mut PipelineState, stage: StageName, cancel: &CancelToken) -> Result<StageResult> {
        match stage {
            StageName::Supervisor => self.supervise(state).await,
            StageName::Report => self.report(state).await,
            _ => {
                let agent = self
                    .agents
                    .get_mut(&stage)
                    .ok_or_else(|| MitoError::Other(format!("no agent registered for {stage}")))?;
                let view = state.view(stage);
                agent.execute_stage(&view, cancel).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Executor-owned nodes
    // -----------------------------------------------------------------------

    async fn supervise(&self, state: &mut PipelineState) -> Result<StageResult> {
        let missing: Vec<String> = state
            .inputs
            .read_paths()
            .into_iter()
            .filter(|p| !p.exists())
            .map(|p| format!("input not found: {}", p.display()))
            .collect();
        if !missing.is_empty() {
            return Ok(StageResult::Failed(input_failure(&missing)));
        }

        let paths = state.inputs.read_paths();
        let seq_type = match state.config.seq_type {
            SeqType::Auto => detect_seq_type(&paths),
            explicit => explicit,
        };
        let formats = detect_input_formats(&paths);
        let plan = match state.config.tool_plan.clone() {
            Some(plan) => plan,
            None => resolve_plan(seq_type, state.inputs.kingdom, &formats, &state.inputs.hints),
        };
        if plan.candidates.assembler.is_empty() {
            let mut failure = StageFailure::new(FailureKind::ParameterError, "tool plan has no assembler candidate");
            failure.recoverable = false;
            return Ok(StageResult::Failed(failure));
        }

        let chain = &mut state.config.tool_chain;
        if chain.qc.is_none() {
            chain.qc = plan.qc.first().cloned();
        }
        if chain.assembly.is_none() {
            chain.assembly = Some(plan.assembler.name.clone());
        }
        let polish = seq_type != SeqType::Illumina || state.config.polish_short_reads;
        if chain.polishing.is_none() && polish && !plan.polishers.is_empty() {
            chain.polishing = Some(plan.polishers.join(","));
        }
        state.config.seq_type = seq_type;
        let annotator = resolve_annotator(state);
        state.config.annotator = Some(annotator.clone());
        state.config.tool_chain.annotation = Some(annotator.clone());

        let mut warnings = plan.warnings.clone();
        for tool in state.config.tool_chain.assembly.iter().chain(&state.config.tool_chain.qc) {
            if lookup(tool).is_none() {
                warnings.push(format!("tool '{tool}' is not in the catalog"));
            }
        }

        let dir = state.stage_dir(StageName::Supervisor);
        tokio::fs::create_dir_all(&dir).await?;
        let plan_path = dir.join(EXECUTION_PLAN_FILE);
        let document = json!({
            "pipeline_id": state.pipeline_id,
            "seq_type": seq_type,
            "kingdom": state.inputs.kingdom,
            "input_formats": formats,
            "plan": plan,
            "tool_chain": state.config.tool_chain,
            "annotator": annotator,
            "dry_run": state.config.dry_run,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        tokio::fs::write(&plan_path, serde_json::to_string_pretty(&document)?).await?;
        tracing::info!(
            seq_type = %seq_type,
            kingdom = %state.inputs.kingdom,
            assembler = %plan.assembler.name,
            annotator = %annotator,
            "Execution plan resolved"
        );

        let mut output = StageOutput {
            tool: Some("supervisor".into()),
            ..StageOutput::default()
        };
        output.files.insert("execution_plan".into(), plan_path);
        output.metrics.insert("seq_type".into(), json!(seq_type));
        output.metrics.insert("kingdom".into(), json!(state.inputs.kingdom));
        output.metrics.insert("assembler".into(), json!(plan.assembler.name));
        output.metrics.insert("annotator".into(), json!(annotator));
        state.config.tool_plan = Some(plan);

        let mut result = StageResult::ok(output, Some("supervisor".into()));
        if let StageResult::Ok(success) = &mut result {
            success.warnings = warnings;
        }
        Ok(result)
    }

    async fn report(&self, state: &PipelineState) -> Result<StageResult> {
        let dir = state.stage_dir(StageName::Report);
        tokio::fs::create_dir_all(&dir).await?;
        let summary = build_summary(state);

        let summary_path = dir.join(SUMMARY_FILE);
        tokio::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?).await?;
        let report_path = dir.join(self.renderer.file_name());
        tokio::fs::write(&report_path, self.renderer.render(&summary)).await?;

        let mut output = StageOutput {
            tool: Some("report".into()),
            ..StageOutput::default()
        };
        output.files.insert("summary".into(), summary_path);
        output.files.insert("report".into(), report_path);
        output.metrics.insert("success_rate".into(), json!(summary.success_rate));
        output.metrics.insert("total_runtime".into(), json!(summary.total_runtime_sec));
        output.metrics.insert("progress_percent".into(), json!(summary.progress.percent));
        Ok(StageResult::ok(output, Some("report".into())))
    }

    // -----------------------------------------------------------------------
    // Merging results
    // -----------------------------------------------------------------------

    fn apply(&self, state: &mut PipelineState, stage: StageName, result: StageResult) -> Decision {
        let now = now_epoch();
        let reattempts = result.reattempts();
        if reattempts > 0 {
            *state.retries.entry(stage).or_insert(0) += reattempts;
            if let Some(metrics) = state.stage_metrics.get_mut(&stage) {
                metrics.attempts += reattempts;
            }
        }
        let decision = routing::route(stage, &result, state);

        match result {
            StageResult::Ok(success) => {
                state.warnings.extend(success.warnings);
                let mut duration_ms = 0;
                if let Some(metrics) = state.stage_metrics.get_mut(&stage) {
                    let duration = (now - metrics.started_at).max(0.0);
                    metrics.finished_at = Some(now);
                    metrics.duration_sec = Some(round_to(duration, 3));
                    metrics.tool = success.tool.clone();
                    metrics.exit_code = success.exit_code;
                    duration_ms = (duration * 1000.0) as u64;
                }
                if stage == StageName::Polish {
                    if let Some(polished) = success.output.file("polished").map(Path::to_path_buf) {
                        if let Some(assembly) = state.stage_outputs.get_mut(&StageName::Assembly) {
                            assembly.files.insert("assembly".into(), polished);
                        }
                    }
                } else if let Some(tool) = &success.tool {
                    if matches!(stage, StageName::Qc | StageName::Assembly | StageName::Annotation) {
                        state.config.tool_chain.set_for_stage(stage, tool.clone());
                    }
                }
                state.stage_outputs.insert(stage, success.output);
                state.stage_status.insert(stage, StageStatus::Completed);
                state.failed_stages.retain(|s| *s != stage);
                if !state.completed_stages.contains(&stage) {
                    state.completed_stages.push(stage);
                }
                tracing::info!(stage = %stage, tool = ?success.tool, duration_ms, "Stage completed");
                self.events.emit(PipelineEvent::StageCompleted {
                    stage,
                    tool: success.tool,
                    duration_ms,
                });
            }
            StageResult::Failed(failure) => {
                let elapsed = state
                    .stage_metrics
                    .get(&stage)
                    .map(|m| round_to((now - m.started_at).max(0.0), 3));
                state.warnings.extend(failure.warnings.iter().cloned());
                state.errors.push(ErrorRecord {
                    stage,
                    kind: failure.kind,
                    message: failure.message.clone(),
                    tool: failure.tool.clone(),
                    diagnosis: failure.diagnosis.clone(),
                    stdout_log: failure.stdout_log.clone(),
                    stderr_log: failure.stderr_log.clone(),
                    timestamp: now,
                    elapsed_sec: elapsed,
                });
                tracing::warn!(
                    stage = %stage,
                    kind = %failure.kind,
                    route = ?decision.route,
                    "Stage failed: {}",
                    failure.message
                );
                self.events.emit(PipelineEvent::StageFailed {
                    stage,
                    kind: failure.kind,
                    message: failure.message,
                });
                match decision.route {
                    StageRoute::Retry | StageRoute::Fallback => {
                        state.stage_status.insert(stage, StageStatus::Pending);
                        *state.retries.entry(stage).or_insert(0) += 1;
                    }
                    _ => {
                        state.stage_status.insert(stage, StageStatus::Failed);
                        state.stage_metrics.remove(&stage);
                        if !state.failed_stages.contains(&stage) {
                            state.failed_stages.push(stage);
                        }
                    }
                }
            }
            StageResult::Paused { task_id, reason } => {
                tracing::info!(stage = %stage, task_id = %task_id, "Stage paused: {reason}");
                state.stage_status.insert(stage, StageStatus::Paused);
                state.paused_task_id = Some(task_id);
            }
            StageResult::Skipped { reason } => {
                tracing::info!(stage = %stage, "Stage skipped: {reason}");
                state.stage_status.insert(stage, StageStatus::Skipped);
                state.stage_metrics.remove(&stage);
                self.events.emit(PipelineEvent::StageSkipped { stage });
            }
        }

        if let (StageRoute::Fallback, Some(tool)) = (decision.route, &decision.fallback_tool) {
            tracing::info!(stage = %stage, tool = %tool, "Falling back to next assembler");
            state.config.tool_chain.assembly = Some(tool.clone());
        }
        if stage == StageName::Assembly && decision.route == StageRoute::Skip {
            state.stage_status.insert(StageName::Polish, StageStatus::Skipped);
            self.events.emit(PipelineEvent::StageSkipped {
                stage: StageName::Polish,
            });
        }

        state.route = Some(decision.route);
        state.current_stage = decision.next;
        self.events.emit(PipelineEvent::RouteSelected {
            from: stage,
            route: decision.route,
            to: decision.next.to_string(),
        });
        decision
    }

    async fn checkpoint(&self, state: &mut PipelineState, stage: StageName) {
        match save_checkpoint(state, &state.workdir.join(CHECKPOINT_FILE)).await {
            Ok(()) => self.events.emit(PipelineEvent::CheckpointSaved { stage }),
            Err(e) => {
                tracing::warn!(stage = %stage, error = %e, "Checkpoint failed");
                state.warnings.push(format!("checkpoint after {stage} failed: {e}"));
            }
        }
    }

    async fn pause(&self, state: &mut PipelineState, task_id: String) -> Result<RunOutcome> {
        let (checkpoint, warning) = save_paused(state, &task_id, &self.paused_dir).await?;
        if let Some(warning) = warning {
            state.warnings.push(warning);
            self.checkpoint(state, StageName::Annotation).await;
        }
        tracing::info!(task_id = %task_id, checkpoint = %checkpoint.display(), "Pipeline paused");
        self.events.emit(PipelineEvent::PipelinePaused {
            pipeline_id: state.pipeline_id.clone(),
            task_id: task_id.clone(),
        });
        Ok(RunOutcome::Paused { task_id, checkpoint })
    }

    async fn cancelled(&self, state: &mut PipelineState, stage: Option<StageName>) -> RunOutcome {
        if let Some(stage) = stage {
            // the interrupted stage starts over on the next run
            state.stage_status.insert(stage, StageStatus::Pending);
        }
        state.warnings.push("run cancelled".into());
        tracing::warn!(stage = %state.current_stage, "Pipeline cancelled");
        if let Err(e) = save_checkpoint(state, &state.workdir.join(CHECKPOINT_FILE)).await {
            tracing::warn!(error = %e, "Checkpoint after cancellation failed");
        }
        self.events.emit(PipelineEvent::PipelineCancelled {
            pipeline_id: state.pipeline_id.clone(),
        });
        RunOutcome::Cancelled
    }
}
