//! The self-healing tool loop: run → parse → diagnose → adjust/switch → run again.

use std::path::{Path, PathBuf};

use mito_tools::parsers::write_placeholder;
use mito_tools::truncation::{tail_lines, truncate_output, TruncationMode};
use mito_tools::{lookup, parser_for, CancelToken, ParsedOutput, ToolContext, ToolRun, ToolRunner};
use mito_types::{
    Diagnosis, FailureKind, FixStrategy, MitoError, Result, StageFailure, StageName, StageView,
};
use serde_json::json;

use crate::diagnosis::{Diagnoser, FailureContext};
use crate::events::{AgentEventKind, EventEmitter};
use crate::params::AttemptParams;

const MAX_TAIL_CHARS: usize = 4000;

/// Files a job reads.
#[derive(Debug, Clone, Default)]
pub struct JobInputs {
    pub reads: PathBuf,
    pub reads2: Option<PathBuf>,
    pub long_reads: Option<PathBuf>,
    pub assembly: Option<PathBuf>,
}

/// One tool invocation, possibly re-attempted, inside a stage.
#[derive(Debug, Clone)]
pub struct ToolJob {
    pub dir: PathBuf,
    pub tool: String,
    /// Tools the loop may switch to, in preference order.
    pub candidates: Vec<String>,
    pub params: AttemptParams,
    pub inputs: JobInputs,
    /// Re-attempts allowed after the first run.
    pub budget: u32,
}

#[derive(Debug, Clone)]
pub struct JobSuccess {
    pub parsed: ParsedOutput,
    pub tool: String,
    pub reattempts: u32,
    pub exit_code: Option<i32>,
    pub params: AttemptParams,
    pub runs: Vec<ToolRun>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Succeeded(JobSuccess),
    Failed(StageFailure),
}

/// Everything the loop needs besides the job.
pub struct HealingLoop<'a> {
    pub runner: &'a dyn ToolRunner,
    pub diagnoser: &'a dyn Diagnoser,
    pub events: &'a EventEmitter,
    pub view: &'a StageView<'a>,
}

impl HealingLoop<'_> {
    fn stage(&self) -> StageName {
        self.view.stage
    }

    fn emit(&self, kind: AgentEventKind, payload: serde_json::Value) {
        self.events
            .send(kind, self.view.stage, self.view.pipeline_id, payload);
    }

    /// Drive `job` until it succeeds, the diagnosis says stop, or the budget is spent.
    ///
    /// Only cancellation is returned as `Err`; every other problem becomes a
    /// [`StageFailure`].
    pub async fn run(&self, job: ToolJob, cancel: &CancelToken) -> Result<JobOutcome> {
        let ToolJob {
            dir,
            mut tool,
            candidates,
            mut params,
            inputs,
            budget,
        } = job;
        let mut failures: u32 = 0;
        let mut warnings = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(MitoError::Cancelled);
            }
            let attempt = failures + 1;
            self.emit(
                AgentEventKind::Progress,
                json!({
                    "attempt": attempt,
                    "tool": tool,
                    "threads": params.threads,
                    "timeout_secs": params.timeout_secs,
                }),
            );
            tracing::info!(stage = %self.stage(), tool = %tool, attempt, threads = params.threads, "Running stage tool");

            let (runs, parsed) = match self.attempt(&dir, &tool, &params, &inputs, cancel).await {
                Ok(attempted) => attempted,
                Err(MitoError::Cancelled) => return Err(MitoError::Cancelled),
                Err(e) => {
                    tracing::warn!(stage = %self.stage(), tool = %tool, error = %e, "Stage tool could not be prepared");
                    (Vec::new(), ParsedOutput::failed(e.to_string()))
                }
            };
            let all_ok = !runs.is_empty() && runs.iter().all(ToolRun::succeeded);
            let (stdout_log, stderr_log) = write_combined_logs(&dir, &runs).await;

            if all_ok && parsed.success {
                let exit_code = runs.last().map(|r| r.exit_code);
                return Ok(JobOutcome::Succeeded(JobSuccess {
                    parsed,
                    tool,
                    reattempts: failures,
                    exit_code,
                    params,
                    runs,
                    warnings,
                }));
            }

            failures += 1;
            let last = runs.last();
            let stderr = read_or_empty(&stderr_log).await;
            let stdout = read_or_empty(&stdout_log).await;
            let tail = self.view.config.detail_level.log_tail_lines();
            let failure = FailureContext {
                task_id: self.view.pipeline_id.to_string(),
                stage: self.stage(),
                tool: tool.clone(),
                exit_code: last.map(|r| r.exit_code),
                timed_out: last.is_some_and(|r| r.timed_out),
                stderr_tail: truncate_output(&tail_lines(&stderr, tail), MAX_TAIL_CHARS, TruncationMode::Tail),
                stdout_tail: truncate_output(&tail_lines(&stdout, tail), MAX_TAIL_CHARS, TruncationMode::Tail),
                parser_errors: parsed.errors.clone(),
                candidates: candidates.clone(),
            };
            let diagnosis = self.diagnoser.diagnose(&failure).await;
            tracing::warn!(
                stage = %self.stage(),
                tool = %tool,
                attempt,
                kind = %diagnosis.error_type,
                strategy = ?diagnosis.strategy,
                "Stage tool failed"
            );
            self.emit(
                AgentEventKind::Error,
                json!({
                    "attempt": attempt,
                    "tool": tool,
                    "exit_code": failure.exit_code,
                    "diagnosis": diagnosis,
                }),
            );

            let fail = |message: String, diagnosis: Diagnosis, recoverable: bool, warnings: Vec<String>| {
                let mut f = StageFailure::new(diagnosis.error_type, message);
                f.recoverable = recoverable && f.recoverable;
                f.tool = Some(tool.clone());
                f.reattempts = failures - 1;
                f.stdout_log = Some(stdout_log.clone());
                f.stderr_log = Some(stderr_log.clone());
                f.diagnosis = Some(diagnosis);
                f.warnings = warnings;
                JobOutcome::Failed(f)
            };

            if failures > budget {
                let message = format!(
                    "retry budget exhausted after {failures} attempts: {}",
                    diagnosis.root_cause
                );
                return Ok(fail(message, diagnosis, true, warnings));
            }
            if diagnosis.is_abort() {
                let message = diagnosis.root_cause.clone();
                return Ok(fail(message, diagnosis, false, warnings));
            }

            match diagnosis.strategy {
                FixStrategy::Retry => {}
                FixStrategy::AdjustParams => {
                    if let Some(spec) = lookup(&tool) {
                        let rejected = params.apply(&diagnosis.param_adjustments, spec);
                        for w in &rejected {
                            tracing::warn!(stage = %self.stage(), tool = %tool, "{w}");
                        }
                        warnings.extend(rejected);
                    }
                }
                FixStrategy::SwitchTool => {
                    let next = diagnosis
                        .alternative_tool
                        .as_deref()
                        .filter(|alt| {
                            !alt.eq_ignore_ascii_case(&tool)
                                && candidates.iter().any(|c| c.eq_ignore_ascii_case(alt))
                        })
                        .map(str::to_ascii_lowercase)
                        .or_else(|| failure.next_candidate().map(str::to_ascii_lowercase));
                    match next {
                        Some(next) => {
                            tracing::info!(stage = %self.stage(), from = %tool, to = %next, "Switching tool");
                            self.emit(AgentEventKind::Log, json!({ "switch_tool": { "from": tool, "to": next } }));
                            params = AttemptParams::for_tool(self.view, &next);
                            tool = next;
                        }
                        None => {
                            let message = format!("{} and no alternative tool remains", diagnosis.root_cause);
                            return Ok(fail(message, diagnosis, false, warnings));
                        }
                    }
                }
                FixStrategy::Abort => {
                    let message = diagnosis.root_cause.clone();
                    return Ok(fail(message, diagnosis, false, warnings));
                }
            }
        }
    }

    /// Run every command of `tool` once and parse the result.
    async fn attempt(
        &self,
        dir: &Path,
        tool: &str,
        params: &AttemptParams,
        inputs: &JobInputs,
        cancel: &CancelToken,
    ) -> Result<(Vec<ToolRun>, ParsedOutput)> {
        tokio::fs::create_dir_all(dir).await?;
        let Some(spec) = lookup(tool) else {
            let run = ToolRun::unresolved(&mito_tools::ToolCommand::new(tool, dir));
            let parsed = ParsedOutput::failed(format!("unknown tool '{tool}' is not in the catalog"));
            return Ok((vec![run], parsed));
        };

        let ctx = ToolContext {
            out_dir: dir,
            reads: &inputs.reads,
            reads2: inputs.reads2.as_deref(),
            long_reads: inputs.long_reads.as_deref(),
            assembly: inputs.assembly.as_deref(),
            seq_type: self.view.config.seq_type,
            kingdom: self.view.inputs.kingdom,
            threads: params.threads,
            memory: &params.memory,
            params: &params.extra,
        };
        for (path, content) in spec.setup_files(&ctx) {
            tokio::fs::write(&path, content).await?;
        }

        let mut runs = Vec::new();
        for command in spec.commands(&ctx, params.timeout()) {
            self.emit(AgentEventKind::Log, json!({ "command": command.display() }));
            let run = match self.runner.run(&command, cancel).await {
                Ok(run) => run,
                Err(MitoError::Cancelled) => return Err(MitoError::Cancelled),
                Err(e) => ToolRun::start_failed(&command, &e.to_string()).await,
            };
            let ok = run.succeeded();
            runs.push(run);
            if !ok {
                return Ok((runs, ParsedOutput::default()));
            }
        }
        if runs.is_empty() {
            return Ok((runs, ParsedOutput::failed(format!("{tool} has no runnable commands"))));
        }
        if runs.iter().all(|r| r.synthetic) {
            write_placeholder(spec, dir).await?;
        }
        let parsed = parser_for(spec.family).parse(dir, spec, &runs).await;
        Ok((runs, parsed))
    }
}

/// Concatenate every run's logs into `stdout.log` / `stderr.log` in `dir`.
async fn write_combined_logs(dir: &Path, runs: &[ToolRun]) -> (PathBuf, PathBuf) {
    let stdout_path = dir.join("stdout.log");
    let stderr_path = dir.join("stderr.log");
    let multi = runs.len() > 1;
    let mut stdout = String::new();
    let mut stderr = String::new();
    for run in runs {
        if multi {
            stdout.push_str(&format!("== {} ==\n", run.exe));
            stderr.push_str(&format!("== {} ==\n", run.exe));
        }
        stdout.push_str(&run.read_stdout().await);
        stderr.push_str(&run.read_stderr().await);
        if run.not_found() {
            stderr.push_str(&format!(
                "[mito] executable '{}' not found (exit {})\n",
                run.exe, run.exit_code
            ));
        }
    }
    if let Err(e) = tokio::fs::write(&stdout_path, stdout).await {
        tracing::warn!(path = %stdout_path.display(), error = %e, "Cannot write combined log");
    }
    if let Err(e) = tokio::fs::write(&stderr_path, stderr).await {
        tracing::warn!(path = %stderr_path.display(), error = %e, "Cannot write combined log");
    }
    (stdout_path, stderr_path)
}

async fn read_or_empty(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}

/// Failure for a stage whose inputs are missing or unusable.
pub fn input_failure(issues: &[String]) -> StageFailure {
    let mut failure = StageFailure::new(FailureKind::InputQuality, issues.join("; "));
    failure.recoverable = false;
    failure
}
