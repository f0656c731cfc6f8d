use async_trait::async_trait;
use mito_tools::CancelToken;
use mito_types::{Result, StageName, StageResult, StageView};
use serde_json::json;

use super::{into_result, read_issues, working_reads};
use crate::agent::{StageTask, TaskContext};
use crate::events::AgentEventKind;
use crate::healing::{JobOutcome, ToolJob};
use crate::params::AttemptParams;

const DEFAULT_QC_TOOL: &str = "fastp";

/// Read quality control: the primary QC tool through the healing loop, then
/// any secondary QC tools best-effort.
pub struct QcTask;

impl QcTask {
    fn tools(view: &StageView<'_>) -> (String, Vec<String>) {
        let plan_qc = view
            .config
            .tool_plan
            .as_ref()
            .map(|p| p.qc.clone())
            .unwrap_or_default();
        let primary = view
            .configured_tool()
            .map(str::to_string)
            .or_else(|| plan_qc.first().cloned())
            .unwrap_or_else(|| DEFAULT_QC_TOOL.to_string());
        let secondary = plan_qc
            .into_iter()
            .filter(|t| !t.eq_ignore_ascii_case(&primary))
            .collect();
        (primary, secondary)
    }
}

#[async_trait]
impl StageTask for QcTask {
    fn stage(&self) -> StageName {
        StageName::Qc
    }

    fn input_issues(&self, view: &StageView<'_>) -> Vec<String> {
        read_issues(view)
    }

    async fn run(&self, ctx: &TaskContext<'_>, cancel: &CancelToken) -> Result<StageResult> {
        let view = ctx.view;
        let (primary, secondary) = Self::tools(view);
        let candidates = view
            .config
            .tool_plan
            .as_ref()
            .map(|p| p.candidates.qc.clone())
            .unwrap_or_default();
        let mut inputs = working_reads(view);
        inputs.assembly = None;

        let job = ToolJob {
            dir: view.stage_dir(),
            tool: primary.clone(),
            candidates,
            params: AttemptParams::for_tool(view, &primary),
            inputs: inputs.clone(),
            budget: view.retry_budget(),
        };
        let mut result = match ctx.healing_loop().run(job, cancel).await? {
            JobOutcome::Succeeded(success) => into_result(success),
            JobOutcome::Failed(failure) => return Ok(StageResult::Failed(failure)),
        };

        for tool in secondary {
            let job = ToolJob {
                dir: view.stage_dir().join(&tool),
                tool: tool.clone(),
                candidates: Vec::new(),
                params: AttemptParams::for_tool(view, &tool),
                inputs: inputs.clone(),
                budget: 0,
            };
            let outcome = ctx.healing_loop().run(job, cancel).await?;
            let StageResult::Ok(success) = &mut result else {
                break;
            };
            match outcome {
                JobOutcome::Succeeded(extra) => {
                    if let Some(report) = extra.parsed.files.get("report") {
                        success.output.files.insert(format!("{tool}_report"), report.clone());
                    }
                }
                JobOutcome::Failed(failure) => {
                    let warning = format!("secondary QC tool {tool} failed: {}", failure.message);
                    tracing::warn!(stage = %view.stage, tool = %tool, "{warning}");
                    ctx.emit(AgentEventKind::Log, json!({ "warning": warning }));
                    success.warnings.push(warning);
                }
            }
        }
        Ok(result)
    }
}
